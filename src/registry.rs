use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::manifest::{CapabilityManifest, builtin_manifests, load_manifest_dir, manifest_paths};
use crate::workers::Worker;

/// Binds manifest capabilities to live workers.
///
/// Capability dispatch uses an explicit index built as manifests are
/// registered: the first manifest to claim a capability owns it.
#[derive(Default)]
pub struct AgentRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
    manifests: Vec<CapabilityManifest>,
    manifest_index: HashMap<String, usize>,
    capability_index: HashMap<String, String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register workers, then every manifest in `manifests_dir`. Falls back to
    /// the built-in manifests when the directory holds no manifest files.
    pub fn load(manifests_dir: &Path, workers: Vec<Arc<dyn Worker>>) -> Result<Self> {
        let manifests = if manifest_paths(manifests_dir)?.is_empty() {
            tracing::info!(
                dir = %manifests_dir.display(),
                "no manifest files found, using built-in manifests"
            );
            builtin_manifests()
        } else {
            load_manifest_dir(manifests_dir)?
        };
        Ok(Self::from_parts(manifests, workers))
    }

    pub fn from_parts(manifests: Vec<CapabilityManifest>, workers: Vec<Arc<dyn Worker>>) -> Self {
        let mut registry = Self::new();
        for worker in workers {
            registry.register_worker(worker);
        }
        for manifest in manifests {
            if let Err(err) = registry.register_manifest(manifest) {
                tracing::warn!(error = %err, "skipping manifest");
            }
        }
        registry
    }

    /// Returns the worker previously registered under the same name, if any.
    pub fn register_worker(&mut self, worker: Arc<dyn Worker>) -> Option<Arc<dyn Worker>> {
        self.workers.insert(worker.name().to_string(), worker)
    }

    pub fn register_manifest(&mut self, manifest: CapabilityManifest) -> Result<()> {
        if self.manifest_index.contains_key(&manifest.name) {
            return Err(anyhow::anyhow!(
                "manifest '{}' is already registered",
                manifest.name
            ));
        }
        if !self.workers.contains_key(&manifest.name) {
            tracing::warn!(agent = %manifest.name, "manifest has no bound worker");
        }

        for capability in &manifest.capabilities {
            match self.capability_index.get(capability) {
                Some(owner) => {
                    tracing::warn!(
                        capability = %capability,
                        owner = %owner,
                        shadowed = %manifest.name,
                        "capability already claimed, keeping first registration"
                    );
                }
                None => {
                    self.capability_index
                        .insert(capability.clone(), manifest.name.clone());
                }
            }
        }

        self.manifest_index
            .insert(manifest.name.clone(), self.manifests.len());
        self.manifests.push(manifest);
        Ok(())
    }

    pub fn get_agent(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    pub fn get_agent_for_capability(&self, capability: &str) -> Option<Arc<dyn Worker>> {
        self.agent_name_for_capability(capability)
            .and_then(|name| self.get_agent(name))
    }

    pub fn agent_name_for_capability(&self, capability: &str) -> Option<&str> {
        self.capability_index.get(capability).map(String::as_str)
    }

    pub fn manifest(&self, name: &str) -> Option<&CapabilityManifest> {
        self.manifest_index
            .get(name)
            .and_then(|index| self.manifests.get(*index))
    }

    /// Manifests in registration order.
    pub fn get_all_manifests(&self) -> &[CapabilityManifest] {
        &self.manifests
    }

    pub fn worker_names(&self) -> Vec<String> {
        let mut names = self.workers.keys().cloned().collect::<Vec<String>>();
        names.sort();
        names
    }
}

pub fn run_manifests_list(registry: &AgentRegistry) -> Result<()> {
    let manifests = registry.get_all_manifests();
    println!("Registered agents ({}):", manifests.len());
    for manifest in manifests {
        let bound = if registry.get_agent(&manifest.name).is_some() {
            "bound"
        } else {
            "no worker"
        };
        println!("- {} ({bound}): {}", manifest.name, manifest.description);
        for capability in &manifest.capabilities {
            let owner = registry
                .agent_name_for_capability(capability)
                .unwrap_or("<none>");
            let marker = if owner == manifest.name {
                String::new()
            } else {
                format!(" (shadowed by {owner})")
            };
            println!("    capability: {capability}{marker}");
        }
        println!(
            "    inputs: {}",
            if manifest.inputs.is_empty() {
                "<none>".to_string()
            } else {
                manifest.inputs.join(", ")
            }
        );
        println!(
            "    outputs: {}",
            if manifest.outputs.is_empty() {
                "<none>".to_string()
            } else {
                manifest.outputs.join(", ")
            }
        );
    }
    Ok(())
}
