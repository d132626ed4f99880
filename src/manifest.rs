/// Capability manifests: declarative descriptions of what each worker does.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Per-capability override of `inputs`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub capability_inputs: HashMap<String, Vec<String>>,
}

impl CapabilityManifest {
    pub fn declares(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn inputs_for(&self, capability: &str) -> &[String] {
        self.capability_inputs
            .get(capability)
            .map(Vec::as_slice)
            .unwrap_or(&self.inputs)
    }

    fn normalize(mut self) -> Result<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("manifest 'name' cannot be empty"));
        }
        let mut seen = Vec::<String>::new();
        for capability in self.capabilities.drain(..) {
            let trimmed = capability.trim();
            if !trimmed.is_empty() && !seen.iter().any(|c| c == trimmed) {
                seen.push(trimmed.to_string());
            }
        }
        self.capabilities = seen;
        Ok(self)
    }
}

pub fn parse_manifest(content: &str) -> Result<CapabilityManifest> {
    serde_json::from_str::<CapabilityManifest>(content)
        .context("manifest is not a valid capability document")?
        .normalize()
}

pub fn load_manifest_file(path: &Path) -> Result<CapabilityManifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest '{}'", path.display()))?;
    parse_manifest(&content).with_context(|| format!("invalid manifest '{}'", path.display()))
}

/// `*.json` files under `dir`, sorted by file name so load order is stable.
pub fn manifest_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read manifests directory '{}'", dir.display()))?;
    let mut paths = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect::<Vec<PathBuf>>();
    paths.sort();
    Ok(paths)
}

/// Load every manifest in `dir`. Unreadable or malformed files are skipped
/// with a warning rather than failing the whole load.
pub fn load_manifest_dir(dir: &Path) -> Result<Vec<CapabilityManifest>> {
    let mut manifests = Vec::new();
    for path in manifest_paths(dir)? {
        match load_manifest_file(&path) {
            Ok(manifest) => manifests.push(manifest),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "skipping manifest");
            }
        }
    }
    Ok(manifests)
}

const BUILTIN_MANIFESTS: &[(&str, &str)] = &[
    ("code_analyzer.json", include_str!("../manifests/code_analyzer.json")),
    ("design_analyzer.json", include_str!("../manifests/design_analyzer.json")),
    ("github_executor.json", include_str!("../manifests/github_executor.json")),
    ("jira_collector.json", include_str!("../manifests/jira_collector.json")),
];

/// Manifests shipped with the binary, used when no manifests directory exists.
pub fn builtin_manifests() -> Vec<CapabilityManifest> {
    BUILTIN_MANIFESTS
        .iter()
        .filter_map(|(file, content)| match parse_manifest(content) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                tracing::warn!(file, error = %err, "skipping builtin manifest");
                None
            }
        })
        .collect()
}
