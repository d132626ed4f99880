/// Workers: the external collaborators a plan step invokes.
///
/// **Built-in workers** (one manifest each under `manifests/`):
/// - `JiraCollector`: pending tickets from the issue tracker
/// - `GitHubExecutor`: list or create tracking issues through `gh`
/// - `DesignAnalyzer` / `CodeAnalyzer`: model-backed impact analysis
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::context::{ContextPatch, ExecutionContext};
use crate::provider::TextModel;

pub mod analyzer;
pub mod github;
pub mod jira;

pub use analyzer::{AnalysisFocus, ImpactAnalyzer};
pub use github::{GhCli, GhRunner, GitHubExecutor};
pub use jira::JiraCollector;

#[async_trait]
pub trait Worker: Send + Sync {
    /// Name matching the worker's manifest.
    fn name(&self) -> &str;

    /// Run one step. The context is read-only; whatever the worker wants to
    /// contribute comes back as a patch.
    async fn run(&self, context: &ExecutionContext) -> Result<ContextPatch>;
}

/// Nested string lookup, e.g. `string_at(ticket, &["fields", "summary"])`.
pub fn string_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(*key))
        .and_then(Value::as_str)
}

pub fn builtin_workers(
    cfg: &RuntimeConfig,
    model: Option<Arc<dyn TextModel>>,
) -> Vec<Arc<dyn Worker>> {
    let gh: Arc<dyn GhRunner> = Arc::new(GhCli);
    vec![
        Arc::new(JiraCollector::from_config(cfg)),
        Arc::new(GitHubExecutor::new(cfg.github_repo.clone(), gh.clone())),
        Arc::new(ImpactAnalyzer::new(
            AnalysisFocus::Design,
            model.clone(),
            cfg.github_repo.clone(),
            gh.clone(),
        )),
        Arc::new(ImpactAnalyzer::new(
            AnalysisFocus::Code,
            model,
            cfg.github_repo.clone(),
            gh,
        )),
    ]
}
