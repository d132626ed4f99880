/// Sequential plan execution with per-step hooks, timeouts and cancellation.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityKind;
use crate::context::{ExecutionContext, keys};
use crate::error::RunFailure;
use crate::hooks::{HookExecutor, HookPoint};
use crate::planner::Step;
use crate::registry::AgentRegistry;
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub step: Step,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionLogEntry {
    fn succeeded(step: &Step) -> Self {
        Self {
            step: step.clone(),
            status: StepStatus::Success,
            error: None,
        }
    }

    fn failed(step: &Step, failure: &RunFailure) -> Self {
        Self {
            step: step.clone(),
            status: StepStatus::Failed,
            error: Some(failure.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub context: ExecutionContext,
    pub log: Vec<ExecutionLogEntry>,
    pub success: bool,
}

pub struct ExecutionEngine {
    hooks: HookExecutor,
    step_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self {
            hooks: HookExecutor::default(),
            step_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: HookExecutor) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn hooks(&self) -> &HookExecutor {
        &self.hooks
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn execute(
        &self,
        plan: &[Step],
        registry: &AgentRegistry,
        initial: ExecutionContext,
    ) -> ExecutionOutcome {
        self.execute_with_telemetry(plan, registry, initial, &TelemetrySink::disabled())
            .await
    }

    /// Run every step in order. Failures are recorded per step and never
    /// stop the remaining plan; the log always has one entry per step.
    pub async fn execute_with_telemetry(
        &self,
        plan: &[Step],
        registry: &AgentRegistry,
        initial: ExecutionContext,
        telemetry: &TelemetrySink,
    ) -> ExecutionOutcome {
        let mut context = initial;
        let mut log = Vec::with_capacity(plan.len());

        for (index, step) in plan.iter().enumerate() {
            tracing::info!(
                step = index + 1,
                total = plan.len(),
                agent = %step.agent,
                capability = %step.capability,
                reasoning = %step.reasoning,
                "executing step"
            );

            let entry = match self.run_step(step, registry, &mut context, telemetry).await {
                Ok(()) => {
                    telemetry.emit(
                        "step.succeeded",
                        json!({"index": index, "agent": step.agent, "capability": step.capability}),
                    );
                    ExecutionLogEntry::succeeded(step)
                }
                Err(failure) => {
                    tracing::warn!(
                        step = index + 1,
                        agent = %step.agent,
                        capability = %step.capability,
                        error = %failure,
                        "step failed, continuing with remaining plan"
                    );
                    telemetry.emit(
                        "step.failed",
                        json!({
                            "index": index,
                            "agent": step.agent,
                            "capability": step.capability,
                            "error": failure.to_string(),
                            "category": failure.category().code(),
                        }),
                    );
                    ExecutionLogEntry::failed(step, &failure)
                }
            };
            log.push(entry);
        }

        let success = log.iter().all(|entry| entry.status == StepStatus::Success);
        ExecutionOutcome {
            context,
            log,
            success,
        }
    }

    async fn run_step(
        &self,
        step: &Step,
        registry: &AgentRegistry,
        context: &mut ExecutionContext,
        telemetry: &TelemetrySink,
    ) -> Result<(), RunFailure> {
        if self.cancel.is_cancelled() {
            return Err(RunFailure::Cancelled);
        }

        let worker = registry
            .get_agent(&step.agent)
            .ok_or_else(|| RunFailure::AgentNotFound {
                agent: step.agent.clone(),
            })?;
        if let Some(manifest) = registry.manifest(&step.agent)
            && !manifest.declares(&step.capability)
        {
            return Err(RunFailure::CapabilityNotDeclared {
                agent: step.agent.clone(),
                capability: step.capability.clone(),
            });
        }

        let kind = step.kind();
        self.hooks.run(HookPoint::PreStep, kind, context);

        let invocation = worker.run(context);
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RunFailure::Cancelled),
            result = async {
                match self.step_timeout {
                    Some(limit) => tokio::time::timeout(limit, invocation)
                        .await
                        .map_err(|_| RunFailure::StepTimedOut { secs: limit.as_secs() }),
                    None => Ok(invocation.await),
                }
            } => result?,
        };
        let patch = result.map_err(|err| RunFailure::StepFailed {
            message: format!("{err:#}"),
        })?;

        tracing::debug!(agent = %step.agent, keys = ?patch.keys().collect::<Vec<_>>(), "merging step output");
        context.merge(patch);

        self.apply_post_step_hooks(kind, context, telemetry);
        Ok(())
    }

    fn apply_post_step_hooks(
        &self,
        kind: CapabilityKind,
        context: &mut ExecutionContext,
        telemetry: &TelemetrySink,
    ) {
        let pending_before = context.array(keys::PENDING_ITEMS).len();
        let applied = self.hooks.run(HookPoint::PostStep, kind, context);
        if applied.contains(&"duplicate_filter") {
            let retained = context.array(keys::PENDING_ITEMS).len();
            telemetry.emit(
                "duplicates.filtered",
                json!({"dropped": pending_before.saturating_sub(retained), "retained": retained}),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPatch;
    use crate::manifest::CapabilityManifest;
    use crate::workers::Worker;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Worker returning a fixed patch and recording the action it saw.
    struct StaticWorker {
        name: &'static str,
        patch: Value,
        seen_actions: Mutex<Vec<Option<String>>>,
    }

    impl StaticWorker {
        fn new(name: &'static str, patch: Value) -> Arc<Self> {
            Arc::new(Self {
                name,
                patch,
                seen_actions: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Worker for StaticWorker {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, context: &ExecutionContext) -> Result<ContextPatch> {
            self.seen_actions
                .lock()
                .expect("action log should lock")
                .push(context.str_value(keys::ACTION).map(str::to_string));
            Ok(self.patch.as_object().cloned().unwrap_or_default())
        }
    }

    struct FailingWorker;

    #[async_trait]
    impl Worker for FailingWorker {
        fn name(&self) -> &str {
            "Flaky"
        }

        async fn run(&self, _context: &ExecutionContext) -> Result<ContextPatch> {
            Err(anyhow::anyhow!("upstream returned 502"))
        }
    }

    struct HangingWorker;

    #[async_trait]
    impl Worker for HangingWorker {
        fn name(&self) -> &str {
            "Hanging"
        }

        async fn run(&self, _context: &ExecutionContext) -> Result<ContextPatch> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ContextPatch::new())
        }
    }

    fn manifest(name: &str, capabilities: &[&str]) -> CapabilityManifest {
        CapabilityManifest {
            name: name.to_string(),
            description: String::new(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            capability_inputs: HashMap::new(),
        }
    }

    fn registry(workers: Vec<Arc<dyn Worker>>, manifests: Vec<CapabilityManifest>) -> AgentRegistry {
        AgentRegistry::from_parts(manifests, workers)
    }

    #[tokio::test]
    async fn unknown_agent_fails_its_step_and_the_rest_still_run() {
        let first = StaticWorker::new("First", json!({"a": 1}));
        let third = StaticWorker::new("Third", json!({"c": 3}));
        let registry = registry(vec![first.clone(), third.clone()], Vec::new());
        let plan = vec![
            Step::new("First", "fetch_a", ""),
            Step::new("Ghost", "fetch_b", ""),
            Step::new("Third", "fetch_c", ""),
        ];

        let outcome = ExecutionEngine::new()
            .execute(&plan, &registry, ExecutionContext::new())
            .await;

        assert_eq!(outcome.log.len(), plan.len());
        assert_eq!(outcome.log[0].status, StepStatus::Success);
        assert_eq!(outcome.log[1].status, StepStatus::Failed);
        assert_eq!(outcome.log[1].error.as_deref(), Some("agent not found"));
        assert_eq!(outcome.log[2].status, StepStatus::Success);
        assert!(!outcome.success);
        assert_eq!(outcome.context.get("a"), Some(&json!(1)));
        assert_eq!(outcome.context.get("c"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn worker_errors_are_recorded_and_do_not_abort() {
        let after = StaticWorker::new("After", json!({"done": true}));
        let registry = registry(vec![Arc::new(FailingWorker), after], Vec::new());
        let plan = vec![
            Step::new("Flaky", "fetch_a", ""),
            Step::new("After", "create_b", ""),
        ];

        let outcome = ExecutionEngine::new()
            .execute(&plan, &registry, ExecutionContext::new())
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.log[0].error.as_deref(), Some("upstream returned 502"));
        assert_eq!(outcome.log[1].status, StepStatus::Success);
        assert_eq!(outcome.context.get("done"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn later_steps_overwrite_earlier_keys() {
        let registry = registry(
            vec![
                StaticWorker::new("One", json!({"shared": "one", "only_one": 1})),
                StaticWorker::new("Two", json!({"shared": "two"})),
            ],
            Vec::new(),
        );
        let plan = vec![Step::new("One", "fetch_x", ""), Step::new("Two", "fetch_y", "")];
        let mut initial = ExecutionContext::new();
        initial.insert("shared", json!("initial"));

        let outcome = ExecutionEngine::new().execute(&plan, &registry, initial).await;
        assert!(outcome.success);
        assert_eq!(outcome.context.str_value("shared"), Some("two"));
        assert_eq!(outcome.context.get("only_one"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn undeclared_capability_fails_when_manifest_is_known() {
        let registry = registry(
            vec![StaticWorker::new("GitHubExecutor", json!({}))],
            vec![manifest("GitHubExecutor", &["list_github_issues"])],
        );
        let plan = vec![Step::new("GitHubExecutor", "delete_github_repo", "")];
        let outcome = ExecutionEngine::new()
            .execute(&plan, &registry, ExecutionContext::new())
            .await;
        assert_eq!(
            outcome.log[0].error.as_deref(),
            Some("capability 'delete_github_repo' not declared by agent 'GitHubExecutor'")
        );
    }

    #[tokio::test]
    async fn adapters_set_action_and_duplicate_filter_runs_after_listing() {
        let jira = StaticWorker::new(
            "JiraCollector",
            json!({"tickets": [{"key": "K-1"}, {"key": "K-2"}]}),
        );
        let github = StaticWorker::new(
            "GitHubExecutor",
            json!({"existing_issues": [{"title": "Implement changes for K-1", "number": 7}]}),
        );
        let registry = registry(vec![jira, github.clone()], Vec::new());
        let plan = vec![
            Step::new("JiraCollector", "fetch_jira_tickets", ""),
            Step::new("GitHubExecutor", "list_github_issues", ""),
            Step::new("GitHubExecutor", "create_github_issues", ""),
        ];

        let outcome = ExecutionEngine::new()
            .execute(&plan, &registry, ExecutionContext::new())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.context.array(keys::PENDING_ITEMS), &[json!({"key": "K-2"})]);
        assert_eq!(outcome.context.str_value(keys::ACTION), Some("create_issues"));
        let seen = github.seen_actions.lock().expect("action log should lock");
        assert_eq!(
            *seen,
            vec![
                Some("list_issues".to_string()),
                Some("create_issues".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn slow_step_times_out_and_run_continues() {
        let registry = registry(
            vec![Arc::new(HangingWorker), StaticWorker::new("After", json!({"x": 1}))],
            Vec::new(),
        );
        let plan = vec![
            Step::new("Hanging", "fetch_forever", ""),
            Step::new("After", "fetch_x", ""),
        ];
        let outcome = ExecutionEngine::new()
            .with_step_timeout(Duration::from_millis(20))
            .execute(&plan, &registry, ExecutionContext::new())
            .await;
        assert_eq!(outcome.log[0].status, StepStatus::Failed);
        assert!(
            outcome.log[0]
                .error
                .as_deref()
                .unwrap_or_default()
                .starts_with("step timed out")
        );
        assert_eq!(outcome.log[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn cancellation_fails_in_flight_and_remaining_steps() {
        let registry = registry(
            vec![Arc::new(HangingWorker), StaticWorker::new("After", json!({"x": 1}))],
            Vec::new(),
        );
        let plan = vec![
            Step::new("Hanging", "fetch_forever", ""),
            Step::new("After", "fetch_x", ""),
        ];
        let cancel = CancellationToken::new();
        let engine = ExecutionEngine::new().with_cancellation(cancel.clone());
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let outcome = engine
            .execute(&plan, &registry, ExecutionContext::new())
            .await;
        trigger.await.expect("cancel task should finish");
        assert_eq!(outcome.log.len(), 2);
        for entry in &outcome.log {
            assert_eq!(entry.status, StepStatus::Failed);
            assert_eq!(entry.error.as_deref(), Some("run cancelled"));
        }
        assert!(!outcome.context.contains("x"));
    }

    #[tokio::test]
    async fn empty_hook_table_leaves_context_untouched() {
        let github = StaticWorker::new("GitHubExecutor", json!({}));
        let registry = registry(vec![github.clone()], Vec::new());
        let plan = vec![Step::new("GitHubExecutor", "list_github_issues", "")];
        ExecutionEngine::new()
            .with_hooks(HookExecutor::empty())
            .execute(&plan, &registry, ExecutionContext::new())
            .await;
        let seen = github.seen_actions.lock().expect("action log should lock");
        assert_eq!(*seen, vec![None]);
    }
}
