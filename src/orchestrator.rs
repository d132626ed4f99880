/// Orchestrator: registry -> memory -> plan -> validate -> execute -> remember.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::engine::{ExecutionEngine, ExecutionLogEntry, StepStatus};
use crate::memory::{MemoryRecord, MemoryStore};
use crate::planner::{
    Plan, PlanIssue, PlanSource, PlanSynthesizer, Step, SynthesizedPlan, validate_plan,
};
use crate::provider::{TextModel, resolve_model};
use crate::registry::AgentRegistry;
use crate::telemetry::TelemetrySink;
use crate::workers::{Worker, builtin_workers};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub goal: String,
    pub plan: Plan,
    pub plan_source: PlanSource,
    pub context: ExecutionContext,
    pub log: Vec<ExecutionLogEntry>,
    pub success: bool,
}

impl RunReport {
    pub fn format_summary(&self) -> String {
        let mut lines = vec![
            format!("Goal: {}", self.goal),
            format!(
                "Plan ({} steps, source={}):",
                self.plan.len(),
                match self.plan_source {
                    PlanSource::Model => "model",
                    PlanSource::Fallback => "fallback",
                }
            ),
        ];
        for (index, entry) in self.log.iter().enumerate() {
            let status = match entry.status {
                StepStatus::Success => "ok".to_string(),
                StepStatus::Failed => {
                    format!("failed: {}", entry.error.as_deref().unwrap_or("unknown error"))
                }
            };
            lines.push(format!(
                "  {}. {}.{} [{status}]",
                index + 1,
                entry.step.agent,
                entry.step.capability
            ));
        }
        let mut keys = self.context.keys().collect::<Vec<_>>();
        keys.sort_unstable();
        lines.push(format!("Context keys: {}", keys.join(", ")));
        lines.push(format!(
            "Result: {}",
            if self.success { "success" } else { "degraded" }
        ));
        lines.join("\n")
    }
}

pub struct Orchestrator {
    registry: AgentRegistry,
    synthesizer: PlanSynthesizer,
    memory: MemoryStore,
    engine: ExecutionEngine,
    telemetry: TelemetrySink,
}

impl Orchestrator {
    pub fn new(
        registry: AgentRegistry,
        synthesizer: PlanSynthesizer,
        memory: MemoryStore,
        engine: ExecutionEngine,
        telemetry: TelemetrySink,
    ) -> Self {
        Self {
            registry,
            synthesizer,
            memory,
            engine,
            telemetry,
        }
    }

    /// Wire the built-in workers and the configured model. A model that
    /// cannot be resolved leaves planning on the fallback plan.
    pub fn from_config(cfg: &RuntimeConfig, command: &str, cancel: CancellationToken) -> Result<Self> {
        let model = match resolve_model(cfg) {
            Ok((model, provider, name)) => {
                tracing::info!(provider = ?provider, model = %name, "text model resolved");
                Some(model)
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "no text model available, planning will use the fallback plan");
                None
            }
        };
        Self::with_workers(cfg, model.clone(), builtin_workers(cfg, model), command, cancel)
    }

    pub fn with_workers(
        cfg: &RuntimeConfig,
        model: Option<Arc<dyn TextModel>>,
        workers: Vec<Arc<dyn Worker>>,
        command: &str,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let registry = AgentRegistry::load(Path::new(&cfg.manifests_dir), workers)?;
        let telemetry = TelemetrySink::new(cfg, command.to_string());
        let synthesizer = PlanSynthesizer::new(model)
            .with_timeout(Duration::from_secs(cfg.planner_timeout_secs));
        let engine = ExecutionEngine::new()
            .with_step_timeout(Duration::from_secs(cfg.step_timeout_secs))
            .with_cancellation(cancel);
        Ok(Self::new(
            registry,
            synthesizer,
            MemoryStore::new(&cfg.memory_path),
            engine,
            telemetry,
        ))
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub async fn plan(&self, goal: &str) -> SynthesizedPlan {
        let memory = self.memory.load();
        self.synthesizer
            .generate_plan(goal, self.registry.get_all_manifests(), &memory)
            .await
    }

    pub fn validate<'a>(
        &self,
        plan: &[Step],
        initial_keys: impl IntoIterator<Item = &'a str>,
    ) -> Vec<PlanIssue> {
        validate_plan(plan, &self.registry, self.engine.hooks(), initial_keys)
    }

    /// Never fails: planning, step and persistence problems surface through
    /// the report's log and success flag.
    pub async fn run(&self, goal: &str, initial: ExecutionContext) -> RunReport {
        let telemetry = self.telemetry.for_new_run();
        telemetry.emit("run.started", json!({"goal": goal}));

        let memory = self.memory.load();
        tracing::info!(goal, history = memory.len(), "starting orchestration run");
        let planned = self
            .synthesizer
            .generate_plan(goal, self.registry.get_all_manifests(), &memory)
            .await;
        match &planned.fallback_reason {
            Some(reason) => telemetry.emit("plan.fallback", json!({"reason": reason})),
            None => telemetry.emit("plan.generated", json!({"steps": planned.steps.len()})),
        }

        let issues = self.validate(&planned.steps, initial.keys());
        for issue in &issues {
            tracing::warn!(issue = %issue, "plan validation warning");
            telemetry.emit("plan.validation_warning", json!({"issue": issue.to_string()}));
        }

        let outcome = self
            .engine
            .execute_with_telemetry(&planned.steps, &self.registry, initial, &telemetry)
            .await;

        let record = MemoryRecord::new(goal, planned.steps.clone(), outcome.success, outcome.log.clone());
        if !self.memory.save(record) {
            telemetry.emit(
                "memory.save_failed",
                json!({"path": self.memory.path().display().to_string()}),
            );
        }

        let failed = outcome
            .log
            .iter()
            .filter(|entry| entry.status == StepStatus::Failed)
            .count();
        telemetry.emit(
            "run.completed",
            json!({"success": outcome.success, "steps": outcome.log.len(), "failed_steps": failed}),
        );
        tracing::info!(success = outcome.success, failed_steps = failed, "orchestration run finished");

        RunReport {
            goal: goal.to_string(),
            plan: planned.steps,
            plan_source: planned.source,
            context: outcome.context,
            log: outcome.log,
            success: outcome.success,
        }
    }
}

/// Entry point for callers that only need the final context.
pub async fn run(cfg: &RuntimeConfig, goal: Option<&str>) -> Result<ExecutionContext> {
    let orchestrator = Orchestrator::from_config(cfg, "run", CancellationToken::new())?;
    let goal = goal.unwrap_or(&cfg.goal);
    Ok(orchestrator.run(goal, ExecutionContext::new()).await.context)
}

pub async fn run_goal_command(
    cfg: &RuntimeConfig,
    goal: Option<String>,
    json_output: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let orchestrator = Orchestrator::from_config(cfg, "run", cancel)?;
    let goal = goal.unwrap_or_else(|| cfg.goal.clone());
    let report = orchestrator.run(&goal, ExecutionContext::new()).await;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.format_summary());
    }
    Ok(())
}

pub async fn run_plan_command(cfg: &RuntimeConfig, goal: Option<String>) -> Result<()> {
    let orchestrator = Orchestrator::from_config(cfg, "plan", CancellationToken::new())?;
    let goal = goal.unwrap_or_else(|| cfg.goal.clone());
    let planned = orchestrator.plan(&goal).await;
    if let Some(reason) = &planned.fallback_reason {
        println!("Using fallback plan ({reason})");
    }
    println!("{}", serde_json::to_string_pretty(&planned.steps)?);

    for issue in orchestrator.validate(&planned.steps, std::iter::empty()) {
        println!("warning: {issue}");
    }
    Ok(())
}
