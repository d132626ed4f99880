/// Plan synthesis: goal + manifest catalogue + run memory -> ordered steps.
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityKind;
use crate::hooks::HookExecutor;
use crate::manifest::CapabilityManifest;
use crate::memory::MemoryRecord;
use crate::provider::TextModel;
use crate::registry::AgentRegistry;

/// Successful past plans embedded in the prompt as examples.
pub const MAX_FEW_SHOT_PLANS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub agent: String,
    pub capability: String,
    #[serde(default)]
    pub reasoning: String,
}

impl Step {
    pub fn new(agent: &str, capability: &str, reasoning: &str) -> Self {
        Self {
            agent: agent.to_string(),
            capability: capability.to_string(),
            reasoning: reasoning.to_string(),
        }
    }

    pub fn kind(&self) -> CapabilityKind {
        CapabilityKind::classify(&self.capability)
    }
}

/// Ordered steps; data only flows forward.
pub type Plan = Vec<Step>;

pub fn fallback_plan() -> Plan {
    vec![
        Step::new("JiraCollector", "fetch_jira_tickets", "Get new work"),
        Step::new("GitHubExecutor", "list_github_issues", "Check existing work"),
        Step::new("DesignAnalyzer", "analyze_design_impact", "Analyze design"),
        Step::new("GitHubExecutor", "create_github_issues", "Create tasks"),
    ]
}

// ---------------------------------------------------------------------------
// Prompt and response handling
// ---------------------------------------------------------------------------

/// Strip a surrounding markdown code fence (with optional language tag).
/// Unfenced input is returned trimmed, so stripping twice is a no-op.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // The language tag may run straight into the payload (```json[...]```).
    let body = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    body.trim_end().trim_end_matches("```").trim()
}

pub fn parse_plan(text: &str) -> Result<Plan> {
    let payload = strip_code_fence(text);
    let plan = serde_json::from_str::<Plan>(payload)
        .context("model output is not a JSON array of plan steps")?;
    if plan.is_empty() {
        return Err(anyhow::anyhow!("model returned an empty plan"));
    }
    if let Some(index) = plan
        .iter()
        .position(|step| step.agent.trim().is_empty() || step.capability.trim().is_empty())
    {
        return Err(anyhow::anyhow!(
            "plan step {} is missing an agent or capability",
            index + 1
        ));
    }
    Ok(plan)
}

/// Plans of successful runs, most recent first.
pub fn successful_plans(memory: &[MemoryRecord], limit: usize) -> Vec<&Plan> {
    memory
        .iter()
        .rev()
        .filter(|record| record.success)
        .map(|record| &record.plan)
        .take(limit)
        .collect()
}

pub fn build_planning_prompt(
    goal: &str,
    manifests: &[CapabilityManifest],
    memory: &[MemoryRecord],
) -> String {
    let catalogue = serde_json::to_string_pretty(manifests).unwrap_or_else(|_| "[]".to_string());
    let examples = successful_plans(memory, MAX_FEW_SHOT_PLANS);
    let memory_section = if examples.is_empty() {
        String::new()
    } else {
        format!(
            "Here are examples of successful plans from the past:\n{}\n\n",
            serde_json::to_string_pretty(&examples).unwrap_or_else(|_| "[]".to_string())
        )
    };

    format!(
        "You are an autonomous orchestrator.\n\
         Goal: {goal}\n\n\
         Available Agents and Capabilities:\n{catalogue}\n\n\
         {memory_section}\
         Create a JSON execution plan. The plan should be a list of steps.\n\
         Each step must have:\n\
         - \"agent\": Name of the agent\n\
         - \"capability\": The capability to use\n\
         - \"reasoning\": Brief reason for this step\n\n\
         Order the steps logically to achieve the goal efficiently.\n\
         IMPORTANT: To avoid duplicates, we must list existing issues BEFORE creating new ones.\n\n\
         Return ONLY the JSON list."
    )
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedPlan {
    pub steps: Plan,
    pub source: PlanSource,
    pub fallback_reason: Option<String>,
}

pub struct PlanSynthesizer {
    model: Option<Arc<dyn TextModel>>,
    timeout: Duration,
}

impl PlanSynthesizer {
    pub fn new(model: Option<Arc<dyn TextModel>>) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().map(|model| model.model_name())
    }

    /// Never fails: any model or parse error yields the fallback plan.
    pub async fn generate_plan(
        &self,
        goal: &str,
        manifests: &[CapabilityManifest],
        memory: &[MemoryRecord],
    ) -> SynthesizedPlan {
        match self.plan_with_model(goal, manifests, memory).await {
            Ok(steps) => SynthesizedPlan {
                steps,
                source: PlanSource::Model,
                fallback_reason: None,
            },
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::warn!(error = %reason, "planning failed, falling back to built-in plan");
                SynthesizedPlan {
                    steps: fallback_plan(),
                    source: PlanSource::Fallback,
                    fallback_reason: Some(reason),
                }
            }
        }
    }

    async fn plan_with_model(
        &self,
        goal: &str,
        manifests: &[CapabilityManifest],
        memory: &[MemoryRecord],
    ) -> Result<Plan> {
        let model = self
            .model
            .as_ref()
            .context("no text model configured for planning")?;
        let prompt = build_planning_prompt(goal, manifests, memory);
        tracing::debug!(model = model.model_name(), chars = prompt.len(), "requesting plan");
        let text = tokio::time::timeout(self.timeout, model.generate(&prompt))
            .await
            .map_err(|_| {
                anyhow::anyhow!("plan request timed out after {}s", self.timeout.as_secs())
            })??;
        tracing::debug!(response = %text, "model plan response");
        parse_plan(&text)
    }
}

// ---------------------------------------------------------------------------
// Plan validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanIssue {
    UnknownAgent {
        index: usize,
        agent: String,
    },
    UndeclaredCapability {
        index: usize,
        agent: String,
        capability: String,
    },
    MissingInput {
        index: usize,
        agent: String,
        input: String,
    },
}

impl fmt::Display for PlanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanIssue::UnknownAgent { index, agent } => {
                write!(f, "step {}: agent '{agent}' is not registered", index + 1)
            }
            PlanIssue::UndeclaredCapability {
                index,
                agent,
                capability,
            } => write!(
                f,
                "step {}: agent '{agent}' does not declare capability '{capability}'",
                index + 1
            ),
            PlanIssue::MissingInput {
                index,
                agent,
                input,
            } => write!(
                f,
                "step {}: agent '{agent}' reads '{input}' before any step produces it",
                index + 1
            ),
        }
    }
}

/// Check agent references, declared capabilities and the declared data flow.
/// Issues are advisory: the engine still runs the plan and fails offending
/// steps at execution time.
pub fn validate_plan<'a>(
    plan: &[Step],
    registry: &AgentRegistry,
    hooks: &HookExecutor,
    initial_keys: impl IntoIterator<Item = &'a str>,
) -> Vec<PlanIssue> {
    let mut available = initial_keys
        .into_iter()
        .map(str::to_string)
        .collect::<BTreeSet<String>>();
    let mut issues = Vec::new();

    for (index, step) in plan.iter().enumerate() {
        if registry.get_agent(&step.agent).is_none() {
            issues.push(PlanIssue::UnknownAgent {
                index,
                agent: step.agent.clone(),
            });
        }
        let Some(manifest) = registry.manifest(&step.agent) else {
            continue;
        };
        if !manifest.declares(&step.capability) {
            issues.push(PlanIssue::UndeclaredCapability {
                index,
                agent: step.agent.clone(),
                capability: step.capability.clone(),
            });
        }

        available.extend(hooks.provided_keys(step.kind()).map(str::to_string));
        for input in manifest.inputs_for(&step.capability) {
            if !available.contains(input) {
                issues.push(PlanIssue::MissingInput {
                    index,
                    agent: step.agent.clone(),
                    input: input.clone(),
                });
            }
        }
        available.extend(manifest.outputs.iter().cloned());
    }
    issues
}
