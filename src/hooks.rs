use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityKind;
use crate::context::{ExecutionContext, keys};
use crate::dedup::filter_context;

// ---------------------------------------------------------------------------
// Hook lifecycle points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    PreStep,
    PostStep,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPoint::PreStep => write!(f, "pre_step"),
            HookPoint::PostStep => write!(f, "post_step"),
        }
    }
}

// ---------------------------------------------------------------------------
// Step hooks
// ---------------------------------------------------------------------------

/// Context transform; returns whether it changed anything.
pub type ContextTransform = fn(&mut ExecutionContext) -> bool;

#[derive(Debug, Clone, Copy)]
pub struct StepHook {
    pub name: &'static str,
    pub point: HookPoint,
    pub kind: CapabilityKind,
    /// Keys this hook may write, visible to plan validation.
    pub provides: &'static [&'static str],
    pub transform: ContextTransform,
}

pub const BUILTIN_STEP_HOOKS: &[StepHook] = &[
    StepHook {
        name: "list_action",
        point: HookPoint::PreStep,
        kind: CapabilityKind::ListExistingArtifacts,
        provides: &[keys::ACTION],
        transform: set_list_action,
    },
    StepHook {
        name: "create_action",
        point: HookPoint::PreStep,
        kind: CapabilityKind::CreateArtifacts,
        provides: &[keys::ACTION],
        transform: set_create_action,
    },
    StepHook {
        name: "impact_alias",
        point: HookPoint::PreStep,
        kind: CapabilityKind::CreateArtifacts,
        provides: &[keys::IMPACT_ANALYSIS],
        transform: alias_design_analysis,
    },
    StepHook {
        name: "duplicate_filter",
        point: HookPoint::PostStep,
        kind: CapabilityKind::ListExistingArtifacts,
        provides: &[keys::PENDING_ITEMS],
        transform: apply_duplicate_filter,
    },
];

fn set_list_action(context: &mut ExecutionContext) -> bool {
    context.insert(keys::ACTION, "list_issues".into());
    true
}

fn set_create_action(context: &mut ExecutionContext) -> bool {
    context.insert(keys::ACTION, "create_issues".into());
    true
}

fn alias_design_analysis(context: &mut ExecutionContext) -> bool {
    let Some(analysis) = context.get(keys::DESIGN_ANALYSIS).cloned() else {
        return false;
    };
    context.insert(keys::IMPACT_ANALYSIS, analysis);
    true
}

fn apply_duplicate_filter(context: &mut ExecutionContext) -> bool {
    filter_context(context).is_some()
}

// ---------------------------------------------------------------------------
// Hook executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HookExecutor {
    hooks: Vec<StepHook>,
}

impl Default for HookExecutor {
    fn default() -> Self {
        Self::new(BUILTIN_STEP_HOOKS.to_vec())
    }
}

impl HookExecutor {
    pub fn new(hooks: Vec<StepHook>) -> Self {
        Self { hooks }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn hooks(&self) -> &[StepHook] {
        &self.hooks
    }

    /// Keys the pre-step hooks for `kind` can make available.
    pub fn provided_keys(&self, kind: CapabilityKind) -> impl Iterator<Item = &'static str> + '_ {
        self.hooks
            .iter()
            .filter(move |hook| hook.point == HookPoint::PreStep && hook.kind == kind)
            .flat_map(|hook| hook.provides.iter().copied())
    }

    /// Run all hooks registered for `point` and `kind`, in table order.
    /// Returns the names of the hooks that changed the context.
    pub fn run(
        &self,
        point: HookPoint,
        kind: CapabilityKind,
        context: &mut ExecutionContext,
    ) -> Vec<&'static str> {
        let mut applied = Vec::new();
        for hook in self
            .hooks
            .iter()
            .filter(|hook| hook.point == point && hook.kind == kind)
        {
            if (hook.transform)(context) {
                tracing::debug!(hook = hook.name, point = %point, kind = %kind, "step hook applied");
                applied.push(hook.name);
            }
        }
        applied
    }
}
