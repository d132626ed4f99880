/// Duplicate filter: drops pending tickets that already have a tracking issue.
use serde_json::Value;

use crate::context::{ExecutionContext, keys};

pub const ARTIFACT_TITLE_PREFIX: &str = "Implement changes for ";

/// Title an issue gets when it is filed for the item `identifier`.
pub fn artifact_title(identifier: &str) -> String {
    format!("{ARTIFACT_TITLE_PREFIX}{identifier}")
}

/// Stable identifier of a pending item: `key` (tracker tickets) or `id`.
pub fn item_identifier(item: &Value) -> Option<&str> {
    ["key", "id"]
        .iter()
        .filter_map(|field| item.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    pub retained: Vec<Value>,
    pub dropped: Vec<String>,
}

/// Keep pending items, in order, whose identifier no existing title mentions.
/// Items without an identifier are always kept.
pub fn filter_duplicates(pending: &[Value], existing: &[Value]) -> DedupOutcome {
    let existing_titles = existing
        .iter()
        .map(|artifact| artifact.get("title").and_then(Value::as_str).unwrap_or(""))
        .collect::<Vec<&str>>();

    let mut outcome = DedupOutcome::default();
    for item in pending {
        let Some(identifier) = item_identifier(item) else {
            outcome.retained.push(item.clone());
            continue;
        };

        let duplicate = existing_titles
            .iter()
            .any(|title| title.contains(identifier));
        if duplicate {
            tracing::info!(item = %identifier, "skipping item, tracking issue already exists");
            outcome.dropped.push(identifier.to_string());
        } else {
            outcome.retained.push(item.clone());
        }
    }
    outcome
}

/// Replace the pending-items key with its de-duplicated form.
/// Returns `None`, leaving the context untouched, unless both keys hold arrays.
pub fn filter_context(context: &mut ExecutionContext) -> Option<DedupOutcome> {
    let pending = context.get(keys::PENDING_ITEMS)?.as_array()?;
    let existing = context.get(keys::EXISTING_ARTIFACTS)?.as_array()?;
    tracing::info!(
        pending = pending.len(),
        existing = existing.len(),
        "filtering pending items against existing issues"
    );
    let outcome = filter_duplicates(pending, existing);
    context.insert(
        keys::PENDING_ITEMS,
        Value::Array(outcome.retained.clone()),
    );
    tracing::info!(
        retained = outcome.retained.len(),
        dropped = outcome.dropped.len(),
        "duplicate filter applied"
    );
    Some(outcome)
}
