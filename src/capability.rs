use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wildcard pattern matching (simple glob: `*` matches any char sequence)
// ---------------------------------------------------------------------------

/// Match a capability token against a pattern that may contain `*` wildcards.
/// Examples: `list_*` matches `list_github_issues`,
///           `*_issues` matches `create_github_issues`.
pub fn matches_wildcard(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut remaining = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !remaining.starts_with(part) {
                return false;
            }
            remaining = &remaining[part.len()..];
        } else if i == parts.len() - 1 {
            return remaining.ends_with(part);
        } else {
            match remaining.find(part) {
                Some(pos) => remaining = &remaining[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Capability taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    FetchPendingItems,
    ListExistingArtifacts,
    AnalyzeImpact,
    CreateArtifacts,
    Other,
}

/// Classification table; the first matching pattern wins.
pub const CAPABILITY_PATTERNS: &[(&str, CapabilityKind)] = &[
    ("fetch_*", CapabilityKind::FetchPendingItems),
    ("list_*", CapabilityKind::ListExistingArtifacts),
    ("analyze_*", CapabilityKind::AnalyzeImpact),
    ("create_*", CapabilityKind::CreateArtifacts),
];

impl CapabilityKind {
    pub fn classify(capability: &str) -> Self {
        let token = capability.trim().to_ascii_lowercase();
        CAPABILITY_PATTERNS
            .iter()
            .find(|(pattern, _)| matches_wildcard(pattern, &token))
            .map(|(_, kind)| *kind)
            .unwrap_or(CapabilityKind::Other)
    }

    pub fn label(self) -> &'static str {
        match self {
            CapabilityKind::FetchPendingItems => "fetch_pending_items",
            CapabilityKind::ListExistingArtifacts => "list_existing_artifacts",
            CapabilityKind::AnalyzeImpact => "analyze_impact",
            CapabilityKind::CreateArtifacts => "create_artifacts",
            CapabilityKind::Other => "other",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_prefix_suffix_and_infix() {
        assert!(matches_wildcard("list_*", "list_github_issues"));
        assert!(matches_wildcard("*_issues", "create_github_issues"));
        assert!(matches_wildcard("create_*_issues", "create_github_issues"));
        assert!(!matches_wildcard("list_*", "fetch_jira_tickets"));
        assert!(matches_wildcard("exact", "exact"));
        assert!(!matches_wildcard("exact", "exactly"));
    }

    #[test]
    fn classify_maps_builtin_capabilities() {
        assert_eq!(
            CapabilityKind::classify("fetch_jira_tickets"),
            CapabilityKind::FetchPendingItems
        );
        assert_eq!(
            CapabilityKind::classify("list_github_issues"),
            CapabilityKind::ListExistingArtifacts
        );
        assert_eq!(
            CapabilityKind::classify("analyze_design_impact"),
            CapabilityKind::AnalyzeImpact
        );
        assert_eq!(
            CapabilityKind::classify("Create_GitHub_Issues"),
            CapabilityKind::CreateArtifacts
        );
        assert_eq!(
            CapabilityKind::classify("summarize_release"),
            CapabilityKind::Other
        );
    }
}
