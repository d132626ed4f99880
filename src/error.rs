use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Config,
    Planning,
    Worker,
    Persistence,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Config => "CONFIG",
            ErrorCategory::Planning => "PLANNING",
            ErrorCategory::Worker => "WORKER",
            ErrorCategory::Persistence => "PERSISTENCE",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Provider => {
                "Set provider credentials (for example GOOGLE_API_KEY) or run with --provider ollama."
            }
            ErrorCategory::Config => {
                "Check --config-path and the [profiles.<name>] tables in the profile file."
            }
            ErrorCategory::Planning => {
                "Planning falls back to the built-in plan; retry with RUST_LOG=debug to see the model output."
            }
            ErrorCategory::Worker => {
                "Check worker credentials (ATLASSIAN_*, GH_TOKEN) and the manifests directory."
            }
            ErrorCategory::Persistence => {
                "Check that the memory and telemetry paths are writable."
            }
            ErrorCategory::Input => "Run changeflow --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api_key")
        || msg.contains("no provider could be auto-detected")
        || msg.contains("provider")
    {
        return ErrorCategory::Provider;
    }

    if msg.contains("profile") || msg.contains("config") {
        return ErrorCategory::Config;
    }

    if msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("cannot be empty")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("plan") {
        return ErrorCategory::Planning;
    }

    if msg.contains("manifest") || msg.contains("worker") || msg.contains("gh ") {
        return ErrorCategory::Worker;
    }

    if msg.contains("memory") || msg.contains("telemetry") {
        return ErrorCategory::Persistence;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!("[{}] {:#}\nHint: {}", category.code(), err, category.hint())
}

// ---------------------------------------------------------------------------
// Run failures
// ---------------------------------------------------------------------------

/// Failures contained inside a single run. None of these escape `run`; they
/// surface only through the per-step log and the aggregate success flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    Planning { reason: String },
    AgentNotFound { agent: String },
    CapabilityNotDeclared { agent: String, capability: String },
    StepFailed { message: String },
    StepTimedOut { secs: u64 },
    Cancelled,
    Persistence { reason: String },
}

impl RunFailure {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RunFailure::Planning { .. } => ErrorCategory::Planning,
            RunFailure::AgentNotFound { .. }
            | RunFailure::CapabilityNotDeclared { .. }
            | RunFailure::StepFailed { .. }
            | RunFailure::StepTimedOut { .. }
            | RunFailure::Cancelled => ErrorCategory::Worker,
            RunFailure::Persistence { .. } => ErrorCategory::Persistence,
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::Planning { reason } => write!(f, "planning failed: {reason}"),
            RunFailure::AgentNotFound { .. } => write!(f, "agent not found"),
            RunFailure::CapabilityNotDeclared { agent, capability } => {
                write!(f, "capability '{capability}' not declared by agent '{agent}'")
            }
            RunFailure::StepFailed { message } => write!(f, "{message}"),
            RunFailure::StepTimedOut { secs } => write!(f, "step timed out after {secs}s"),
            RunFailure::Cancelled => write!(f, "run cancelled"),
            RunFailure::Persistence { reason } => write!(f, "memory persistence failed: {reason}"),
        }
    }
}

impl std::error::Error for RunFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_routes_common_messages() {
        let provider = anyhow::anyhow!("GOOGLE_API_KEY is required for Gemini provider");
        assert_eq!(categorize_error(&provider), ErrorCategory::Provider);

        let profile = anyhow::anyhow!("profile 'ci' not found in '.changeflow/config.toml'");
        assert_eq!(categorize_error(&profile), ErrorCategory::Config);

        let memory = anyhow::anyhow!("failed to write memory file");
        assert_eq!(categorize_error(&memory), ErrorCategory::Persistence);

        let other = anyhow::anyhow!("something odd");
        assert_eq!(categorize_error(&other), ErrorCategory::Internal);
    }

    #[test]
    fn format_cli_error_includes_code_and_hint() {
        let err = anyhow::anyhow!("failed to read manifests directory 'manifests'");
        let rendered = format_cli_error(&err);
        assert!(rendered.starts_with("[WORKER]"));
        assert!(rendered.contains("Hint:"));
    }

    #[test]
    fn run_failure_messages_are_stable() {
        assert_eq!(
            RunFailure::AgentNotFound {
                agent: "Ghost".to_string()
            }
            .to_string(),
            "agent not found"
        );
        assert_eq!(
            RunFailure::StepTimedOut { secs: 5 }.to_string(),
            "step timed out after 5s"
        );
        assert_eq!(RunFailure::Cancelled.category(), ErrorCategory::Worker);
    }
}
