use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Auto,
    Gemini,
    Openai,
    Ollama,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum MemoryCommands {
    #[command(about = "Show persisted run history used to bias planning")]
    Show {
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
    #[command(about = "Delete persisted run history (requires --force)")]
    Clear {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize telemetry events from a JSONL stream")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 5000)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  changeflow run\n\
  changeflow run --goal \"Fetch open tickets and file issues for new ones\" --json\n\
  changeflow plan\n\
  changeflow --provider ollama --model llama3.1 run\n\
  changeflow --github-repo acme/platform --jira-base-url https://acme.atlassian.net run\n\
  changeflow manifests\n\
  changeflow memory show --verbose\n\
  changeflow memory clear --force\n\
  changeflow serve --host 127.0.0.1 --port 8788\n\
  changeflow telemetry report --limit 2000\n\
\n\
Credentials are read from the environment: GOOGLE_API_KEY / OPENAI_API_KEY / OLLAMA_HOST\n\
for planning, ATLASSIAN_EMAIL + ATLASSIAN_TOKEN for Jira, GH_TOKEN or `gh auth login` for GitHub.";

#[derive(Debug, Parser)]
#[command(name = "changeflow")]
#[command(about = "Plan and run multi-agent change-management workflows")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "CHANGEFLOW_PROVIDER", value_enum, default_value_t = Provider::Auto)]
    pub provider: Provider,

    #[arg(long, env = "CHANGEFLOW_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "CHANGEFLOW_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "CHANGEFLOW_CONFIG", default_value = ".changeflow/config.toml")]
    pub config_path: String,

    #[arg(long, env = "CHANGEFLOW_MANIFESTS_DIR")]
    pub manifests_dir: Option<String>,

    #[arg(long, env = "CHANGEFLOW_MEMORY_PATH")]
    pub memory_path: Option<String>,

    #[arg(long, env = "CHANGEFLOW_STEP_TIMEOUT_SECS")]
    pub step_timeout_secs: Option<u64>,

    #[arg(long, env = "CHANGEFLOW_PLANNER_TIMEOUT_SECS")]
    pub planner_timeout_secs: Option<u64>,

    #[arg(long, env = "CHANGEFLOW_JIRA_BASE_URL")]
    pub jira_base_url: Option<String>,

    #[arg(long, env = "CHANGEFLOW_JIRA_JQL")]
    pub jira_jql: Option<String>,

    #[arg(long, env = "CHANGEFLOW_GITHUB_REPO")]
    pub github_repo: Option<String>,

    #[arg(long, env = "CHANGEFLOW_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "CHANGEFLOW_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Synthesize a plan for the goal and execute it")]
    Run {
        #[arg(long)]
        goal: Option<String>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    #[command(about = "Synthesize and print a plan without executing it")]
    Plan {
        #[arg(long)]
        goal: Option<String>,
    },
    #[command(about = "List registered agents, their capabilities and data contracts")]
    Manifests,
    #[command(about = "Inspect or clear persisted run history")]
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    #[command(about = "Inspect configured profiles")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Check credentials, manifests and storage paths")]
    Doctor,
    #[command(about = "Telemetry utilities")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
    #[command(about = "Run HTTP server mode exposing health and run endpoints")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8788)]
        port: u16,
    },
}
