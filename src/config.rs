use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::*;

pub const DEFAULT_GOAL: &str = "Fetch Jira tickets, check against existing GitHub issues to avoid duplicates, analyze design impact for new tickets, and create GitHub issues.";
pub const DEFAULT_JIRA_JQL: &str = "status in ('To Do', 'In Progress') ORDER BY created DESC";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub goal: String,
    pub manifests_dir: String,
    pub memory_path: String,
    pub step_timeout_secs: u64,
    pub planner_timeout_secs: u64,
    pub jira_base_url: Option<String>,
    pub jira_jql: String,
    pub github_repo: Option<String>,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub goal: Option<String>,
    pub manifests_dir: Option<String>,
    pub memory_path: Option<String>,
    pub step_timeout_secs: Option<u64>,
    pub planner_timeout_secs: Option<u64>,
    pub jira_base_url: Option<String>,
    pub jira_jql: Option<String>,
    pub github_repo: Option<String>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    parse_profiles(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check provider values and field names.",
            path.display()
        )
    })
}

pub fn parse_profiles(content: &str) -> Result<ProfilesFile> {
    Ok(toml::from_str::<ProfilesFile>(content)?)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let provider = if cli.provider != Provider::Auto {
        cli.provider
    } else {
        profile.provider.unwrap_or(Provider::Auto)
    };

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        provider,
        model: non_empty(cli.model.clone().or(profile.model)),
        goal: non_empty(profile.goal).unwrap_or_else(|| DEFAULT_GOAL.to_string()),
        manifests_dir: cli
            .manifests_dir
            .clone()
            .or(profile.manifests_dir)
            .unwrap_or_else(|| "manifests".to_string()),
        memory_path: cli
            .memory_path
            .clone()
            .or(profile.memory_path)
            .unwrap_or_else(|| ".changeflow/orchestrator_memory.json".to_string()),
        step_timeout_secs: cli
            .step_timeout_secs
            .or(profile.step_timeout_secs)
            .unwrap_or(300)
            .max(1),
        planner_timeout_secs: cli
            .planner_timeout_secs
            .or(profile.planner_timeout_secs)
            .unwrap_or(60)
            .max(1),
        jira_base_url: non_empty(cli.jira_base_url.clone().or(profile.jira_base_url))
            .map(|url| url.trim_end_matches('/').to_string()),
        jira_jql: non_empty(cli.jira_jql.clone().or(profile.jira_jql))
            .unwrap_or_else(|| DEFAULT_JIRA_JQL.to_string()),
        github_repo: non_empty(cli.github_repo.clone().or(profile.github_repo)),
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| ".changeflow/telemetry/events.jsonl".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["changeflow"];
        argv.extend_from_slice(args);
        argv.push("doctor");
        Cli::try_parse_from(argv).expect("cli should parse")
    }

    #[test]
    fn defaults_apply_without_profile_file() {
        let cfg = resolve_runtime_config(&cli(&[]), &ProfilesFile::default())
            .expect("config should resolve");
        assert_eq!(cfg.profile, "default");
        assert_eq!(cfg.goal, DEFAULT_GOAL);
        assert_eq!(cfg.manifests_dir, "manifests");
        assert_eq!(cfg.memory_path, ".changeflow/orchestrator_memory.json");
        assert_eq!(cfg.step_timeout_secs, 300);
        assert_eq!(cfg.jira_jql, DEFAULT_JIRA_JQL);
        assert!(cfg.github_repo.is_none());
    }

    #[test]
    fn cli_overrides_profile_and_profile_overrides_defaults() {
        let profiles = parse_profiles(
            r#"
[profiles.ci]
provider = "ollama"
model = "llama3.1"
github_repo = "acme/platform"
step_timeout_secs = 0
jira_base_url = "https://acme.atlassian.net/"
"#,
        )
        .expect("profiles should parse");

        let cfg = resolve_runtime_config(
            &cli(&["--profile", "ci", "--github-repo", "acme/other"]),
            &profiles,
        )
        .expect("config should resolve");
        assert_eq!(cfg.provider, Provider::Ollama);
        assert_eq!(cfg.model.as_deref(), Some("llama3.1"));
        assert_eq!(cfg.github_repo.as_deref(), Some("acme/other"));
        assert_eq!(cfg.step_timeout_secs, 1);
        assert_eq!(
            cfg.jira_base_url.as_deref(),
            Some("https://acme.atlassian.net")
        );
    }

    #[test]
    fn unknown_profile_lists_available_names() {
        let profiles = parse_profiles("[profiles.ci]\n[profiles.dev]\n").expect("should parse");
        let err = resolve_runtime_config(&cli(&["--profile", "prod"]), &profiles)
            .expect_err("unknown profile should fail");
        assert!(err.to_string().contains("Available profiles: ci, dev"));
    }

    #[test]
    fn unknown_profile_fields_are_rejected() {
        assert!(parse_profiles("[profiles.ci]\nsession_backend = \"sqlite\"\n").is_err());
    }
}
