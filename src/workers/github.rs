use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::Worker;
use crate::context::{ContextPatch, ExecutionContext, keys};
use crate::dedup::artifact_title;

const LIST_LIMIT: &str = "200";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubCliOutput {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `gh` with the given arguments.
#[async_trait]
pub trait GhRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<GitHubCliOutput>;
}

pub struct GhCli;

#[async_trait]
impl GhRunner for GhCli {
    async fn run(&self, args: &[String]) -> Result<GitHubCliOutput> {
        let output = tokio::process::Command::new("gh")
            .args(args)
            .output()
            .await
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    anyhow::anyhow!("GitHub CLI 'gh' was not found. Install gh and retry.")
                } else {
                    anyhow::anyhow!("failed to run gh command: {err}")
                }
            })?;

        Ok(GitHubCliOutput {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub fn github_token_present() -> bool {
    ["GH_TOKEN", "GITHUB_TOKEN"].iter().any(|key| {
        std::env::var(key)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
    })
}

pub fn build_list_command(repo: &str) -> Vec<String> {
    [
        "issue", "list", "--repo", repo, "--state", "all", "--limit", LIST_LIMIT, "--json",
        "title,number",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

pub fn build_create_command(repo: &str, title: &str, body: &str) -> Vec<String> {
    [
        "issue", "create", "--repo", repo, "--title", title, "--body", body,
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

pub fn issue_body(ticket: &str, analysis: &str) -> String {
    format!("**Impact Analysis**\n\n{analysis}\n\nRef: {ticket}")
}

/// `gh issue list --json` output reduced to `{title, number}` records.
pub fn parse_issue_list(stdout: &str) -> Result<Vec<Value>> {
    let issues = serde_json::from_str::<Vec<Value>>(stdout.trim())
        .context("gh issue list did not return a JSON array")?;
    Ok(issues
        .iter()
        .map(|issue| {
            json!({
                "title": issue.get("title").and_then(Value::as_str).unwrap_or_default(),
                "number": issue.get("number").cloned().unwrap_or(Value::Null),
            })
        })
        .collect())
}

/// Lists existing issues or files one issue per analysed ticket, selected by
/// the context `action` (defaults to creating).
pub struct GitHubExecutor {
    repo: Option<String>,
    gh: Arc<dyn GhRunner>,
}

impl GitHubExecutor {
    pub fn new(repo: Option<String>, gh: Arc<dyn GhRunner>) -> Self {
        Self { repo, gh }
    }

    fn repo(&self) -> Result<&str> {
        self.repo
            .as_deref()
            .context("github repository is not configured (--github-repo owner/name)")
    }

    async fn list_issues(&self, repo: &str) -> Result<ContextPatch> {
        tracing::info!(repo, "listing github issues");
        let output = self.gh.run(&build_list_command(repo)).await?;
        if !output.success {
            return Err(anyhow::anyhow!(
                "gh issue list failed (exit {}): {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }
        let existing = parse_issue_list(&output.stdout)?;
        tracing::info!(repo, count = existing.len(), "github issues listed");

        let mut patch = ContextPatch::new();
        patch.insert(keys::EXISTING_ARTIFACTS.to_string(), Value::Array(existing));
        Ok(patch)
    }

    /// Per-item failures are reported in `created_issues`, not raised.
    async fn create_issues(&self, repo: &str, context: &ExecutionContext) -> Result<ContextPatch> {
        let analyses = context.array(keys::IMPACT_ANALYSIS);
        tracing::info!(repo, count = analyses.len(), "creating github issues");

        let mut created = Vec::with_capacity(analyses.len());
        for item in analyses {
            let ticket = item
                .get("ticket")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let analysis = item
                .get("analysis")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let command = build_create_command(repo, &artifact_title(ticket), &issue_body(ticket, analysis));
            let message = match self.gh.run(&command).await {
                Ok(output) if output.success => format!("Created issue for {ticket} in {repo}"),
                Ok(output) => {
                    tracing::warn!(ticket, exit_code = output.exit_code, stderr = %output.stderr.trim(), "issue creation failed");
                    format!("Failed to create issue for {ticket}")
                }
                Err(err) => {
                    tracing::warn!(ticket, error = %err, "issue creation failed");
                    format!("Failed to create issue for {ticket}")
                }
            };
            created.push(Value::String(message));
        }

        let mut patch = ContextPatch::new();
        patch.insert(keys::CREATED_ARTIFACTS.to_string(), Value::Array(created));
        Ok(patch)
    }
}

#[async_trait]
impl Worker for GitHubExecutor {
    fn name(&self) -> &str {
        "GitHubExecutor"
    }

    async fn run(&self, context: &ExecutionContext) -> Result<ContextPatch> {
        let repo = self.repo()?;
        match context.str_value(keys::ACTION).unwrap_or("create_issues") {
            "list_issues" => self.list_issues(repo).await,
            "create_issues" => self.create_issues(repo, context).await,
            other => {
                tracing::warn!(action = other, "unknown github action, nothing to do");
                Ok(ContextPatch::new())
            }
        }
    }
}
