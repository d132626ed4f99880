use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::Worker;
use crate::config::RuntimeConfig;
use crate::context::{ContextPatch, ExecutionContext, keys};

const SEARCH_MAX_RESULTS: u32 = 50;
const FIELDS: &str = "summary,description";

/// Collects pending tickets with a JQL search against the Jira REST API.
pub struct JiraCollector {
    base_url: Option<String>,
    jql: String,
}

impl JiraCollector {
    pub fn new(base_url: Option<String>, jql: String) -> Self {
        Self { base_url, jql }
    }

    /// `ATLASSIAN_BASE_URL` fills in when no base URL is configured.
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        let base_url = cfg.jira_base_url.clone().or_else(|| {
            std::env::var("ATLASSIAN_BASE_URL")
                .ok()
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
        });
        Self::new(base_url, cfg.jira_jql.clone())
    }

    pub fn search_url(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .map(|base| format!("{base}/rest/api/2/search"))
    }
}

/// Keep only the fields later steps read: `key`, `fields.summary`,
/// `fields.description`.
pub fn parse_search_response(payload: &Value) -> Result<Vec<Value>> {
    let issues = payload
        .get("issues")
        .and_then(Value::as_array)
        .context("jira search response has no 'issues' array")?;
    Ok(issues
        .iter()
        .filter_map(|issue| {
            let key = issue.get("key").and_then(Value::as_str)?;
            let fields = issue.get("fields");
            let summary = fields
                .and_then(|f| f.get("summary"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let description = fields
                .and_then(|f| f.get("description"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(json!({
                "key": key,
                "fields": {"summary": summary, "description": description},
            }))
        })
        .collect())
}

fn credentials() -> Result<(String, String)> {
    let email = std::env::var("ATLASSIAN_EMAIL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .context("ATLASSIAN_EMAIL is required for the Jira collector")?;
    let token = std::env::var("ATLASSIAN_TOKEN")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .context("ATLASSIAN_TOKEN is required for the Jira collector")?;
    Ok((email, token))
}

#[async_trait]
impl Worker for JiraCollector {
    fn name(&self) -> &str {
        "JiraCollector"
    }

    async fn run(&self, _context: &ExecutionContext) -> Result<ContextPatch> {
        let url = self
            .search_url()
            .context("jira base URL is not configured (--jira-base-url or ATLASSIAN_BASE_URL)")?;
        let (email, token) = credentials()?;
        tracing::info!(jql = %self.jql, "fetching jira tickets");

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client for jira")?;
        let max_results = SEARCH_MAX_RESULTS.to_string();
        let response = client
            .get(&url)
            .basic_auth(email, Some(token))
            .query(&[
                ("jql", self.jql.as_str()),
                ("fields", FIELDS),
                ("maxResults", max_results.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("jira search request to '{url}' failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "jira search returned {status}: {}",
                body.chars().take(300).collect::<String>()
            ));
        }
        let payload = response
            .json::<Value>()
            .await
            .context("jira search returned a non-JSON body")?;
        let tickets = parse_search_response(&payload)?;
        tracing::info!(count = tickets.len(), "jira tickets collected");

        let mut patch = ContextPatch::new();
        patch.insert(keys::PENDING_ITEMS.to_string(), Value::Array(tickets));
        Ok(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_response_keeps_key_summary_and_description() {
        let payload = json!({
            "issues": [
                {"key": "KAN-6", "id": "1", "fields": {"summary": "Add reranker", "description": "Use cross encoder", "priority": {}}},
                {"key": "KAN-7", "fields": {"summary": "Docs", "description": null}},
                {"id": "no-key"}
            ]
        });
        let tickets = parse_search_response(&payload).expect("response should parse");
        assert_eq!(tickets.len(), 2);
        assert_eq!(
            tickets[0],
            json!({"key": "KAN-6", "fields": {"summary": "Add reranker", "description": "Use cross encoder"}})
        );
        assert_eq!(tickets[1]["fields"]["description"], "");
    }

    #[test]
    fn search_response_without_issues_is_an_error() {
        assert!(parse_search_response(&json!({"errorMessages": ["bad jql"]})).is_err());
    }

    #[test]
    fn search_url_requires_a_base_url() {
        assert!(JiraCollector::new(None, "project = KAN".to_string()).search_url().is_none());
        assert_eq!(
            JiraCollector::new(Some("https://acme.atlassian.net".to_string()), String::new())
                .search_url()
                .as_deref(),
            Some("https://acme.atlassian.net/rest/api/2/search")
        );
    }

    #[tokio::test]
    async fn run_without_base_url_fails() {
        let collector = JiraCollector::new(None, "project = KAN".to_string());
        let err = collector
            .run(&ExecutionContext::new())
            .await
            .expect_err("missing base url should fail");
        assert!(err.to_string().contains("jira base URL"));
    }
}
