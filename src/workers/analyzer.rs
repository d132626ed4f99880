use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{GhRunner, Worker, string_at};
use crate::context::{ContextPatch, ExecutionContext, keys};
use crate::dedup::item_identifier;
use crate::planner::strip_code_fence;
use crate::provider::TextModel;

const CONTEXT_MAX_CHARS: usize = 3000;
const README_MAX_CHARS: usize = 1000;
const UNAVAILABLE_CONTEXT: &str =
    "Could not fetch remote code. Assuming standard Python structure.";

/// Repository folders searched for design documents; `""` is the root.
const DESIGN_FOLDERS: [&str; 5] = ["", "docs", "specifications", "design", "architecture"];
const DESIGN_EXTENSIONS: [&str; 2] = [".md", ".puml"];
const MAX_DESIGN_DOCUMENTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisFocus {
    Design,
    Code,
}

impl AnalysisFocus {
    pub fn agent_name(self) -> &'static str {
        match self {
            AnalysisFocus::Design => "DesignAnalyzer",
            AnalysisFocus::Code => "CodeAnalyzer",
        }
    }

    pub fn output_key(self) -> &'static str {
        match self {
            AnalysisFocus::Design => keys::DESIGN_ANALYSIS,
            AnalysisFocus::Code => keys::IMPACT_ANALYSIS,
        }
    }

    pub fn prompt(self, repo: &str, ticket: &Value, repo_context: &str) -> String {
        let key = item_identifier(ticket).unwrap_or("unknown");
        let summary = string_at(ticket, &["fields", "summary"]).unwrap_or_default();
        let description = string_at(ticket, &["fields", "description"]).unwrap_or_default();
        match self {
            AnalysisFocus::Design => format!(
                "Analyze the design impact of this Jira ticket on the codebase {repo}.\n\n\
                 Ticket: {key} - {summary}\n\
                 Description: {description}\n\n\
                 Current Design Context (from README):\n{repo_context}\n\n\
                 Task:\n\
                 1. Identify the current design architecture based on the context.\n\
                 2. List specific components that need changes.\n\
                 3. List specific components that need to be redesigned or created.\n\n\
                 Output Format:\n\
                 **Current Design**: <summary>\n\
                 **Components to Change**: <list>\n\
                 **Components to Redesign/Create**: <list>"
            ),
            AnalysisFocus::Code => format!(
                "Analyze the impact of this Jira ticket on the codebase {repo}.\n\n\
                 Ticket: {key} - {summary}\n\
                 Description: {description}\n\n\
                 Codebase Context:\n{repo_context}\n\n\
                 Identify which files or components need to be changed."
            ),
        }
    }
}

/// Used when no text model is configured.
pub fn template_analysis(ticket: &Value) -> String {
    let key = item_identifier(ticket).unwrap_or("unknown");
    let summary = string_at(ticket, &["fields", "summary"]).unwrap_or_default();
    format!(
        "**Components to Change**: needs manual review for {key} ({summary}); \
         no text model was configured for automated analysis."
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn contents_endpoint(repo: &str, path: &str) -> String {
    if path.is_empty() {
        format!("repos/{repo}/contents")
    } else {
        format!("repos/{repo}/contents/{path}")
    }
}

/// Design document paths in a `gh api repos/{repo}/contents/{folder}` listing.
pub fn parse_design_candidates(stdout: &str, folder: &str) -> Result<Vec<String>> {
    let entries = serde_json::from_str::<Vec<Value>>(stdout.trim())
        .context("contents listing is not a JSON array")?;
    Ok(entries
        .iter()
        .filter(|entry| entry.get("type").and_then(Value::as_str).unwrap_or("file") == "file")
        .filter_map(|entry| {
            let name = entry.get("name").and_then(Value::as_str)?;
            if !DESIGN_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
                return None;
            }
            let path = match entry.get("path").and_then(Value::as_str) {
                Some(path) => path.to_string(),
                None if folder.is_empty() => name.to_string(),
                None => format!("{folder}/{name}"),
            };
            Some(path)
        })
        .collect())
}

pub fn build_selection_prompt(candidates: &[String]) -> String {
    format!(
        "I have found the following files in the repository that might contain design documentation:\n\
         {}\n\n\
         Which of these files are most likely to contain the high-level system design, architecture, or component diagrams?\n\
         Select up to {MAX_DESIGN_DOCUMENTS} most relevant files.\n\
         Return ONLY a JSON list of the selected file paths.",
        json!(candidates)
    )
}

/// Model picks that are actual candidates, capped. Empty when the reply is unusable.
pub fn parse_selection(text: &str, candidates: &[String]) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(strip_code_fence(text))
        .unwrap_or_default()
        .into_iter()
        .filter(|path| candidates.contains(path))
        .take(MAX_DESIGN_DOCUMENTS)
        .collect()
}

/// Model-backed per-ticket impact analysis, grounded on repository documents.
pub struct ImpactAnalyzer {
    focus: AnalysisFocus,
    model: Option<Arc<dyn TextModel>>,
    repo: Option<String>,
    gh: Arc<dyn GhRunner>,
}

impl ImpactAnalyzer {
    pub fn new(
        focus: AnalysisFocus,
        model: Option<Arc<dyn TextModel>>,
        repo: Option<String>,
        gh: Arc<dyn GhRunner>,
    ) -> Self {
        Self {
            focus,
            model,
            repo,
            gh,
        }
    }

    async fn gh_api(&self, endpoint: String, raw: bool) -> Result<String> {
        let mut args = vec!["api".to_string(), endpoint];
        if raw {
            args.push("-H".to_string());
            args.push("Accept: application/vnd.github.raw".to_string());
        }
        let output = self.gh.run(&args).await?;
        if !output.success {
            return Err(anyhow::anyhow!(
                "gh api {} failed (exit {}): {}",
                args[1],
                output.exit_code,
                output.stderr.trim()
            ));
        }
        Ok(output.stdout)
    }

    async fn read_document(&self, repo: &str, path: &str, max_chars: usize) -> Result<String> {
        let content = self.gh_api(contents_endpoint(repo, path), true).await?;
        if content.trim().is_empty() {
            return Err(anyhow::anyhow!("{path} is empty"));
        }
        Ok(format!(
            "File: {path}\nContent:\n{}\n\n",
            truncate_chars(&content, max_chars)
        ))
    }

    async fn discover_design_documents(&self, repo: &str) -> Vec<String> {
        let mut candidates = Vec::new();
        for folder in DESIGN_FOLDERS {
            let listing = match self.gh_api(contents_endpoint(repo, folder), false).await {
                Ok(listing) => listing,
                Err(err) => {
                    tracing::debug!(repo, folder, error = %err, "folder not listable");
                    continue;
                }
            };
            match parse_design_candidates(&listing, folder) {
                Ok(found) => candidates.extend(found),
                Err(err) => tracing::debug!(repo, folder, error = %err, "unreadable folder listing"),
            }
        }
        tracing::info!(repo, candidates = ?candidates, "design document candidates");
        candidates
    }

    async fn select_documents(&self, candidates: Vec<String>) -> Vec<String> {
        if candidates.is_empty() {
            return vec!["README.md".to_string()];
        }
        let fallback = || -> Vec<String> {
            candidates.iter().take(MAX_DESIGN_DOCUMENTS).cloned().collect()
        };
        let Some(model) = &self.model else {
            return fallback();
        };
        match model.generate(&build_selection_prompt(&candidates)).await {
            Ok(reply) => {
                let selected = parse_selection(&reply, &candidates);
                if selected.is_empty() {
                    tracing::warn!("design document selection unusable, using first candidates");
                    fallback()
                } else {
                    selected
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "design document selection failed, using first candidates");
                fallback()
            }
        }
    }

    async fn repository_context(&self, repo: &str) -> String {
        let (documents, max_chars) = match self.focus {
            AnalysisFocus::Design => {
                let candidates = self.discover_design_documents(repo).await;
                (self.select_documents(candidates).await, CONTEXT_MAX_CHARS)
            }
            AnalysisFocus::Code => (vec!["README.md".to_string()], README_MAX_CHARS),
        };

        let mut context = String::new();
        for path in &documents {
            match self.read_document(repo, path, max_chars).await {
                Ok(section) => context.push_str(&section),
                Err(err) => {
                    tracing::warn!(agent = self.focus.agent_name(), repo, path = %path, error = %err, "could not read document");
                }
            }
        }
        if context.is_empty() {
            tracing::warn!(agent = self.focus.agent_name(), repo, "repository context unavailable");
            return UNAVAILABLE_CONTEXT.to_string();
        }
        context
    }
}

#[async_trait]
impl Worker for ImpactAnalyzer {
    fn name(&self) -> &str {
        self.focus.agent_name()
    }

    async fn run(&self, context: &ExecutionContext) -> Result<ContextPatch> {
        let tickets = context.array(keys::PENDING_ITEMS);
        let repo = self.repo.as_deref().unwrap_or("the configured repository");
        tracing::info!(agent = self.focus.agent_name(), count = tickets.len(), repo, "analyzing tickets");

        let repo_context = if tickets.is_empty() {
            String::new()
        } else if let Some(configured) = self.repo.as_deref() {
            self.repository_context(configured).await
        } else {
            UNAVAILABLE_CONTEXT.to_string()
        };

        let mut analyses = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            let key = item_identifier(ticket).unwrap_or("unknown");
            let analysis = match &self.model {
                Some(model) => model
                    .generate(&self.focus.prompt(repo, ticket, &repo_context))
                    .await
                    .with_context(|| format!("analysis failed for {key}"))?,
                None => template_analysis(ticket),
            };
            analyses.push(json!({"ticket": key, "analysis": analysis}));
        }

        let mut patch = ContextPatch::new();
        patch.insert(self.focus.output_key().to_string(), Value::Array(analyses));
        Ok(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::github::GitHubCliOutput;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const SELECTION_MARKER: &str = "might contain design documentation";

    struct ScriptedModel {
        selection: Option<&'static str>,
        failing_ticket: Option<&'static str>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(selection: Option<&'static str>, failing_ticket: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                selection,
                failing_ticket,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn analysis_prompts(&self) -> Vec<String> {
            self.prompts
                .lock()
                .expect("prompt log should lock")
                .iter()
                .filter(|prompt| !prompt.contains(SELECTION_MARKER))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl TextModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts
                .lock()
                .expect("prompt log should lock")
                .push(prompt.to_string());
            if prompt.contains(SELECTION_MARKER) {
                return self
                    .selection
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("selection unavailable"));
            }
            if self.failing_ticket.is_some_and(|key| prompt.contains(key)) {
                return Err(anyhow::anyhow!("rate limited"));
            }
            Ok("**Components to Change**: retriever".to_string())
        }
    }

    /// Serves `gh api <endpoint>` from a fixed map; anything else is a 404.
    struct RepoGh {
        responses: HashMap<String, String>,
        endpoints: Mutex<Vec<String>>,
    }

    impl RepoGh {
        fn new(responses: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                responses: responses
                    .iter()
                    .map(|(endpoint, body)| (endpoint.to_string(), body.to_string()))
                    .collect(),
                endpoints: Mutex::new(Vec::new()),
            })
        }

        fn requested(&self) -> Vec<String> {
            self.endpoints.lock().expect("endpoint log should lock").clone()
        }
    }

    #[async_trait]
    impl GhRunner for RepoGh {
        async fn run(&self, args: &[String]) -> Result<GitHubCliOutput> {
            let endpoint = args.get(1).cloned().unwrap_or_default();
            self.endpoints
                .lock()
                .expect("endpoint log should lock")
                .push(endpoint.clone());
            Ok(match self.responses.get(&endpoint) {
                Some(body) => GitHubCliOutput {
                    success: true,
                    exit_code: 0,
                    stdout: body.clone(),
                    stderr: String::new(),
                },
                None => GitHubCliOutput {
                    success: false,
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "HTTP 404: Not Found".to_string(),
                },
            })
        }
    }

    const ROOT_LISTING: &str = r#"[
        {"name": "README.md", "path": "README.md", "type": "file"},
        {"name": "main.py", "path": "main.py", "type": "file"},
        {"name": "docs", "path": "docs", "type": "dir"}
    ]"#;
    const DOCS_LISTING: &str = r#"[
        {"name": "architecture.md", "path": "docs/architecture.md", "type": "file"},
        {"name": "flow.puml", "path": "docs/flow.puml", "type": "file"},
        {"name": "notes.txt", "path": "docs/notes.txt", "type": "file"},
        {"name": "api.md", "path": "docs/api.md", "type": "file"}
    ]"#;

    fn design_repo() -> Arc<RepoGh> {
        RepoGh::new(&[
            ("repos/acme/rag/contents", ROOT_LISTING),
            ("repos/acme/rag/contents/docs", DOCS_LISTING),
            ("repos/acme/rag/contents/README.md", "# RAG service"),
            ("repos/acme/rag/contents/docs/architecture.md", "Retriever -> Reranker -> Generator"),
            ("repos/acme/rag/contents/docs/flow.puml", "@startuml\nA -> B\n@enduml"),
            ("repos/acme/rag/contents/docs/api.md", "POST /query"),
        ])
    }

    fn tickets() -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.insert(
            keys::PENDING_ITEMS,
            json!([
                {"key": "KAN-6", "fields": {"summary": "Add reranker", "description": "cross encoder"}},
                {"key": "KAN-9", "fields": {"summary": "Flaky", "description": ""}}
            ]),
        );
        ctx
    }

    #[tokio::test]
    async fn design_analysis_reads_model_selected_documents() {
        let model = ScriptedModel::new(Some("```json\n[\"docs/architecture.md\", \"LICENSE.md\"]\n```"), None);
        let gh = design_repo();
        let analyzer = ImpactAnalyzer::new(
            AnalysisFocus::Design,
            Some(model.clone()),
            Some("acme/rag".to_string()),
            gh.clone(),
        );

        let patch = analyzer.run(&tickets()).await.expect("analysis should run");
        let analyses = patch
            .get(keys::DESIGN_ANALYSIS)
            .and_then(Value::as_array)
            .expect("design analysis should be present");
        assert_eq!(analyses.len(), 2);
        assert_eq!(analyses[0]["ticket"], "KAN-6");
        assert_eq!(analyses[0]["analysis"], "**Components to Change**: retriever");

        let prompts = model.analysis_prompts();
        assert!(prompts[0].contains("Ticket: KAN-6 - Add reranker"));
        assert!(prompts[0].contains("File: docs/architecture.md\nContent:\nRetriever -> Reranker -> Generator"));
        assert!(!prompts[0].contains("# RAG service"));
        assert!(prompts[0].contains("acme/rag"));

        let requested = gh.requested();
        assert!(requested.contains(&"repos/acme/rag/contents/specifications".to_string()));
        assert!(!requested.contains(&"repos/acme/rag/contents/docs/api.md".to_string()));
    }

    #[tokio::test]
    async fn unusable_selection_reads_first_three_candidates() {
        let model = ScriptedModel::new(Some("I would pick the architecture doc"), None);
        let gh = design_repo();
        let analyzer = ImpactAnalyzer::new(
            AnalysisFocus::Design,
            Some(model.clone()),
            Some("acme/rag".to_string()),
            gh.clone(),
        );
        analyzer.run(&tickets()).await.expect("analysis should run");

        let prompt = &model.analysis_prompts()[0];
        assert!(prompt.contains("File: README.md"));
        assert!(prompt.contains("File: docs/architecture.md"));
        assert!(prompt.contains("File: docs/flow.puml"));
        assert!(!prompt.contains("POST /query"));
        assert!(!gh.requested().contains(&"repos/acme/rag/contents/docs/notes.txt".to_string()));
    }

    #[tokio::test]
    async fn design_analysis_falls_back_to_readme_without_candidates() {
        let model = ScriptedModel::new(None, None);
        let gh = RepoGh::new(&[("repos/acme/rag/contents/README.md", "# RAG service")]);
        let analyzer = ImpactAnalyzer::new(
            AnalysisFocus::Design,
            Some(model.clone()),
            Some("acme/rag".to_string()),
            gh,
        );
        analyzer.run(&tickets()).await.expect("analysis should run");
        let prompts = model.prompts.lock().expect("prompt log should lock");
        assert!(prompts.iter().all(|prompt| !prompt.contains(SELECTION_MARKER)));
        assert!(prompts[0].contains("File: README.md\nContent:\n# RAG service"));
    }

    #[tokio::test]
    async fn model_failure_fails_the_step() {
        let model = ScriptedModel::new(Some("[\"docs/architecture.md\"]"), Some("KAN-9"));
        let analyzer = ImpactAnalyzer::new(
            AnalysisFocus::Design,
            Some(model),
            Some("acme/rag".to_string()),
            design_repo(),
        );
        let err = analyzer
            .run(&tickets())
            .await
            .expect_err("a failed ticket analysis should fail the step");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("analysis failed for KAN-9"));
        assert!(rendered.contains("rate limited"));
    }

    #[tokio::test]
    async fn code_analysis_reads_readme_only() {
        let model = ScriptedModel::new(None, None);
        let long_readme = "r".repeat(README_MAX_CHARS + 50);
        let gh = RepoGh::new(&[("repos/acme/rag/contents/README.md", long_readme.as_str())]);
        let analyzer = ImpactAnalyzer::new(
            AnalysisFocus::Code,
            Some(model.clone()),
            Some("acme/rag".to_string()),
            gh.clone(),
        );
        let patch = analyzer.run(&tickets()).await.expect("analysis should run");
        assert!(patch.contains_key(keys::IMPACT_ANALYSIS));
        assert_eq!(gh.requested(), vec!["repos/acme/rag/contents/README.md".to_string()]);

        let prompts = model.analysis_prompts();
        assert!(prompts[0].contains(&"r".repeat(README_MAX_CHARS)));
        assert!(!prompts[0].contains(&"r".repeat(README_MAX_CHARS + 1)));
        assert!(prompts[0].contains("Identify which files or components need to be changed."));
    }

    #[tokio::test]
    async fn unreachable_repository_uses_placeholder_context() {
        let model = ScriptedModel::new(None, None);
        let analyzer = ImpactAnalyzer::new(
            AnalysisFocus::Code,
            Some(model.clone()),
            Some("acme/rag".to_string()),
            RepoGh::new(&[]),
        );
        analyzer.run(&tickets()).await.expect("analysis should run");
        assert!(model.analysis_prompts()[0].contains(UNAVAILABLE_CONTEXT));
    }

    #[tokio::test]
    async fn analyzer_without_model_writes_template_analysis() {
        let analyzer = ImpactAnalyzer::new(AnalysisFocus::Design, None, None, RepoGh::new(&[]));
        assert_eq!(analyzer.name(), "DesignAnalyzer");
        let patch = analyzer.run(&tickets()).await.expect("analysis should run");
        let analyses = patch
            .get(keys::DESIGN_ANALYSIS)
            .and_then(Value::as_array)
            .expect("design analysis should be present");
        assert!(
            analyses[0]["analysis"]
                .as_str()
                .unwrap_or_default()
                .contains("manual review for KAN-6 (Add reranker)")
        );
    }

    #[test]
    fn candidates_keep_design_extensions_and_skip_directories() {
        let found = parse_design_candidates(DOCS_LISTING, "docs").expect("listing should parse");
        assert_eq!(found, vec!["docs/architecture.md", "docs/flow.puml", "docs/api.md"]);
        assert_eq!(
            parse_design_candidates(ROOT_LISTING, "").expect("listing should parse"),
            vec!["README.md"]
        );
        assert_eq!(
            parse_design_candidates(r#"[{"name": "spec.md"}]"#, "design").expect("listing should parse"),
            vec!["design/spec.md"]
        );
        assert!(parse_design_candidates("Not Found", "docs").is_err());
    }

    #[test]
    fn selection_is_capped_to_known_candidates() {
        let candidates = ["a.md", "b.md", "c.md", "d.md"].map(String::from).to_vec();
        assert_eq!(
            parse_selection(r#"["d.md", "x.md", "a.md", "b.md", "c.md"]"#, &candidates),
            vec!["d.md", "a.md", "b.md"]
        );
        assert!(parse_selection("no idea", &candidates).is_empty());
    }
}
