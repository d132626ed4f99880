/// Generative text model providers used for planning and impact analysis.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::cli::Provider;
use crate::config::RuntimeConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[async_trait]
pub trait TextModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .context("failed to build HTTP client for model provider")
}

async fn post_json(request: reqwest::RequestBuilder, body: &Value, label: &str) -> Result<Value> {
    let response = request
        .json(body)
        .send()
        .await
        .with_context(|| format!("{label} request failed"))?;
    let status = response.status();
    let payload = response
        .json::<Value>()
        .await
        .with_context(|| format!("{label} returned a non-JSON body (status {status})"))?;
    if !status.is_success() {
        let message = payload
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| payload.get("error").and_then(Value::as_str))
            .unwrap_or("unknown error");
        return Err(anyhow::anyhow!("{label} returned {status}: {message}"));
    }
    Ok(payload)
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

pub struct GeminiModel {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiModel {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            model,
        })
    }
}

pub fn extract_gemini_text(payload: &Value) -> Option<String> {
    let parts = payload
        .pointer("/candidates/0/content/parts")?
        .as_array()?;
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl TextModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{GEMINI_BASE_URL}/models/{}:generateContent", self.model);
        let body = json!({ "contents": [{ "role": "user", "parts": [{ "text": prompt }] }] });
        let request = self.client.post(url).header("x-goog-api-key", &self.api_key);
        let payload = post_json(request, &body, "gemini").await?;
        extract_gemini_text(&payload).context("gemini response contained no text candidates")
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

pub struct OpenAiModel {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiModel {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

pub fn extract_openai_text(payload: &Value) -> Option<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl TextModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self.client.post(url).bearer_auth(&self.api_key);
        let payload = post_json(request, &body, "openai").await?;
        extract_openai_text(&payload).context("openai response contained no message content")
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

pub struct OllamaModel {
    client: Client,
    host: String,
    model: String,
}

impl OllamaModel {
    pub fn new(host: String, model: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            host: host.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl TextModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.host);
        let body = json!({ "model": self.model, "prompt": prompt, "stream": false });
        let payload = post_json(self.client.post(url), &body, "ollama").await?;
        payload
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("ollama response is missing the 'response' field")
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

pub fn env_present(key: &str) -> bool {
    std::env::var(key)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}

pub fn detect_provider() -> Option<Provider> {
    if env_present("GOOGLE_API_KEY") {
        return Some(Provider::Gemini);
    }
    if env_present("OPENAI_API_KEY") {
        return Some(Provider::Openai);
    }
    if env_present("OLLAMA_HOST") {
        return Some(Provider::Ollama);
    }
    None
}

pub fn default_model_for(provider: Provider) -> &'static str {
    match provider {
        Provider::Gemini | Provider::Auto => "gemini-2.5-flash",
        Provider::Openai => "gpt-4o-mini",
        Provider::Ollama => "llama3.1",
    }
}

pub fn resolve_model(cfg: &RuntimeConfig) -> Result<(Arc<dyn TextModel>, Provider, String)> {
    let provider = match cfg.provider {
        Provider::Auto => detect_provider().context(
            "no provider could be auto-detected. Set one of GOOGLE_API_KEY, OPENAI_API_KEY, \
             OLLAMA_HOST, or use --provider ollama",
        )?,
        p => p,
    };
    let model_name = cfg
        .model
        .clone()
        .unwrap_or_else(|| default_model_for(provider).to_string());

    let model: Arc<dyn TextModel> = match provider {
        Provider::Gemini | Provider::Auto => {
            let api_key = std::env::var("GOOGLE_API_KEY")
                .context("GOOGLE_API_KEY is required for Gemini provider")?;
            Arc::new(GeminiModel::new(api_key, model_name.clone())?)
        }
        Provider::Openai => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY is required for OpenAI provider")?;
            Arc::new(OpenAiModel::new(api_key, model_name.clone())?)
        }
        Provider::Ollama => {
            let host = std::env::var("OLLAMA_HOST")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
            let host = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                format!("http://{host}")
            };
            Arc::new(OllamaModel::new(host, model_name.clone())?)
        }
    };
    Ok((model, provider, model_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_text_concatenates_parts() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "text": "[{\"agent\"" }, { "text": ": 1}]" }] } }]
        });
        assert_eq!(
            extract_gemini_text(&payload).as_deref(),
            Some("[{\"agent\": 1}]")
        );
        assert!(extract_gemini_text(&json!({ "candidates": [] })).is_none());
    }

    #[test]
    fn openai_text_reads_first_choice() {
        let payload = json!({ "choices": [{ "message": { "content": "hello" } }] });
        assert_eq!(extract_openai_text(&payload).as_deref(), Some("hello"));
        assert!(extract_openai_text(&json!({ "choices": [] })).is_none());
    }

    #[test]
    fn default_models_are_provider_specific() {
        assert_eq!(default_model_for(Provider::Gemini), "gemini-2.5-flash");
        assert_eq!(default_model_for(Provider::Ollama), "llama3.1");
    }
}
