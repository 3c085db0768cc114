//! LLM completion providers for triage.
//!
//! The triage subsystem prompts for strict JSON output; a response that
//! fails to parse is treated by callers as "no signal" for that sub-task.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::LlmConfig;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const OPENAI_API_BASE: &str = "https://api.openai.com";

/// A text-to-text completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Completes `prompt` under a `system` instruction, returning raw text.
    async fn complete_with_system(&self, system: &str, prompt: &str) -> Result<String>;
}

pub struct GeminiLlm {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiLlm {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_api_base(GEMINI_API_BASE, api_key, model)
    }

    pub fn with_api_base(api_base: impl Into<String>, api_key: String, model: String) -> Self {
        let model = if model.is_empty() {
            "gemini-2.0-flash".to_string()
        } else {
            model
        };
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiLlm {
    async fn complete_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        );
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("gemini completion error {}: {}", status, text);
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("gemini completion returned no text"))
    }
}

pub struct OpenAiLlm {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiLlm {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_api_base(OPENAI_API_BASE, api_key, model)
    }

    pub fn with_api_base(api_base: impl Into<String>, api_key: String, model: String) -> Self {
        let model = if model.is_empty() {
            "gpt-4o-mini".to_string()
        } else {
            model
        };
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlm {
    async fn complete_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.api_base);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
        });

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("openai completion error {}: {}", status, text);
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("openai completion returned no text"))
    }
}

/// Instantiates the configured LLM provider.
pub fn create_llm_provider(cfg: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    if cfg.api_key.is_empty() {
        bail!("LLM API key not configured");
    }
    match cfg.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiLlm::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
        ))),
        "openai" => Ok(Box::new(OpenAiLlm::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
        ))),
        other => bail!("unknown LLM provider: {}", other),
    }
}
