//! Embedding providers.
//!
//! Defines the [`EmbeddingProvider`] trait and two concrete backends:
//!
//! - **Gemini** — `models/{model}:batchEmbedContents` with a pinned
//!   output dimensionality.
//! - **OpenAI** — `POST /v1/embeddings` with the `dimensions` parameter.
//!
//! [`FallbackEmbedder`] wraps a primary provider and an optional fallback:
//! when the primary fails (after its own retries), the fallback is tried
//! once; with no fallback configured the wrapped error surfaces.
//!
//! # Retry Strategy
//!
//! Both backends retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s
//!
//! The embedding dimensionality is configuration-locked (default 768) and
//! must match the vector collection's size; a response with a different
//! width is rejected rather than silently upserted.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{EmbeddingConfig, ProviderConfig};

const MAX_RETRIES: u32 = 3;
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const OPENAI_API_BASE: &str = "https://api.openai.com";

/// Maximum canonical text length in bytes (roughly 1500 tokens).
const MAX_EMBED_TEXT_BYTES: usize = 6000;

/// Builds the canonical text embedded for an issue.
///
/// `"Title: {t}\n\nBody: {b}"`, truncated at 6000 bytes (on a char
/// boundary) with a trailing ellipsis.
pub fn prepare_issue_text(title: &str, body: &str) -> String {
    let text = format!("Title: {}\n\nBody: {}", title, body);
    if text.len() <= MAX_EMBED_TEXT_BYTES {
        return text;
    }

    let mut cut = MAX_EMBED_TEXT_BYTES;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

/// A text-to-vector backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    /// Vector width this provider is locked to.
    fn dimensions(&self) -> usize;
}

async fn backoff(attempt: u32) {
    if attempt > 0 {
        let delay = Duration::from_secs(1 << (attempt - 1).min(5));
        tokio::time::sleep(delay).await;
    }
}

fn check_dimensions(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    for v in vectors {
        if v.len() != expected {
            bail!(
                "embedding dimensionality mismatch: got {}, expected {}",
                v.len(),
                expected
            );
        }
    }
    Ok(())
}

// ============ Gemini ============

pub struct GeminiEmbedder {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl GeminiEmbedder {
    pub fn new(api_key: String, model: String, dimensions: usize) -> Self {
        Self::with_api_base(GEMINI_API_BASE, api_key, model, dimensions)
    }

    pub fn with_api_base(
        api_base: impl Into<String>,
        api_key: String,
        model: String,
        dimensions: usize,
    ) -> Self {
        let model = if model.is_empty() {
            "gemini-embedding-001".to_string()
        } else {
            model
        };
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model,
            dimensions,
        }
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/v1beta/models/{}:batchEmbedContents",
            self.api_base, self.model
        );
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{}", self.model),
                    "content": { "parts": [{ "text": text }] },
                    "outputDimensionality": self.dimensions,
                })
            })
            .collect();
        let body = json!({ "requests": requests });

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            backoff(attempt).await;

            let resp = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: Value = response.json().await?;
                        return parse_gemini_response(&parsed, texts.len());
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("gemini API error {}: {}", status, text));
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    bail!("gemini API error {}: {}", status, text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("gemini embedding failed after retries")))
    }
}

fn parse_gemini_response(json: &Value, expected_count: usize) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("invalid gemini response: missing embeddings array"))?;

    if embeddings.len() != expected_count {
        bail!(
            "invalid gemini response: expected {} embeddings, got {}",
            expected_count,
            embeddings.len()
        );
    }

    let mut result = Vec::with_capacity(embeddings.len());
    for item in embeddings {
        let values = item
            .get("values")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("invalid gemini response: missing values"))?;
        result.push(
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(result)
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let vectors = self.call(texts).await?;
        check_dimensions(&vectors, self.dimensions)?;
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, dimensions: usize) -> Self {
        Self::with_api_base(OPENAI_API_BASE, api_key, model, dimensions)
    }

    pub fn with_api_base(
        api_base: impl Into<String>,
        api_key: String,
        model: String,
        dimensions: usize,
    ) -> Self {
        let model = if model.is_empty() {
            "text-embedding-3-small".to_string()
        } else {
            model
        };
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model,
            dimensions,
        }
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.api_base);
        let body = json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimensions,
        });

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            backoff(attempt).await;

            let resp = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: Value = response.json().await?;
                        return parse_openai_response(&parsed);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("openai API error {}: {}", status, text));
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    bail!("openai API error {}: {}", status, text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("openai embedding failed after retries")))
    }
}

fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("invalid openai response: missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for item in data {
        let index = item.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
        let embedding = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("invalid openai response: missing embedding"))?;
        indexed.push((
            index,
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        ));
    }

    // The API may return entries out of order; restore input order.
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let vectors = self.call(texts).await?;
        check_dimensions(&vectors, self.dimensions)?;
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ============ Fallback ============

/// Primary provider with an optional fallback tried once on failure.
pub struct FallbackEmbedder {
    primary: Box<dyn EmbeddingProvider>,
    fallback: Option<Box<dyn EmbeddingProvider>>,
}

impl FallbackEmbedder {
    pub fn new(
        primary: Box<dyn EmbeddingProvider>,
        fallback: Option<Box<dyn EmbeddingProvider>>,
    ) -> Self {
        Self { primary, fallback }
    }

    /// Builds primary and (if configured) fallback providers from config.
    pub fn from_config(cfg: &EmbeddingConfig) -> Result<Self> {
        let primary = create_provider(&cfg.primary)
            .map_err(|e| anyhow::anyhow!("failed to create primary provider: {}", e))?;

        let fallback = if cfg.fallback.is_configured() {
            match create_provider(&cfg.fallback) {
                Ok(provider) => Some(provider),
                Err(e) => {
                    tracing::warn!("failed to create fallback provider: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self { primary, fallback })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.primary.embed(text).await {
            Ok(vector) => Ok(vector),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!("primary embedding failed, trying fallback: {}", e);
                    fallback.embed(text).await
                }
                None => Err(e.context("primary embedding failed (no fallback)")),
            },
        }
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self.primary.embed_batch(texts).await {
            Ok(vectors) => Ok(vectors),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!("primary batch embedding failed, trying fallback: {}", e);
                    fallback.embed_batch(texts).await
                }
                None => Err(e.context("primary embedding failed (no fallback)")),
            },
        }
    }

    pub fn dimensions(&self) -> usize {
        self.primary.dimensions()
    }
}

/// Instantiates a provider from one config slot.
pub fn create_provider(cfg: &ProviderConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match cfg.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiEmbedder::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
            cfg.dimensions,
        ))),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
            cfg.dimensions,
        ))),
        other => bail!("unknown embedding provider: {}", other),
    }
}
