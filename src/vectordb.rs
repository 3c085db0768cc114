//! Vector store adapter (Qdrant over HTTP).
//!
//! One collection per org, named `"{org}_issues"`, cosine distance, point
//! id = the issue's deterministic UUID. The adapter owns three concerns:
//!
//! 1. **Collection lifecycle** — [`VectorStore::ensure_collection`] is
//!    idempotent and creates payload indexes for the filterable fields;
//!    index-creation failures are logged and swallowed.
//! 2. **Point lifecycle** — UUID-keyed upserts and deletes, so replaying
//!    an indexing pass converges instead of duplicating.
//! 3. **Query-time ranking** — kNN with a score floor, over-fetching 2x
//!    the limit so that closed-issue down-weighting can reorder results
//!    before trimming. The weighting is never persisted.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use crate::config::QdrantConfig;
use crate::models::{Issue, SearchResult};

/// Collection name for an org's issues.
pub fn collection_name(org: &str) -> String {
    format!("{}_issues", org)
}

pub struct VectorStore {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    dimensions: usize,
}

/// Splits a configured URL into host and port, defaulting the port to 6334.
fn parse_host_port(url: &str) -> (String, u16) {
    let url = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let url = url.trim_end_matches('/');

    match url.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str.parse::<u16>().unwrap_or(6334);
            (host.to_string(), port)
        }
        None => (url.to_string(), 6334),
    }
}

/// Managed-cloud hosts require TLS; everything else defaults to plain HTTP.
fn use_tls(host: &str) -> bool {
    host.contains("qdrant.io") || host.contains("qdrant.cloud")
}

impl VectorStore {
    /// Creates the adapter from config. `dimensions` must match the
    /// embedding provider's output width.
    pub fn new(cfg: &QdrantConfig, dimensions: usize) -> Result<Self> {
        if cfg.url.is_empty() {
            bail!("qdrant.url not configured");
        }
        let (host, port) = parse_host_port(&cfg.url);
        let scheme = if use_tls(&host) { "https" } else { "http" };
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: format!("{}://{}:{}", scheme, host, port),
            api_key: cfg.api_key.clone(),
            dimensions,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if !self.api_key.is_empty() {
            builder = builder.header("api-key", &self.api_key);
        }
        builder
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            bail!("{} failed: HTTP {}: {}", what, status, body);
        }
        Ok(body)
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}/exists", name),
            )
            .send()
            .await
            .context("check collection: request error")?;
        let body = Self::check(response, "check collection").await?;
        Ok(body
            .pointer("/result/exists")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Creates the collection and its payload indexes if absent.
    pub async fn ensure_collection(&self, name: &str) -> Result<()> {
        if self.collection_exists(name).await? {
            return Ok(());
        }

        let response = self
            .request(reqwest::Method::PUT, &format!("/collections/{}", name))
            .json(&json!({
                "vectors": { "size": self.dimensions, "distance": "Cosine" }
            }))
            .send()
            .await
            .context("create collection: request error")?;
        Self::check(response, "create collection").await?;

        let indexes = [
            ("org", "keyword"),
            ("repo", "keyword"),
            ("state", "keyword"),
            ("number", "integer"),
            ("labels", "keyword"),
        ];
        for (field, schema) in indexes {
            let result = self
                .request(reqwest::Method::PUT, &format!("/collections/{}/index", name))
                .json(&json!({ "field_name": field, "field_schema": schema }))
                .send()
                .await;
            match result {
                Ok(response) => {
                    if let Err(e) = Self::check(response, "create payload index").await {
                        tracing::warn!("failed to create index for {}: {}", field, e);
                    }
                }
                Err(e) => tracing::warn!("failed to create index for {}: {}", field, e),
            }
        }

        Ok(())
    }

    pub async fn upsert(&self, collection: &str, issue: &Issue, vector: &[f32]) -> Result<()> {
        self.upsert_points(collection, vec![issue_to_point(issue, vector)])
            .await
    }

    pub async fn upsert_batch(
        &self,
        collection: &str,
        issues: &[Issue],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if issues.len() != vectors.len() {
            bail!("issues and vectors length mismatch");
        }
        let points = issues
            .iter()
            .zip(vectors)
            .map(|(issue, vector)| issue_to_point(issue, vector))
            .collect();
        self.upsert_points(collection, points).await
    }

    async fn upsert_points(&self, collection: &str, points: Vec<Value>) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points", collection),
            )
            .json(&json!({ "points": points }))
            .send()
            .await
            .context("upsert: request error")?;
        Self::check(response, "upsert").await?;
        Ok(())
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.delete_batch(collection, &[id.to_string()]).await
    }

    pub async fn delete_batch(&self, collection: &str, ids: &[String]) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete", collection),
            )
            .json(&json!({ "points": ids }))
            .send()
            .await
            .context("delete: request error")?;
        Self::check(response, "delete").await?;
        Ok(())
    }

    /// kNN query with closed-issue re-weighting.
    ///
    /// Over-fetches `2 * limit` candidates above `threshold`, multiplies
    /// each closed result's score by `closed_weight` (when > 0), re-sorts
    /// descending by adjusted score, and returns the top `limit`.
    pub async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        threshold: f64,
        closed_weight: f64,
        filter: Option<Value>,
    ) -> Result<Vec<SearchResult>> {
        let mut body = json!({
            "query": vector,
            "limit": limit * 2,
            "score_threshold": threshold,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/query", collection),
            )
            .json(&body)
            .send()
            .await
            .context("query: request error")?;
        let parsed = Self::check(response, "query").await?;

        let points = parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let results = points
            .iter()
            .map(|point| {
                let issue = payload_to_issue(point.get("payload").unwrap_or(&Value::Null));
                let score = point.get("score").and_then(Value::as_f64).unwrap_or(0.0);
                SearchResult { issue, score }
            })
            .collect();

        Ok(rerank_with_closed_weight(results, closed_weight, limit))
    }
}

/// Applies the closed-issue weight, re-sorts, and trims. Pure function so
/// the ranking contract is testable without a live store.
pub fn rerank_with_closed_weight(
    mut results: Vec<SearchResult>,
    closed_weight: f64,
    limit: usize,
) -> Vec<SearchResult> {
    if closed_weight > 0.0 {
        for result in &mut results {
            if result.issue.state == "closed" {
                result.score *= closed_weight;
            }
        }
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    results
}

fn issue_to_point(issue: &Issue, vector: &[f32]) -> Value {
    json!({
        "id": issue.uuid(),
        "vector": vector,
        "payload": {
            "org": issue.org,
            "repo": issue.repo,
            "number": issue.number,
            "title": issue.title,
            "state": issue.state,
            "author": issue.author,
            "url": issue.url,
            "body_hash": issue.body_hash(),
            "created_at": issue.created_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            "updated_at": issue.updated_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            "labels": issue.labels,
        }
    })
}

fn payload_to_issue(payload: &Value) -> Issue {
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Issue {
        org: text("org"),
        repo: text("repo"),
        number: payload.get("number").and_then(Value::as_u64).unwrap_or(0),
        title: text("title"),
        body: String::new(),
        state: text("state"),
        labels: payload
            .get("labels")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        author: text("author"),
        url: text("url"),
        created_at: payload
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&chrono::Utc)),
        updated_at: payload
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&chrono::Utc)),
    }
}
