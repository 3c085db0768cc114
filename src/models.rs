//! Core data models shared across the indexing and processing pipeline.
//!
//! The central type is [`Issue`], the canonical internal representation of a
//! tracker issue. Identity is deterministic: the same `(org, repo, number)`
//! always maps to the same UUID, so upserts into the vector store are
//! naturally idempotent and a re-indexed issue replaces its old point
//! instead of duplicating it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A tracker issue, normalized from webhook payloads and list endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Issue {
    pub org: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// `"open"` or `"closed"`.
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Returns the full repository name, `"org/repo"`.
    pub fn full_repo(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    /// Deterministic point id for this issue.
    pub fn uuid(&self) -> String {
        issue_uuid(&self.org, &self.repo, self.number)
    }

    /// SHA-256 of the raw body, lowercase hex. Stored in the vector payload
    /// so a sync pass can detect body changes without re-embedding.
    pub fn body_hash(&self) -> String {
        let digest = Sha256::digest(self.body.as_bytes());
        format!("{:x}", digest)
    }
}

/// Derives the UUID for an issue identity.
///
/// UUIDv5 under the URL namespace with the name `"{org}/{repo}#{number}"`.
/// This is a pure function of the identity triple: renaming a repository
/// produces a new logical identity, and the old point must be deleted
/// explicitly.
pub fn issue_uuid(org: &str, repo: &str, number: u64) -> String {
    let name = format!("{}/{}#{}", org, repo, number);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// A similar issue found via vector search, with its (possibly re-weighted)
/// similarity score in `[0.0, 1.0]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub issue: Issue,
    pub score: f64,
}

/// Statistics from a bulk index or sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub total_issues: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
}
