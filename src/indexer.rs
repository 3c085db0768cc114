//! Bulk indexing and sync re-indexing.
//!
//! `simili index` walks a repository's full issue list in batches, embeds
//! each batch with one provider call, and upserts the vectors under their
//! deterministic ids. `simili sync` does the same for issues updated
//! within a recent window. Both commands are idempotent: re-running them
//! replaces points instead of duplicating them.

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use std::path::Path;
use std::time::Instant;

use crate::config::{self, Config};
use crate::embedding::{self, FallbackEmbedder};
use crate::github::{self, GithubClient, ListOptions};
use crate::models::{Issue, IndexStats};
use crate::vectordb::{self, VectorStore};

/// Embeds and upserts one issue under its deterministic id.
pub async fn index_single_issue(
    embedder: &FallbackEmbedder,
    vdb: &VectorStore,
    issue: &Issue,
) -> Result<()> {
    let text = embedding::prepare_issue_text(&issue.title, &issue.body);
    let vector = embedder
        .embed(&text)
        .await
        .context("failed to generate embedding")?;

    let collection = vectordb::collection_name(&issue.org);
    vdb.upsert(&collection, issue, &vector)
        .await
        .context("failed to upsert issue")
}

/// Bulk indexer over a repository's issues.
pub struct Indexer<'a> {
    gh: &'a GithubClient,
    embedder: &'a FallbackEmbedder,
    vdb: &'a VectorStore,
    dry_run: bool,
}

impl<'a> Indexer<'a> {
    pub fn new(
        gh: &'a GithubClient,
        embedder: &'a FallbackEmbedder,
        vdb: &'a VectorStore,
        dry_run: bool,
    ) -> Self {
        Self {
            gh,
            embedder,
            vdb,
            dry_run,
        }
    }

    /// Indexes every issue in `full_repo`, batching the embedding calls.
    pub async fn index_repo(&self, full_repo: &str, batch_size: usize) -> Result<IndexStats> {
        let start = Instant::now();
        let mut stats = IndexStats::default();

        let (org, repo) = github::parse_repo(full_repo)?;

        let collection = vectordb::collection_name(&org);
        if !self.dry_run {
            self.vdb
                .ensure_collection(&collection)
                .await
                .context("failed to ensure collection")?;
        }

        println!("Fetching issues from {}...", full_repo);
        let issues = self
            .gh
            .list_all_issues(&org, &repo, "all", batch_size)
            .await
            .context("failed to fetch issues")?;
        stats.total_issues = issues.len();
        println!("Found {} issues", issues.len());

        for batch in issues.chunks(batch_size.max(1)) {
            match self.index_batch(&collection, batch).await {
                Ok(()) => stats.indexed += batch.len(),
                Err(e) => {
                    tracing::warn!("failed to index batch: {}", e);
                    stats.errors += batch.len();
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn index_batch(&self, collection: &str, issues: &[Issue]) -> Result<()> {
        let texts: Vec<String> = issues
            .iter()
            .map(|i| embedding::prepare_issue_text(&i.title, &i.body))
            .collect();

        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("failed to generate embeddings")?;

        if self.dry_run {
            return Ok(());
        }

        self.vdb
            .upsert_batch(collection, issues, &vectors)
            .await
            .context("failed to upsert batch")
    }

    /// Re-indexes the issues updated within the `since` window.
    pub async fn sync_repo(&self, full_repo: &str, since: &str) -> Result<IndexStats> {
        let start = Instant::now();
        let mut stats = IndexStats::default();

        let (org, repo) = github::parse_repo(full_repo)?;
        let since_time = Utc::now() - parse_since_duration(since)?;

        let collection = vectordb::collection_name(&org);
        if !self.dry_run {
            self.vdb
                .ensure_collection(&collection)
                .await
                .context("failed to ensure collection")?;
        }

        println!("Fetching issues updated since {}...", since_time.to_rfc3339());
        let issues = self
            .gh
            .list_issues(
                &org,
                &repo,
                &ListOptions {
                    state: Some("all".to_string()),
                    since: Some(since_time),
                    ..ListOptions::default()
                },
            )
            .await
            .context("failed to fetch issues")?;
        stats.total_issues = issues.len();
        println!("Found {} updated issues", issues.len());

        for issue in &issues {
            if self.dry_run {
                stats.skipped += 1;
                continue;
            }
            match index_single_issue(self.embedder, self.vdb, issue).await {
                Ok(()) => stats.indexed += 1,
                Err(e) => {
                    tracing::warn!("failed to sync issue #{}: {}", issue.number, e);
                    stats.errors += 1;
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }
}

/// Parses windows like `24h` or `7d`.
pub fn parse_since_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration");
    }

    let (value, unit) = s.split_at(s.len() - 1);
    let amount: i64 = value
        .parse()
        .with_context(|| format!("invalid duration: {}", s))?;
    if amount < 0 {
        bail!("invalid duration: {}", s);
    }

    match unit {
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        _ => bail!("invalid duration: {} (expected e.g. 24h or 7d)", s),
    }
}

fn print_stats(stats: &IndexStats) {
    println!("  total issues: {}", stats.total_issues);
    println!("  indexed: {}", stats.indexed);
    if stats.skipped > 0 {
        println!("  skipped: {}", stats.skipped);
    }
    if stats.errors > 0 {
        println!("  errors: {}", stats.errors);
    }
    println!("  duration: {}ms", stats.duration_ms);
    println!("ok");
}

fn load_validated_config(config_path: Option<&Path>) -> Result<Config> {
    let path = config::find_config_path(config_path)
        .ok_or_else(|| anyhow::anyhow!("config file not found"))?;
    let cfg = config::load_config(&path)?;

    let errors = config::validate(&cfg);
    if !errors.is_empty() {
        for error in &errors {
            println!("config error: {}", error);
        }
        bail!("invalid configuration");
    }
    Ok(cfg)
}

/// Implements `simili index`.
pub async fn run_index(
    config_path: Option<&Path>,
    full_repo: &str,
    batch_size: usize,
    dry_run: bool,
) -> Result<()> {
    let cfg = load_validated_config(config_path)?;

    let gh = GithubClient::new()?;
    let embedder = FallbackEmbedder::from_config(&cfg.embedding)?;
    let vdb = VectorStore::new(&cfg.qdrant, cfg.embedding.primary.dimensions)?;

    let indexer = Indexer::new(&gh, &embedder, &vdb, dry_run);
    let stats = indexer.index_repo(full_repo, batch_size).await?;

    println!("index {}", full_repo);
    print_stats(&stats);
    Ok(())
}

/// Implements `simili sync`.
pub async fn run_sync(
    config_path: Option<&Path>,
    full_repo: &str,
    since: &str,
    dry_run: bool,
) -> Result<()> {
    let cfg = load_validated_config(config_path)?;

    let gh = GithubClient::new()?;
    let embedder = FallbackEmbedder::from_config(&cfg.embedding)?;
    let vdb = VectorStore::new(&cfg.qdrant, cfg.embedding.primary.dimensions)?;

    let indexer = Indexer::new(&gh, &embedder, &vdb, dry_run);
    let stats = indexer.sync_repo(full_repo, since).await?;

    println!("sync {}", full_repo);
    print_stats(&stats);
    Ok(())
}
