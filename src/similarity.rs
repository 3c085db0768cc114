//! Similarity search over indexed issues.
//!
//! Composes the embedding gateway and the vector store: embed the issue's
//! canonical text, query the org's collection, exclude the issue itself,
//! and trim to the configured display limit.

use anyhow::{Context, Result};
use serde_json::json;

use crate::config::Config;
use crate::embedding::{self, FallbackEmbedder};
use crate::models::{Issue, SearchResult};
use crate::vectordb::{self, VectorStore};

pub struct SimilarityFinder<'a> {
    cfg: &'a Config,
    embedder: &'a FallbackEmbedder,
    vdb: &'a VectorStore,
}

impl<'a> SimilarityFinder<'a> {
    pub fn new(cfg: &'a Config, embedder: &'a FallbackEmbedder, vdb: &'a VectorStore) -> Self {
        Self { cfg, embedder, vdb }
    }

    /// Finds issues similar to `issue` in its org's collection.
    ///
    /// The store-side filter excludes the exact `(org, repo, number)`; a
    /// defensive post-filter removes self even when the store returns it
    /// anyway (e.g. the filter indexes are still building).
    pub async fn find_similar(
        &self,
        issue: &Issue,
        exclude_self: bool,
    ) -> Result<Vec<SearchResult>> {
        let text = embedding::prepare_issue_text(&issue.title, &issue.body);
        let vector = self
            .embedder
            .embed(&text)
            .await
            .context("failed to generate embedding")?;

        let collection = vectordb::collection_name(&issue.org);
        let threshold = self.cfg.similarity_threshold(&issue.org, &issue.repo);
        let limit = self.cfg.defaults.max_similar_to_show;
        let closed_weight = self.cfg.defaults.closed_issue_weight;

        let filter = exclude_self.then(|| {
            json!({
                "must_not": [{
                    "must": [
                        { "key": "org", "match": { "value": issue.org } },
                        { "key": "repo", "match": { "value": issue.repo } },
                        { "key": "number", "match": { "value": issue.number } },
                    ]
                }]
            })
        });

        let mut results = self
            .vdb
            .query(&collection, &vector, limit + 1, threshold, closed_weight, filter)
            .await?;

        if exclude_self {
            results.retain(|r| {
                !(r.issue.org == issue.org
                    && r.issue.repo == issue.repo
                    && r.issue.number == issue.number)
            });
        }
        results.truncate(limit);
        Ok(results)
    }

    /// Finds issues similar to a free-text query in an org's collection.
    pub async fn find_similar_by_text(
        &self,
        text: &str,
        org: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let vector = self
            .embedder
            .embed(text)
            .await
            .context("failed to generate embedding")?;

        self.vdb
            .query(
                &vectordb::collection_name(org),
                &vector,
                limit,
                self.cfg.defaults.similarity_threshold,
                self.cfg.defaults.closed_issue_weight,
                None,
            )
            .await
    }
}

/// True when any result comes from a different repository than the issue.
pub fn has_cross_repo_results(results: &[SearchResult], org: &str, repo: &str) -> bool {
    results
        .iter()
        .any(|r| r.issue.org != org || r.issue.repo != repo)
}

/// Implements `simili search`: interactive similarity over the index.
pub async fn run_search(
    config_path: Option<&std::path::Path>,
    query: &str,
    repo: Option<&str>,
    limit: usize,
) -> Result<()> {
    let path = crate::config::find_config_path(config_path)
        .ok_or_else(|| anyhow::anyhow!("config file not found"))?;
    let cfg = crate::config::load_config(&path)?;

    let errors = crate::config::validate(&cfg);
    if !errors.is_empty() {
        for error in &errors {
            println!("config error: {}", error);
        }
        anyhow::bail!("invalid configuration");
    }

    // Scope to the given repo's org, falling back to the first configured
    // repository's org.
    let org = match repo {
        Some(full) => crate::github::parse_repo(full)?.0,
        None => cfg
            .repositories
            .first()
            .map(|r| r.org.clone())
            .ok_or_else(|| anyhow::anyhow!("no repositories configured and no --repo given"))?,
    };

    let embedder = FallbackEmbedder::from_config(&cfg.embedding)?;
    let vdb = VectorStore::new(&cfg.qdrant, cfg.embedding.primary.dimensions)?;
    let finder = SimilarityFinder::new(&cfg, &embedder, &vdb);

    let results = finder.find_similar_by_text(query, &org, limit).await?;

    if results.is_empty() {
        println!("No similar issues found");
        return Ok(());
    }

    println!("Found {} similar issues:\n", results.len());
    for (i, r) in results.iter().enumerate() {
        let status = if r.issue.state == "closed" {
            "Closed"
        } else {
            "Open"
        };
        println!("{}. #{} - {}", i + 1, r.issue.number, r.issue.title);
        println!(
            "   Repo: {}/{} | Similarity: {:.1}% | Status: {}",
            r.issue.org,
            r.issue.repo,
            r.score * 100.0,
            status
        );
        println!("   {}\n", r.issue.url);
    }

    Ok(())
}
