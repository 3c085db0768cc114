//! The issue-processing pipeline.
//!
//! An inbound event is dispatched by [`UnifiedProcessor::process_event`]:
//!
//! ```text
//! opened                  → step pipeline (gatekeeper … indexer)
//! edited/closed/reopened  → re-index the single issue
//! deleted                 → delete the issue's vector
//! comment                 → reconcile any pending action on the issue
//! anything else           → skipped result
//! ```
//!
//! Steps share one mutable [`StepContext`] per event and are executed
//! sequentially. A step may stop the run gracefully by returning
//! [`SkipPipeline`]; failures in the first two steps abort the run, while
//! later steps log and continue so downstream work still happens.
//!
//! The step order can be overridden with `pipeline.steps` in config. An
//! unknown step name is a build error; the processor then warns and falls
//! back to the default order.

pub mod core;
pub mod steps;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

pub use core::{SkipPipeline, Step, StepContext, UnifiedResult};

use crate::config::Config;
use crate::embedding::FallbackEmbedder;
use crate::event::{self, EventKind};
use crate::github::GithubClient;
use crate::indexer;
use crate::models::Issue;
use crate::pending::{ActionType, PendingManager};
use crate::transfer::TransferExecutor;
use crate::triage::duplicate::DuplicateChecker;
use crate::triage::Agent;
use crate::vectordb::{self, VectorStore};

/// Constructs pipelines from the long-lived clients.
pub struct Builder {
    cfg: Arc<Config>,
    gh: Arc<GithubClient>,
    transfer_gh: Arc<GithubClient>,
    vdb: Arc<VectorStore>,
    embedder: Arc<FallbackEmbedder>,
    agent: Option<Arc<Agent>>,
    dry_run: bool,
    execute: bool,
}

impl Builder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        gh: Arc<GithubClient>,
        transfer_gh: Arc<GithubClient>,
        vdb: Arc<VectorStore>,
        embedder: Arc<FallbackEmbedder>,
        agent: Option<Arc<Agent>>,
        dry_run: bool,
        execute: bool,
    ) -> Self {
        Self {
            cfg,
            gh,
            transfer_gh,
            vdb,
            embedder,
            agent,
            dry_run,
            execute,
        }
    }

    /// The standard step sequence.
    pub fn build_default(&self) -> Vec<Box<dyn Step>> {
        [
            "gatekeeper",
            "vectordb_prep",
            "similarity_search",
            "transfer_check",
            "triage",
            "response_builder",
            "action_executor",
            "indexer",
        ]
        .iter()
        .map(|name| self.create_step(name).expect("default step names are valid"))
        .collect()
    }

    /// Builds the pipeline from `pipeline.steps`, or the default order
    /// when the override is empty. Unknown names are an error.
    pub fn build_from_config(&self) -> Result<Vec<Box<dyn Step>>> {
        if self.cfg.pipeline.steps.is_empty() {
            return Ok(self.build_default());
        }

        self.cfg
            .pipeline
            .steps
            .iter()
            .map(|name| self.create_step(name))
            .collect()
    }

    fn create_step(&self, name: &str) -> Result<Box<dyn Step>> {
        let step: Box<dyn Step> = match name {
            "gatekeeper" => Box::new(steps::Gatekeeper::new(self.gh.clone())),
            "vectordb_prep" => {
                Box::new(steps::VectorDbPrep::new(self.vdb.clone(), self.dry_run))
            }
            "similarity_search" => Box::new(steps::SimilaritySearch::new(
                self.embedder.clone(),
                self.vdb.clone(),
            )),
            "transfer_check" => Box::new(steps::TransferCheck),
            "triage" => Box::new(steps::TriageAnalysis::new(self.agent.clone())),
            "response_builder" => Box::new(steps::ResponseBuilder),
            "action_executor" => Box::new(steps::ActionExecutor::new(
                self.gh.clone(),
                self.transfer_gh.clone(),
                self.vdb.clone(),
                self.dry_run,
                self.execute,
            )),
            "indexer" => Box::new(steps::IndexerStep::new(
                self.embedder.clone(),
                self.vdb.clone(),
                self.dry_run,
            )),
            other => anyhow::bail!("unknown step: {}", other),
        };
        Ok(step)
    }
}

/// Handles the complete issue-processing flow for one event.
pub struct UnifiedProcessor {
    cfg: Arc<Config>,
    gh: Arc<GithubClient>,
    transfer_gh: Arc<GithubClient>,
    vdb: Arc<VectorStore>,
    embedder: Arc<FallbackEmbedder>,
    dry_run: bool,
    pipeline: Vec<Box<dyn Step>>,
}

impl UnifiedProcessor {
    /// Assembles the processor from pre-built clients. `transfer_gh` may be
    /// the same client as `gh`, or one with elevated permissions.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        gh: Arc<GithubClient>,
        transfer_gh: Arc<GithubClient>,
        vdb: Arc<VectorStore>,
        embedder: Arc<FallbackEmbedder>,
        agent: Option<Arc<Agent>>,
        dry_run: bool,
        execute: bool,
    ) -> Self {
        let builder = Builder::new(
            cfg.clone(),
            gh.clone(),
            transfer_gh.clone(),
            vdb.clone(),
            embedder.clone(),
            agent,
            dry_run,
            execute,
        );
        let pipeline = match builder.build_from_config() {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::warn!(
                    "invalid pipeline configuration: {}. Using default pipeline.",
                    e
                );
                builder.build_default()
            }
        };

        Self {
            cfg,
            gh,
            transfer_gh,
            vdb,
            embedder,
            dry_run,
            pipeline,
        }
    }

    /// Builds all clients from configuration. `transfer_token`, when
    /// non-empty, creates a separate elevated client for the transfer
    /// mutation.
    pub fn from_config(
        cfg: Config,
        dry_run: bool,
        execute: bool,
        transfer_token: &str,
    ) -> Result<Self> {
        let gh = Arc::new(GithubClient::new().context("failed to create host client")?);
        let transfer_gh = if transfer_token.is_empty() {
            gh.clone()
        } else {
            Arc::new(GithubClient::with_token(transfer_token.to_string()))
        };

        let embedder = Arc::new(
            FallbackEmbedder::from_config(&cfg.embedding)
                .context("failed to create embedding provider")?,
        );
        let vdb = Arc::new(
            VectorStore::new(&cfg.qdrant, cfg.embedding.primary.dimensions)
                .context("failed to create vector store client")?,
        );

        let agent = if cfg.triage.enabled {
            match crate::llm::create_llm_provider(&cfg.triage.llm) {
                Ok(llm) => Some(Arc::new(Agent::new(&cfg, Arc::from(llm)))),
                Err(e) => {
                    tracing::warn!("failed to create LLM provider for triage: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::new(
            Arc::new(cfg),
            gh,
            transfer_gh,
            vdb,
            embedder,
            agent,
            dry_run,
            execute,
        ))
    }

    /// Dispatches an event file to the right path.
    pub async fn process_event(&self, event_path: &Path) -> Result<UnifiedResult> {
        let event = event::parse_event_file(event_path).context("failed to parse event")?;

        match event.kind() {
            EventKind::Comment => {
                let issue = event
                    .to_issue()
                    .ok_or_else(|| anyhow::anyhow!("failed to parse issue from comment event"))?;
                self.process_comment_event(&issue).await
            }
            EventKind::Opened => {
                let issue = event
                    .to_issue()
                    .ok_or_else(|| anyhow::anyhow!("failed to parse issue from event"))?;
                self.process_issue(issue).await
            }
            EventKind::Edited | EventKind::Closed | EventKind::Reopened => {
                let issue = event
                    .to_issue()
                    .ok_or_else(|| anyhow::anyhow!("failed to parse issue from event"))?;
                if !self.dry_run {
                    let collection = vectordb::collection_name(&issue.org);
                    self.vdb
                        .ensure_collection(&collection)
                        .await
                        .context("failed to ensure collection")?;
                    indexer::index_single_issue(&self.embedder, &self.vdb, &issue)
                        .await
                        .context("failed to update index")?;
                }
                Ok(UnifiedResult {
                    issue_number: issue.number,
                    indexed: true,
                    ..UnifiedResult::default()
                })
            }
            EventKind::Deleted => {
                let issue = event
                    .to_issue()
                    .ok_or_else(|| anyhow::anyhow!("failed to parse issue from event"))?;
                if !self.dry_run {
                    let collection = vectordb::collection_name(&issue.org);
                    self.vdb
                        .delete(&collection, &issue.uuid())
                        .await
                        .context("failed to delete from index")?;
                }
                Ok(UnifiedResult {
                    issue_number: issue.number,
                    indexed: true,
                    ..UnifiedResult::default()
                })
            }
            EventKind::Other => Ok(UnifiedResult {
                issue_number: event.to_issue().map(|i| i.number).unwrap_or(0),
                skipped: true,
                skip_reason: format!("action '{}' not supported", event.action),
                ..UnifiedResult::default()
            }),
        }
    }

    /// Runs the step pipeline for one opened issue.
    pub async fn process_issue(&self, issue: Issue) -> Result<UnifiedResult> {
        let mut ctx = StepContext::new(issue, self.cfg.clone());

        for step in &self.pipeline {
            if let Err(e) = step.run(&mut ctx).await {
                if e.downcast_ref::<SkipPipeline>().is_some() {
                    break;
                }
                // Gatekeeping and store preparation are load-bearing; the
                // rest degrade to warnings so downstream steps still run.
                if matches!(step.name(), "gatekeeper" | "vectordb_prep") {
                    return Err(e.context(format!("step {} failed", step.name())));
                }
                tracing::warn!("step {} failed: {}", step.name(), e);
            }
        }

        Ok(ctx.result)
    }

    /// Reconciles the pending action (if any) on a commented issue.
    pub async fn process_comment_event(&self, issue: &Issue) -> Result<UnifiedResult> {
        let mut result = UnifiedResult {
            issue_number: issue.number,
            ..UnifiedResult::default()
        };

        let manager = PendingManager::new(&self.gh);
        let action = match manager.get_pending_action(issue).await {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!("error checking pending action: {}", e);
                result.skipped = true;
                result.skip_reason = "error checking pending action".to_string();
                return Ok(result);
            }
        };

        let Some(action) = action else {
            result.skipped = true;
            result.skip_reason = "no pending action found".to_string();
            return Ok(result);
        };

        tracing::info!(
            "found pending {} action for issue #{}, checking status...",
            action.action_type,
            issue.number
        );

        match action.action_type {
            ActionType::Transfer => {
                let executor = TransferExecutor::new(
                    &self.transfer_gh,
                    &self.gh,
                    &self.vdb,
                    &self.cfg,
                    self.dry_run,
                );
                executor
                    .process_pending_transfer(&action)
                    .await
                    .context("failed to process pending transfer")?;
                result.transferred = true;
                result.actions_executed = 1;
            }
            ActionType::Close => {
                let checker =
                    DuplicateChecker::with_delayed_actions(&self.cfg, &self.gh, self.dry_run);
                checker
                    .process_pending_close(&action)
                    .await
                    .context("failed to process pending close")?;
                result.actions_executed = 1;
            }
        }

        Ok(result)
    }
}

/// Prints a processing result to stdout.
pub fn print_result(result: &UnifiedResult) {
    println!("\n=== Processing Result ===");
    println!("Issue: #{}", result.issue_number);

    if result.skipped {
        println!("Skipped: {}", result.skip_reason);
        return;
    }

    if !result.similar_found.is_empty() {
        println!("Similar Issues Found: {}", result.similar_found.len());
    }

    if !result.transfer_target.is_empty() {
        let status = if result.transferred {
            "executed"
        } else {
            "scheduled"
        };
        println!("Transfer to {}: {}", result.transfer_target, status);
    }

    if let Some(triage) = &result.triage_result {
        if !triage.labels.is_empty() {
            println!("Labels:");
            for l in &triage.labels {
                println!("  - {} ({:.0}%)", l.label, l.confidence * 100.0);
            }
        }
        if let Some(quality) = &triage.quality {
            println!("Quality Score: {:.0}%", quality.score * 100.0);
        }
        if let Some(dup) = &triage.duplicate {
            if dup.is_duplicate {
                if let Some(original) = &dup.original {
                    println!(
                        "Duplicate: {:.0}% similar to #{}",
                        dup.similarity * 100.0,
                        original.number
                    );
                }
            }
        }
    }

    if result.comment_posted {
        println!("Comment: posted");
    }
    if result.indexed {
        println!("Index: updated");
    }
    if result.actions_executed > 0 {
        println!("Actions Executed: {}", result.actions_executed);
    }
}

/// Implements `simili process`: a single event through the pipeline.
pub async fn run_process(
    config_path: Option<&Path>,
    event_path: &Path,
    dry_run: bool,
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

    // A separate transfer token grants the elevated permissions the
    // transfer mutation needs without widening the bot token.
    let transfer_token = std::env::var("TRANSFER_TOKEN").unwrap_or_default();

    let processor = UnifiedProcessor::from_config(cfg, dry_run, true, &transfer_token)
        .context("failed to create processor")?;
    let result = processor
        .process_event(event_path)
        .await
        .context("processing failed")?;

    print_result(&result);
    Ok(())
}
