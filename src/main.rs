//! # Simili CLI (`simili`)
//!
//! The `simili` binary is the entry point for the issue intelligence bot.
//! It is designed to run inside a CI workflow (reacting to issue events)
//! or ad hoc from a terminal.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `simili index --repo owner/repo` | Bulk-index a repository's issues |
//! | `simili process --event-path P` | Process one issue event via the pipeline |
//! | `simili sync --repo owner/repo` | Re-index recently updated issues |
//! | `simili search "<query>"` | Interactive similarity search |
//! | `simili triage --event-path P` | Standalone triage with JSON output |
//! | `simili triage-execute --input F --issue F` | Execute pre-computed actions |
//! | `simili process-pending` | Reconcile expired pending actions |
//! | `simili config validate` | Load, expand env vars, validate |
//!
//! All commands accept `--config` (path to the YAML configuration; the
//! conventional locations are probed when omitted) and `--dry-run` (skip
//! all writes to the issue host and the vector store).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use simili::{config, indexer, pending, pipeline, similarity, triage};

/// Simili finds duplicate and related issues with semantic search,
/// triages new issues, and routes them between repositories based on
/// classification rules.
#[derive(Parser)]
#[command(
    name = "simili",
    about = "Issue intelligence bot: semantic duplicate detection, triage, and rule-based routing",
    version,
    long_about = "Simili auto-transfers issues to the correct repository based on \
    classification rules and detects duplicate/similar issues using semantic search \
    over an embedding index."
)]
struct Cli {
    /// Path to the configuration file (YAML).
    ///
    /// When omitted, the conventional locations are probed:
    /// `.github/simili.yaml`, `simili.yaml`, and
    /// `~/.config/simili/config.yaml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Skip all writes (issue host + vector store).
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bulk-index all issues from a repository.
    Index {
        /// Repository to index (`owner/repo`).
        #[arg(long)]
        repo: String,

        /// Issues per listing page and per embedding batch.
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },

    /// Process a single issue event through the pipeline.
    ///
    /// Opened issues run the full pipeline (similarity, triage, transfer
    /// rules, unified comment, indexing); edits and closes re-index;
    /// deletions remove the vector; comments reconcile pending actions.
    Process {
        /// Path to the event payload JSON file.
        #[arg(long)]
        event_path: PathBuf,
    },

    /// Re-index issues updated within a recent window.
    Sync {
        /// Repository to sync (`owner/repo`).
        #[arg(long)]
        repo: String,

        /// Window of updates to re-index, e.g. `24h` or `7d`.
        #[arg(long, default_value = "24h")]
        since: String,
    },

    /// Search for similar issues (debugging/testing).
    Search {
        /// The search query string.
        query: String,

        /// Limit search to a repository's org (`owner/repo`).
        #[arg(long)]
        repo: Option<String>,

        /// Maximum results to return.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Run standalone triage on an issue event.
    Triage {
        /// Path to the event payload JSON file.
        #[arg(long)]
        event_path: PathBuf,

        /// Write the triage result JSON to this file.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Execute the resulting actions immediately.
        #[arg(long)]
        execute: bool,
    },

    /// Execute pre-computed triage actions from a result file.
    TriageExecute {
        /// Path to a triage result JSON file.
        #[arg(long)]
        input: PathBuf,

        /// Path to an issue JSON file identifying the target issue.
        #[arg(long)]
        issue: PathBuf,
    },

    /// Scan enabled repositories and reconcile expired pending actions.
    ProcessPending,

    /// Configuration utilities.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load the config, expand environment variables, and validate it.
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("simili=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Index { repo, batch_size } => {
            indexer::run_index(config_path, &repo, batch_size, cli.dry_run).await?;
        }
        Commands::Process { event_path } => {
            pipeline::run_process(config_path, &event_path, cli.dry_run).await?;
        }
        Commands::Sync { repo, since } => {
            indexer::run_sync(config_path, &repo, &since, cli.dry_run).await?;
        }
        Commands::Search { query, repo, limit } => {
            similarity::run_search(config_path, &query, repo.as_deref(), limit).await?;
        }
        Commands::Triage {
            event_path,
            output,
            execute,
        } => {
            triage::run_triage(
                config_path,
                &event_path,
                output.as_deref(),
                execute,
                cli.dry_run,
            )
            .await?;
        }
        Commands::TriageExecute { input, issue } => {
            triage::actions::run_triage_execute(&input, &issue, cli.dry_run).await?;
        }
        Commands::ProcessPending => {
            pending::run_process_pending(config_path, cli.dry_run).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate => {
                config::run_validate(config_path)?;
            }
        },
    }

    Ok(())
}
