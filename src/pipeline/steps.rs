//! The built-in pipeline steps, in their default order:
//!
//! | # | Step | Responsibility | On failure |
//! |---|------|----------------|------------|
//! | 1 | `gatekeeper` | repo enabled + comment cooldown | fatal |
//! | 2 | `vectordb_prep` | ensure the org collection exists | fatal |
//! | 3 | `similarity_search` | kNN over the org's issues | warn |
//! | 4 | `transfer_check` | match transfer rules | warn |
//! | 5 | `triage` | labels, quality, duplicate | warn |
//! | 6 | `response_builder` | compose the unified comment | warn |
//! | 7 | `action_executor` | post comment, transfer/close, actions | warn |
//! | 8 | `indexer` | upsert the issue vector | warn |

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::embedding::FallbackEmbedder;
use crate::github::GithubClient;
use crate::indexer;
use crate::pending::{self, ActionType, PendingAction};
use crate::rules::RuleMatcher;
use crate::similarity::{self, SimilarityFinder};
use crate::transfer::TransferExecutor;
use crate::triage::{self, actions as triage_actions, Agent};
use crate::vectordb::{self, VectorStore};

use super::core::{Step, StepContext};

// ---- 1. gatekeeper ----

/// Refuses to process disabled repositories and enforces the comment
/// cooldown. Its host call is the one hard dependency in the pipeline; a
/// failure here aborts the run.
pub struct Gatekeeper {
    gh: Arc<GithubClient>,
}

impl Gatekeeper {
    pub fn new(gh: Arc<GithubClient>) -> Self {
        Self { gh }
    }
}

#[async_trait]
impl Step for Gatekeeper {
    fn name(&self) -> &'static str {
        "gatekeeper"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let enabled = ctx
            .cfg
            .repo_config(&ctx.issue.org, &ctx.issue.repo)
            .is_some_and(|r| r.enabled);
        if !enabled {
            return Err(ctx.skip("repository not enabled"));
        }

        let skip = self
            .gh
            .should_skip_comment(
                &ctx.issue.org,
                &ctx.issue.repo,
                ctx.issue.number,
                ctx.cfg.defaults.comment_cooldown_hours,
            )
            .await
            .context("failed to check cooldown")?;
        if skip {
            return Err(ctx.skip("cooldown active"));
        }

        Ok(())
    }
}

// ---- 2. vectordb_prep ----

pub struct VectorDbPrep {
    vdb: Arc<VectorStore>,
    dry_run: bool,
}

impl VectorDbPrep {
    pub fn new(vdb: Arc<VectorStore>, dry_run: bool) -> Self {
        Self { vdb, dry_run }
    }
}

#[async_trait]
impl Step for VectorDbPrep {
    fn name(&self) -> &'static str {
        "vectordb_prep"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let collection = vectordb::collection_name(&ctx.issue.org);
        self.vdb
            .ensure_collection(&collection)
            .await
            .context("failed to ensure collection")
    }
}

// ---- 3. similarity_search ----

pub struct SimilaritySearch {
    embedder: Arc<FallbackEmbedder>,
    vdb: Arc<VectorStore>,
}

impl SimilaritySearch {
    pub fn new(embedder: Arc<FallbackEmbedder>, vdb: Arc<VectorStore>) -> Self {
        Self { embedder, vdb }
    }
}

#[async_trait]
impl Step for SimilaritySearch {
    fn name(&self) -> &'static str {
        "similarity_search"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        if !ctx.transfer_target.is_empty() {
            tracing::info!(
                "skipping similarity search: issue marked for transfer to {}",
                ctx.transfer_target
            );
            return Ok(());
        }

        let finder = SimilarityFinder::new(&ctx.cfg, &self.embedder, &self.vdb);
        match finder.find_similar(&ctx.issue, true).await {
            Ok(similar) if !similar.is_empty() => {
                ctx.similar_issues = similar.clone();
                ctx.result.similar_found = similar;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("similarity search failed: {}", e),
        }
        Ok(())
    }
}

// ---- 4. transfer_check ----

pub struct TransferCheck;

#[async_trait]
impl Step for TransferCheck {
    fn name(&self) -> &'static str {
        "transfer_check"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let Some(repo_cfg) = ctx.cfg.repo_config(&ctx.issue.org, &ctx.issue.repo) else {
            return Ok(());
        };
        if repo_cfg.transfer_rules.is_empty() {
            return Ok(());
        }

        let matcher = RuleMatcher::new(&repo_cfg.transfer_rules);
        let Some((target, _rule)) = matcher.matches(&ctx.issue) else {
            return Ok(());
        };
        let target = target.to_string();

        tracing::info!("transfer rule matched: {} -> {}", ctx.issue.repo, target);
        ctx.result.transfer_target = target.clone();
        ctx.transfer_target = target.clone();

        let delayed = &ctx.cfg.defaults.delayed_actions;
        if delayed.enabled {
            // Proposed only; nothing is persisted until the action executor
            // posts the unified comment and attaches the label.
            ctx.result.pending_action = Some(PendingAction {
                action_type: ActionType::Transfer,
                org: ctx.issue.org.clone(),
                repo: ctx.issue.repo.clone(),
                issue_number: ctx.issue.number,
                target,
                comment_id: 0,
                scheduled_at: Utc::now(),
                expires_at: Utc::now() + Duration::hours(delayed.delay_hours),
            });
        }

        Ok(())
    }
}

// ---- 5. triage ----

pub struct TriageAnalysis {
    agent: Option<Arc<Agent>>,
}

impl TriageAnalysis {
    pub fn new(agent: Option<Arc<Agent>>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Step for TriageAnalysis {
    fn name(&self) -> &'static str {
        "triage"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let Some(agent) = &self.agent else {
            return Ok(());
        };

        // A matched transfer pre-empts duplicate handling; closing an
        // issue that is about to move would be contradictory.
        let outcome = if ctx.transfer_target.is_empty() {
            agent
                .triage_with_similar(&ctx.issue, &ctx.similar_issues)
                .await
        } else {
            agent
                .triage_without_duplicates(&ctx.issue, &ctx.similar_issues)
                .await
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("triage failed: {}", e);
                return Ok(());
            }
        };

        // Propose a pending close for a confident duplicate, unless a
        // transfer already claimed the pending slot.
        let delayed = &ctx.cfg.defaults.delayed_actions;
        if delayed.enabled && ctx.result.pending_action.is_none() {
            if let Some(dup) = &result.duplicate {
                if dup.is_duplicate && dup.should_close {
                    if let Some(original) = &dup.original {
                        ctx.result.pending_action = Some(PendingAction {
                            action_type: ActionType::Close,
                            org: ctx.issue.org.clone(),
                            repo: ctx.issue.repo.clone(),
                            issue_number: ctx.issue.number,
                            target: original.url.clone(),
                            comment_id: 0,
                            scheduled_at: Utc::now(),
                            expires_at: Utc::now() + Duration::hours(delayed.delay_hours),
                        });
                    }
                }
            }
        }

        ctx.triage_result = Some(result.clone());
        ctx.result.triage_result = Some(result);
        Ok(())
    }
}

// ---- 6. response_builder ----

/// Composes the single consolidated response comment from whatever the
/// earlier steps produced. The comment is held in the context; posting is
/// the action executor's job.
pub struct ResponseBuilder;

#[async_trait]
impl Step for ResponseBuilder {
    fn name(&self) -> &'static str {
        "response_builder"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        ctx.comment_body = build_comment(ctx);
        Ok(())
    }
}

fn build_comment(ctx: &StepContext) -> String {
    let has_triage = ctx.result.triage_result.is_some();
    if ctx.similar_issues.is_empty() && !has_triage && ctx.transfer_target.is_empty() {
        return String::new();
    }

    let mut sections: Vec<String> = Vec::new();
    sections.push("## 🤖 Issue Intelligence Summary\n".to_string());
    sections.push("Thanks for opening this issue! Here's what I found:\n".to_string());

    if !ctx.similar_issues.is_empty() {
        let cross_repo = similarity::has_cross_repo_results(
            &ctx.similar_issues,
            &ctx.issue.org,
            &ctx.issue.repo,
        );
        sections.push(format_similar_issues_section(&ctx.similar_issues, cross_repo));
    }

    if let Some(triage_result) = &ctx.result.triage_result {
        append_triage_sections(&mut sections, triage_result);
    }

    let delayed = &ctx.cfg.defaults.delayed_actions;
    if !ctx.transfer_target.is_empty() && !(delayed.enabled && delayed.optimistic_transfers) {
        sections.push(format_transfer_section(ctx));
    }

    let mut footer = "\n---\n<sub>🤖 Powered by Simili</sub>".to_string();
    if let Some(action) = &ctx.result.pending_action {
        if let Ok(metadata) = pending::format_metadata(action) {
            footer = format!("\n\n{}{}", metadata, footer);
        }
    }
    sections.push(footer);

    sections.join("\n\n")
}

fn format_similar_issues_section(
    results: &[crate::models::SearchResult],
    cross_repo: bool,
) -> String {
    let mut out = String::from("### 🔍 Related Issues\n\n");

    if cross_repo {
        out.push_str("| Issue | Repository | Similarity | Status |\n");
        out.push_str("|-------|------------|------------|--------|\n");
    } else {
        out.push_str("| Issue | Similarity | Status |\n");
        out.push_str("|-------|------------|--------|\n");
    }

    for r in results {
        let status = if r.issue.state == "closed" {
            "🔴 Closed"
        } else {
            "🟢 Open"
        };
        let link = format!(
            "[#{} - {}]({})",
            r.issue.number,
            truncate_title(&r.issue.title, 50),
            r.issue.url
        );
        let similarity = format!("{:.0}%", r.score * 100.0);

        if cross_repo {
            out.push_str(&format!(
                "| {} | {}/{} | {} | {} |\n",
                link, r.issue.org, r.issue.repo, similarity, status
            ));
        } else {
            out.push_str(&format!("| {} | {} | {} |\n", link, similarity, status));
        }
    }

    out.push_str("\nIf any of these address your problem, please let us know!");
    out
}

fn append_triage_sections(sections: &mut Vec<String>, result: &triage::TriageResult) {
    if !result.labels.is_empty() {
        let mut lines = vec!["### 🏷️ Suggested Labels".to_string()];
        for l in &result.labels {
            lines.push(format!(
                "- `{}` ({:.0}% confidence) - {}",
                l.label,
                l.confidence * 100.0,
                l.reason
            ));
        }
        sections.push(lines.join("\n"));
    }

    if let Some(quality) = &result.quality {
        let mut line = format!("### 📊 Quality Score: {:.0}%", quality.score * 100.0);
        if quality.missing.is_empty() {
            line.push_str("\n✅ Issue is well-documented");
        } else {
            line.push_str(&format!("\n⚠️ Missing: {}", quality.missing.join(", ")));
        }
        sections.push(line);
    }

    if let Some(dup) = &result.duplicate {
        if dup.is_duplicate {
            let mut line = format!(
                "### ⚠️ Potential Duplicate\nSimilarity: {:.0}%",
                dup.similarity * 100.0
            );
            if let Some(original) = &dup.original {
                line.push_str(&format!(
                    "\nOriginal: [#{} - {}]({})",
                    original.number,
                    truncate_title(&original.title, 50),
                    original.url
                ));
            }
            sections.push(line);
        }
    }
}

fn format_transfer_section(ctx: &StepContext) -> String {
    let delayed = &ctx.cfg.defaults.delayed_actions;
    let mut out = String::from("### 🔄 Transfer Suggestion\n\n");
    out.push_str(&format!(
        "This issue appears to belong in **{}**.\n\n",
        ctx.transfer_target
    ));

    if let (true, Some(action)) = (delayed.enabled, &ctx.result.pending_action) {
        out.push_str(&format!(
            "**This issue will be transferred in {} hours.**\n\n",
            delayed.delay_hours
        ));
        out.push_str("**React to this comment:**\n");
        out.push_str(&format!(
            "- 👍 ({}) to approve and proceed with transfer\n",
            delayed.approve_reaction
        ));
        out.push_str(&format!(
            "- 👎 ({}) to cancel this transfer\n\n",
            delayed.cancel_reaction
        ));
        out.push_str(&format!(
            "**Deadline**: {}\n\n",
            action.expires_at.format("%Y-%m-%d %H:%M UTC")
        ));
        out.push_str("If no reaction is provided, the transfer will proceed automatically.");
    } else {
        out.push_str("Transfer will be executed immediately.");
    }

    out
}

fn truncate_title(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", truncated)
}

// ---- 7. action_executor ----

/// Performs the side effects in order: unified comment, transfer path,
/// remaining triage actions. Every failure here is a warning; by this
/// point the analysis succeeded and partial effects must not poison the
/// rest.
pub struct ActionExecutor {
    gh: Arc<GithubClient>,
    transfer_gh: Arc<GithubClient>,
    vdb: Arc<VectorStore>,
    dry_run: bool,
    run_actions: bool,
}

impl ActionExecutor {
    pub fn new(
        gh: Arc<GithubClient>,
        transfer_gh: Arc<GithubClient>,
        vdb: Arc<VectorStore>,
        dry_run: bool,
        run_actions: bool,
    ) -> Self {
        Self {
            gh,
            transfer_gh,
            vdb,
            dry_run,
            run_actions,
        }
    }

    async fn execute_transfer(&self, ctx: &mut StepContext, comment_id: u64) {
        let executor = TransferExecutor::new(
            &self.transfer_gh,
            &self.gh,
            &self.vdb,
            &ctx.cfg,
            self.dry_run,
        );
        let target = ctx.transfer_target.clone();
        let delayed = &ctx.cfg.defaults.delayed_actions;

        if delayed.enabled && delayed.optimistic_transfers {
            // Optimistic mode executes now; the revert path is reaction
            // driven and out of band.
            match executor.execute_transfer(&ctx.issue, &target, None).await {
                Ok(()) => {
                    ctx.result.transferred = true;
                    ctx.result.actions_executed += 1;
                }
                Err(e) => tracing::warn!("failed to execute optimistic transfer: {}", e),
            }
        } else if delayed.enabled && ctx.result.comment_posted {
            // The unified comment already carries the marker metadata;
            // scheduling is just the label.
            if let Err(e) = executor.schedule_transfer_silent(&ctx.issue, comment_id).await {
                tracing::warn!("failed to schedule transfer: {}", e);
            }
        } else {
            match executor.transfer(&ctx.issue, &target, None).await {
                Ok(()) => {
                    if !delayed.enabled {
                        ctx.result.transferred = true;
                        ctx.result.actions_executed += 1;
                    }
                }
                Err(e) => tracing::warn!("failed to transfer: {}", e),
            }
        }
    }

    async fn execute_triage_actions(&self, ctx: &mut StepContext, comment_id: u64) {
        let Some(triage_result) = ctx.triage_result.clone() else {
            return;
        };

        // The unified comment replaced the individual comment actions.
        let mut actions = triage_actions::filter_non_comment_actions(&triage_result.actions);

        if ctx.cfg.defaults.delayed_actions.enabled {
            let should_schedule_close = triage_result
                .duplicate
                .as_ref()
                .is_some_and(|d| d.is_duplicate && d.should_close)
                && ctx.result.comment_posted;

            if should_schedule_close {
                let checker = crate::triage::duplicate::DuplicateChecker::with_delayed_actions(
                    &ctx.cfg, &self.gh, self.dry_run,
                );
                if let Err(e) = checker.schedule_close_silent(&ctx.issue, comment_id).await {
                    tracing::warn!("failed to schedule close: {}", e);
                }
                actions = triage_actions::filter_close_actions(&actions);
            }
        }

        let mut filtered = triage_result;
        filtered.actions = actions;

        let executor = triage_actions::ActionExecutor::new(&self.gh, self.dry_run);
        match executor.execute(&ctx.issue, &filtered).await {
            Ok(()) => ctx.result.actions_executed += filtered.actions.len(),
            Err(e) => tracing::warn!("failed to execute triage actions: {}", e),
        }
    }
}

#[async_trait]
impl Step for ActionExecutor {
    fn name(&self) -> &'static str {
        "action_executor"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        if self.dry_run || !self.run_actions {
            tracing::info!("dry run or execute=false, skipping side effects");
            return Ok(());
        }

        let mut comment_id = 0u64;
        if !ctx.comment_body.is_empty() {
            match self
                .gh
                .post_comment_with_id(
                    &ctx.issue.org,
                    &ctx.issue.repo,
                    ctx.issue.number,
                    &ctx.comment_body,
                )
                .await
            {
                Ok(id) => {
                    ctx.result.comment_posted = true;
                    comment_id = id;
                }
                Err(e) => tracing::warn!("failed to post unified comment: {}", e),
            }
        }

        if !ctx.transfer_target.is_empty() {
            self.execute_transfer(ctx, comment_id).await;
        }

        if ctx.triage_result.is_some() {
            self.execute_triage_actions(ctx, comment_id).await;
        }

        Ok(())
    }
}

// ---- 8. indexer ----

pub struct IndexerStep {
    embedder: Arc<FallbackEmbedder>,
    vdb: Arc<VectorStore>,
    dry_run: bool,
}

impl IndexerStep {
    pub fn new(embedder: Arc<FallbackEmbedder>, vdb: Arc<VectorStore>, dry_run: bool) -> Self {
        Self {
            embedder,
            vdb,
            dry_run,
        }
    }
}

#[async_trait]
impl Step for IndexerStep {
    fn name(&self) -> &'static str {
        "indexer"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        if !ctx.transfer_target.is_empty() {
            tracing::info!("skipping indexing: issue will be transferred");
            return Ok(());
        }
        let closing_as_duplicate = ctx
            .triage_result
            .as_ref()
            .and_then(|t| t.duplicate.as_ref())
            .is_some_and(|d| d.should_close);
        if closing_as_duplicate {
            tracing::info!("skipping indexing: issue will be closed as duplicate");
            return Ok(());
        }

        if self.dry_run {
            return Ok(());
        }

        match indexer::index_single_issue(&self.embedder, &self.vdb, &ctx.issue).await {
            Ok(()) => ctx.result.indexed = true,
            Err(e) => tracing::warn!("failed to index issue: {}", e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{Issue, SearchResult};

    fn ctx_with(
        similar: Vec<SearchResult>,
        transfer_target: &str,
        cfg: Config,
    ) -> StepContext {
        let issue = Issue {
            org: "acme".to_string(),
            repo: "web".to_string(),
            number: 43,
            title: "Login broken".to_string(),
            state: "open".to_string(),
            ..Issue::default()
        };
        let mut ctx = StepContext::new(issue, Arc::new(cfg));
        ctx.similar_issues = similar;
        ctx.transfer_target = transfer_target.to_string();
        ctx
    }

    fn similar(org: &str, repo: &str, number: u64, state: &str, score: f64) -> SearchResult {
        SearchResult {
            issue: Issue {
                org: org.to_string(),
                repo: repo.to_string(),
                number,
                title: format!("issue {}", number),
                state: state.to_string(),
                url: format!("https://github.example/{}/{}/issues/{}", org, repo, number),
                ..Issue::default()
            },
            score,
        }
    }

    #[test]
    fn empty_context_builds_no_comment() {
        let ctx = ctx_with(vec![], "", Config::default());
        assert_eq!(build_comment(&ctx), "");
    }

    #[test]
    fn related_issues_table_orders_and_marks_status() {
        let ctx = ctx_with(
            vec![
                similar("acme", "web", 10, "open", 0.88),
                similar("acme", "web", 11, "closed", 0.837),
            ],
            "",
            Config::default(),
        );
        let comment = build_comment(&ctx);
        assert!(comment.contains("## 🤖 Issue Intelligence Summary"));
        assert!(comment.contains("| Issue | Similarity | Status |"));
        let open_pos = comment.find("🟢 Open").unwrap();
        let closed_pos = comment.find("🔴 Closed").unwrap();
        assert!(open_pos < closed_pos);
        assert!(comment.contains("88%"));
        assert!(comment.contains("84%"));
        assert!(comment.contains("Simili"));
    }

    #[test]
    fn cross_repo_results_add_repository_column() {
        let ctx = ctx_with(
            vec![similar("acme", "api", 5, "open", 0.9)],
            "",
            Config::default(),
        );
        let comment = build_comment(&ctx);
        assert!(comment.contains("| Issue | Repository | Similarity | Status |"));
        assert!(comment.contains("acme/api"));
    }

    #[test]
    fn transfer_section_present_when_not_optimistic() {
        let mut cfg = Config::default();
        cfg.defaults.delayed_actions.enabled = true;
        let mut ctx = ctx_with(vec![], "acme/api", cfg);
        ctx.result.pending_action = Some(PendingAction {
            action_type: ActionType::Transfer,
            org: "acme".to_string(),
            repo: "web".to_string(),
            issue_number: 43,
            target: "acme/api".to_string(),
            comment_id: 0,
            scheduled_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(24),
        });

        let comment = build_comment(&ctx);
        assert!(comment.contains("### 🔄 Transfer Suggestion"));
        assert!(comment.contains("**acme/api**"));
        assert!(comment.contains("Deadline"));
        // Marker metadata rides in the footer for silent scheduling.
        assert!(comment.contains("simili-pending-action"));
        let parsed = pending::parse_metadata(&comment).unwrap();
        assert_eq!(parsed.target, "acme/api");
    }

    #[test]
    fn optimistic_transfers_omit_the_transfer_section() {
        let mut cfg = Config::default();
        cfg.defaults.delayed_actions.enabled = true;
        cfg.defaults.delayed_actions.optimistic_transfers = true;
        let ctx = ctx_with(vec![], "acme/api", cfg);
        let comment = build_comment(&ctx);
        assert!(!comment.contains("### 🔄 Transfer Suggestion"));
    }

    #[test]
    fn titles_are_truncated_in_tables() {
        let long = "a very long issue title that keeps going and going well past fifty characters";
        assert!(truncate_title(long, 50).ends_with("..."));
        assert_eq!(truncate_title("short", 50), "short");
    }
}
