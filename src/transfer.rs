//! Transfer execution.
//!
//! Transfers run in one of three modes, decided by configuration and the
//! pipeline state:
//!
//! - **immediate** when delayed actions are disabled (or as optimistic
//!   transfer),
//! - **scheduled** with a dedicated warning comment as the marker,
//! - **silently scheduled** when the unified response comment was already
//!   posted and carries the marker metadata, so no second warning comment
//!   is needed.
//!
//! Execution is idempotent: a prior `"automatically transferred to"`
//! comment short-circuits the whole operation, and the trailing cleanup
//! steps (pending-label removal, old-vector deletion) only warn on failure.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};

use crate::config::{Config, TransferRule};
use crate::github::{self, GithubClient, ReactionDecision};
use crate::models::{issue_uuid, Issue};
use crate::pending::{self, ActionType, PendingAction, PendingManager};
use crate::vectordb::{self, VectorStore};

pub struct TransferExecutor<'a> {
    /// Client for the transfer mutation; may carry elevated permissions.
    transfer_client: &'a GithubClient,
    /// Client for comments and labels; the bot identity.
    comment_client: &'a GithubClient,
    vdb: &'a VectorStore,
    cfg: &'a Config,
    dry_run: bool,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(
        transfer_client: &'a GithubClient,
        comment_client: &'a GithubClient,
        vdb: &'a VectorStore,
        cfg: &'a Config,
        dry_run: bool,
    ) -> Self {
        Self {
            transfer_client,
            comment_client,
            vdb,
            cfg,
            dry_run,
        }
    }

    fn pending(&self) -> PendingManager<'a> {
        PendingManager::new(self.comment_client)
    }

    /// Transfers an issue, or schedules the transfer when delayed actions
    /// are enabled. No-op when a prior comment marks it as done.
    pub async fn transfer(
        &self,
        issue: &Issue,
        target_repo: &str,
        rule: Option<&TransferRule>,
    ) -> Result<()> {
        let (target_org, target_name) = github::parse_repo(target_repo)?;

        let exists = self
            .transfer_client
            .repo_exists(&target_org, &target_name)
            .await
            .context("failed to check target repo")?;
        if !exists {
            anyhow::bail!("target repo {} does not exist", target_repo);
        }

        let transferred = self
            .comment_client
            .was_already_transferred(&issue.org, &issue.repo, issue.number)
            .await
            .context("failed to check transfer status")?;
        if transferred {
            return Ok(());
        }

        if self.cfg.defaults.delayed_actions.enabled {
            return self.schedule_transfer(issue, target_repo, rule).await;
        }

        self.execute_transfer(issue, target_repo, rule).await
    }

    /// Schedules a delayed transfer with its own warning comment.
    pub async fn schedule_transfer(
        &self,
        issue: &Issue,
        target_repo: &str,
        rule: Option<&TransferRule>,
    ) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if self
            .pending()
            .is_scheduled(issue, ActionType::Transfer)
            .await?
        {
            tracing::info!(
                "transfer already scheduled for {}#{}",
                issue.full_repo(),
                issue.number
            );
            return Ok(());
        }

        let delayed = &self.cfg.defaults.delayed_actions;
        let mut action = PendingAction {
            action_type: ActionType::Transfer,
            org: issue.org.clone(),
            repo: issue.repo.clone(),
            issue_number: issue.number,
            target: target_repo.to_string(),
            comment_id: 0,
            scheduled_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(delayed.delay_hours),
        };

        let comment = format_delayed_transfer_comment(target_repo, rule, &action, self.cfg)?;
        let comment_id = self
            .comment_client
            .post_comment_with_id(&issue.org, &issue.repo, issue.number, &comment)
            .await
            .context("failed to post warning comment")?;
        action.comment_id = comment_id;

        self.pending().schedule(issue, ActionType::Transfer).await
    }

    /// Schedules a delayed transfer reusing an already-posted unified
    /// comment (which carries the marker metadata) as the marker. Only the
    /// pending label is added; no second warning comment is posted.
    pub async fn schedule_transfer_silent(&self, issue: &Issue, _comment_id: u64) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if PendingManager::already_scheduled(issue, ActionType::Transfer) {
            return Ok(());
        }
        self.pending().schedule(issue, ActionType::Transfer).await
    }

    /// Reconciles one pending transfer against reactions and expiry.
    pub async fn process_pending_transfer(&self, action: &PendingAction) -> Result<()> {
        let transferred = self
            .comment_client
            .was_already_transferred(&action.org, &action.repo, action.issue_number)
            .await
            .context("failed to check transfer status")?;
        if transferred {
            // Already done elsewhere; just dissolve the pending state.
            return self.pending().cancel(action).await;
        }

        let delayed = &self.cfg.defaults.delayed_actions;
        let decision = self
            .comment_client
            .check_reaction_decision(
                &action.org,
                &action.repo,
                action.comment_id,
                &delayed.approve_reaction,
                &delayed.cancel_reaction,
            )
            .await
            .context("failed to check reactions")?;

        let issue = Issue {
            org: action.org.clone(),
            repo: action.repo.clone(),
            number: action.issue_number,
            ..Issue::default()
        };

        match decision {
            ReactionDecision::Cancel => {
                self.pending().cancel(action).await?;
                let comment = format_transfer_cancelled_comment(&action.target);
                self.comment_client
                    .post_comment(&action.org, &action.repo, action.issue_number, &comment)
                    .await
            }
            ReactionDecision::Approve if delayed.execute_on_approve => {
                self.execute_transfer(&issue, &action.target, None).await
            }
            _ if action.is_expired() => {
                self.execute_transfer(&issue, &action.target, None).await
            }
            _ => Ok(()),
        }
    }

    /// Performs the transfer: comment, mutation, label cleanup, old-vector
    /// deletion. The last two failures are warnings, not errors, so a
    /// retry after a partial failure converges.
    pub async fn execute_transfer(
        &self,
        issue: &Issue,
        target_repo: &str,
        rule: Option<&TransferRule>,
    ) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }

        let comment = format_transfer_comment(target_repo, rule);
        self.comment_client
            .post_comment(&issue.org, &issue.repo, issue.number, &comment)
            .await
            .context("failed to post transfer comment")?;

        self.transfer_client
            .transfer_issue(&issue.org, &issue.repo, issue.number, target_repo)
            .await
            .context("failed to transfer issue")?;

        if let Err(e) = self
            .comment_client
            .remove_label(
                &issue.org,
                &issue.repo,
                issue.number,
                pending::LABEL_PENDING_TRANSFER,
            )
            .await
        {
            tracing::warn!(
                "failed to remove pending-transfer label from {}#{}: {}",
                issue.full_repo(),
                issue.number,
                e
            );
        }

        // The transferred issue gets a new identity in the target repo; the
        // old point must not linger in the index.
        let collection = vectordb::collection_name(&issue.org);
        let id = issue_uuid(&issue.org, &issue.repo, issue.number);
        if let Err(e) = self.vdb.delete(&collection, &id).await {
            tracing::warn!("failed to delete old vector: {}", e);
        }

        Ok(())
    }
}

const FOOTER: &str = "---\n<sub>🤖 Powered by Simili</sub>";

fn format_transfer_comment(target_repo: &str, rule: Option<&TransferRule>) -> String {
    format!(
        "🚚 This issue has been automatically transferred to **{}** because it matches our routing rules.\n\n\
         **Matched rule:** {}\n\n\
         The discussion will continue there. Thanks for your report!\n\n{}",
        target_repo,
        format_match_description(rule),
        FOOTER
    )
}

fn format_delayed_transfer_comment(
    target_repo: &str,
    rule: Option<&TransferRule>,
    action: &PendingAction,
    cfg: &Config,
) -> Result<String> {
    let delayed = &cfg.defaults.delayed_actions;
    let deadline = action.expires_at.format("%Y-%m-%d %H:%M UTC");
    let metadata = pending::format_metadata(action)?;

    Ok(format!(
        "⚠️ **This issue will be transferred to {} in {} hours**\n\n\
         **Matched rule:** {}\n\n\
         **React to this comment:**\n\
         - 👍 ({}) to approve and proceed with this transfer\n\
         - 👎 ({}) to cancel this transfer\n\n\
         **Deadline**: {}\n\n\
         If no reaction is provided, the transfer will proceed automatically.\n\n\
         {}\n\n{}",
        target_repo,
        delayed.delay_hours,
        format_match_description(rule),
        delayed.approve_reaction,
        delayed.cancel_reaction,
        deadline,
        metadata,
        FOOTER
    ))
}

fn format_transfer_cancelled_comment(target_repo: &str) -> String {
    format!(
        "✅ Transfer to **{}** has been cancelled based on your reaction.\n\n\
         The issue will remain in this repository.\n\n{}",
        target_repo, FOOTER
    )
}

fn format_match_description(rule: Option<&TransferRule>) -> String {
    let Some(rule) = rule else {
        return "routing rules".to_string();
    };

    let mut parts = Vec::new();
    let m = &rule.r#match;
    if !m.labels.is_empty() {
        parts.push(format!("`labels: [{}]`", m.labels.join(", ")));
    }
    if !m.title_contains.is_empty() {
        parts.push(format!("`title_contains: [{}]`", m.title_contains.join(", ")));
    }
    if !m.body_contains.is_empty() {
        parts.push(format!("`body_contains: [{}]`", m.body_contains.join(", ")));
    }
    if !m.author.is_empty() {
        parts.push(format!("`author: {}`", m.author));
    }

    if parts.is_empty() {
        "routing rules".to_string()
    } else {
        parts.join(" + ")
    }
}
