//! Duplicate detection and the delayed close-as-duplicate path.
//!
//! Detection itself is a pure decision over similarity results. The
//! [`DuplicateChecker`] adds the side-effecting half: scheduling a pending
//! close on the issue host and reconciling it later against reactions and
//! expiry, mirroring the transfer flow.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};

use crate::config::{Config, DuplicateConfig};
use crate::github::{GithubClient, ReactionDecision};
use crate::models::{Issue, SearchResult};
use crate::pending::{self, ActionType, PendingAction, PendingManager};

use super::{Action, DuplicateResult, TriageActionType};

/// Label applied when a proposed auto-close is cancelled by reaction.
pub const POTENTIAL_DUPLICATE_LABEL: &str = "potential-duplicate";

/// Label applied when an issue is closed as a duplicate.
pub const DUPLICATE_LABEL: &str = "duplicate";

/// Decides whether the issue is a duplicate of the best similar match.
///
/// Prefers the highest-scoring open match; falls back to the highest
/// overall (a closed original is still worth linking).
pub fn check(similar: &[SearchResult], cfg: &DuplicateConfig) -> DuplicateResult {
    let best_open = similar
        .iter()
        .filter(|r| r.issue.state == "open")
        .max_by(|a, b| a.score.total_cmp(&b.score));
    let best = best_open.or_else(|| {
        similar
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    });

    let Some(best) = best else {
        return DuplicateResult {
            is_duplicate: false,
            similarity: 0.0,
            original: None,
            should_close: false,
        };
    };

    let is_duplicate = best.score >= cfg.auto_close_threshold;
    DuplicateResult {
        is_duplicate,
        similarity: best.score,
        original: Some(best.issue.clone()),
        should_close: is_duplicate && !cfg.require_confirmation,
    }
}

/// Actions for a detected duplicate: label, notify, optionally close.
pub fn get_actions(result: &DuplicateResult) -> Vec<Action> {
    let Some(original) = &result.original else {
        return Vec::new();
    };
    if !result.is_duplicate {
        return Vec::new();
    }

    let mut actions = vec![
        Action {
            action_type: TriageActionType::AddLabel,
            label: DUPLICATE_LABEL.to_string(),
            comment: String::new(),
            reason: format!(
                "{:.0}% similarity to #{}",
                result.similarity * 100.0,
                original.number
            ),
        },
        Action {
            action_type: TriageActionType::Comment,
            label: String::new(),
            comment: format_duplicate_comment(result, result.should_close),
            reason: "notify author of duplicate".to_string(),
        },
    ];

    if result.should_close {
        actions.push(Action {
            action_type: TriageActionType::Close,
            label: String::new(),
            comment: String::new(),
            reason: format!(
                "auto-close duplicate ({:.0}% similarity)",
                result.similarity * 100.0
            ),
        });
    }

    actions
}

pub fn format_duplicate_comment(result: &DuplicateResult, auto_close: bool) -> String {
    let Some(original) = &result.original else {
        return String::new();
    };

    let mut body = String::new();
    if auto_close {
        body.push_str("🔒 This issue has been automatically closed as a duplicate.\n\n");
    } else {
        body.push_str("⚠️ This issue appears to be a duplicate.\n\n");
    }

    body.push_str(&format!(
        "**Original issue:** [#{} - {}]({})\n",
        original.number, original.title, original.url
    ));
    body.push_str(&format!(
        "**Similarity:** {:.0}%\n\n",
        result.similarity * 100.0
    ));

    if auto_close {
        body.push_str("If you believe this is not a duplicate, please comment and we will reopen it.\n\n");
    } else {
        body.push_str(
            "Please review the linked issue. If it addresses your concern, \
             consider closing this issue and following the original.\n\n",
        );
    }

    body.push_str("---\n<sub>🤖 Powered by Simili</sub>");
    body
}

/// Side-effecting half of duplicate handling: delayed close scheduling and
/// reconciliation.
pub struct DuplicateChecker<'a> {
    gh: &'a GithubClient,
    cfg: &'a Config,
    dry_run: bool,
}

impl<'a> DuplicateChecker<'a> {
    pub fn with_delayed_actions(cfg: &'a Config, gh: &'a GithubClient, dry_run: bool) -> Self {
        Self { gh, cfg, dry_run }
    }

    fn pending(&self) -> PendingManager<'a> {
        PendingManager::new(self.gh)
    }

    /// Schedules a delayed close reusing an already-posted unified comment
    /// as the marker. Only the pending label is added.
    pub async fn schedule_close_silent(&self, issue: &Issue, _comment_id: u64) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if PendingManager::already_scheduled(issue, ActionType::Close) {
            return Ok(());
        }
        self.pending().schedule(issue, ActionType::Close).await
    }

    /// Schedules a delayed close with its own warning comment.
    pub async fn schedule_close(&self, issue: &Issue, result: &DuplicateResult) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if !self.cfg.defaults.delayed_actions.enabled {
            anyhow::bail!("delayed actions disabled");
        }
        let original = result
            .original
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("cannot schedule close: original issue missing"))?;
        if self.pending().is_scheduled(issue, ActionType::Close).await? {
            return Ok(());
        }

        let delayed = &self.cfg.defaults.delayed_actions;
        let mut action = PendingAction {
            action_type: ActionType::Close,
            org: issue.org.clone(),
            repo: issue.repo.clone(),
            issue_number: issue.number,
            target: original.url.clone(),
            comment_id: 0,
            scheduled_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(delayed.delay_hours),
        };

        let comment = self.format_delayed_close_comment(result, &action)?;
        let comment_id = self
            .gh
            .post_comment_with_id(&issue.org, &issue.repo, issue.number, &comment)
            .await
            .context("failed to post warning comment")?;
        action.comment_id = comment_id;

        self.pending().schedule(issue, ActionType::Close).await
    }

    /// Reconciles one pending close against reactions and expiry.
    pub async fn process_pending_close(&self, action: &PendingAction) -> Result<()> {
        let issue = self
            .gh
            .get_issue(&action.org, &action.repo, action.issue_number)
            .await
            .context("failed to get issue")?;
        if issue.state == "closed" {
            // Someone beat us to it; drop the pending state.
            return self.pending().cancel(action).await;
        }

        let delayed = &self.cfg.defaults.delayed_actions;
        let decision = self
            .gh
            .check_reaction_decision(
                &action.org,
                &action.repo,
                action.comment_id,
                &delayed.approve_reaction,
                &delayed.cancel_reaction,
            )
            .await
            .context("failed to check reactions")?;

        if self.dry_run {
            return Ok(());
        }

        match decision {
            ReactionDecision::Cancel => {
                self.pending().cancel(action).await?;
                self.gh
                    .add_labels(
                        &action.org,
                        &action.repo,
                        action.issue_number,
                        &[POTENTIAL_DUPLICATE_LABEL.to_string()],
                    )
                    .await?;
                self.gh
                    .post_comment(
                        &action.org,
                        &action.repo,
                        action.issue_number,
                        &format_close_cancelled_comment(),
                    )
                    .await
            }
            ReactionDecision::Approve if delayed.execute_on_approve => {
                self.execute_close(action).await
            }
            _ if action.is_expired() => self.execute_close(action).await,
            _ => Ok(()),
        }
    }

    /// Label, close with reason `not_planned`, drop the pending label
    /// (warning-only on failure).
    async fn execute_close(&self, action: &PendingAction) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }

        self.gh
            .add_labels(
                &action.org,
                &action.repo,
                action.issue_number,
                &[DUPLICATE_LABEL.to_string()],
            )
            .await?;

        self.gh
            .close_issue(&action.org, &action.repo, action.issue_number, "not_planned")
            .await?;

        if let Err(e) = self.pending().cancel(action).await {
            tracing::warn!(
                "failed to remove pending-close label from {}/{}#{}: {}",
                action.org,
                action.repo,
                action.issue_number,
                e
            );
        }

        Ok(())
    }

    fn format_delayed_close_comment(
        &self,
        result: &DuplicateResult,
        action: &PendingAction,
    ) -> Result<String> {
        let original = result
            .original
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("original issue missing"))?;
        let delayed = &self.cfg.defaults.delayed_actions;
        let deadline = action.expires_at.format("%Y-%m-%d %H:%M UTC");
        let metadata = pending::format_metadata(action)?;

        Ok(format!(
            "⚠️ **This issue will be closed as a duplicate in {} hours**\n\n\
             **Original issue:** [#{} - {}]({})\n\
             **Similarity:** {:.0}%\n\n\
             **React to this comment:**\n\
             - 👍 ({}) to approve and proceed with closing\n\
             - 👎 ({}) to cancel and add potential-duplicate label instead\n\n\
             **Deadline**: {}\n\n\
             If no reaction is provided, the issue will be closed automatically.\n\n\
             {}\n\n---\n<sub>🤖 Powered by Simili</sub>",
            delayed.delay_hours,
            original.number,
            original.title,
            original.url,
            result.similarity * 100.0,
            delayed.approve_reaction,
            delayed.cancel_reaction,
            deadline,
            metadata,
        ))
    }
}

fn format_close_cancelled_comment() -> String {
    "✅ Auto-close has been cancelled based on your reaction.\n\n\
     The issue will remain open and has been labeled as `potential-duplicate` for maintainer review.\n\n\
     ---\n<sub>🤖 Powered by Simili</sub>"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(state: &str, number: u64, score: f64) -> SearchResult {
        SearchResult {
            issue: Issue {
                state: state.to_string(),
                number,
                url: format!("https://github.example/acme/web/issues/{}", number),
                title: format!("issue {}", number),
                ..Issue::default()
            },
            score,
        }
    }

    fn cfg(threshold: f64, require_confirm: bool) -> DuplicateConfig {
        DuplicateConfig {
            enabled: true,
            auto_close_threshold: threshold,
            require_confirmation: require_confirm,
        }
    }

    #[test]
    fn best_open_match_is_preferred_over_higher_closed() {
        let similar = vec![result("closed", 1, 0.99), result("open", 2, 0.96)];
        let dup = check(&similar, &cfg(0.95, false));
        assert!(dup.is_duplicate);
        assert_eq!(dup.original.unwrap().number, 2);
        assert!((dup.similarity - 0.96).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_closed_when_no_open_match() {
        let similar = vec![result("closed", 1, 0.97), result("closed", 3, 0.96)];
        let dup = check(&similar, &cfg(0.95, false));
        assert!(dup.is_duplicate);
        assert_eq!(dup.original.unwrap().number, 1);
    }

    #[test]
    fn below_threshold_is_not_a_duplicate() {
        let similar = vec![result("open", 1, 0.90)];
        let dup = check(&similar, &cfg(0.95, false));
        assert!(!dup.is_duplicate);
        assert!(!dup.should_close);
        // The best match is still reported for the comment.
        assert!(dup.original.is_some());
    }

    #[test]
    fn require_confirmation_blocks_auto_close() {
        let similar = vec![result("open", 1, 0.97)];
        let dup = check(&similar, &cfg(0.95, true));
        assert!(dup.is_duplicate);
        assert!(!dup.should_close);
    }

    #[test]
    fn empty_results_mean_no_duplicate() {
        let dup = check(&[], &cfg(0.95, false));
        assert!(!dup.is_duplicate);
        assert!(dup.original.is_none());
    }

    #[test]
    fn auto_close_duplicate_yields_three_actions() {
        let similar = vec![result("open", 1, 0.97)];
        let dup = check(&similar, &cfg(0.95, false));
        let actions = get_actions(&dup);
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].action_type, TriageActionType::AddLabel);
        assert_eq!(actions[0].label, DUPLICATE_LABEL);
        assert_eq!(actions[1].action_type, TriageActionType::Comment);
        assert_eq!(actions[2].action_type, TriageActionType::Close);
    }

    #[test]
    fn non_duplicate_yields_no_actions() {
        let similar = vec![result("open", 1, 0.5)];
        let dup = check(&similar, &cfg(0.95, false));
        assert!(get_actions(&dup).is_empty());
    }
}
