//! Delayed (pending) actions.
//!
//! Destructive operations (transfer, close-as-duplicate) are not executed
//! immediately: they are *proposed* on the issue itself and resolved later
//! by reactions or expiry. Durability is externalized to the issue host,
//! so pending state survives process restarts without a queue:
//!
//! 1. A **marker comment** whose body carries the sentinel
//!    `<!-- simili-pending-action: {json} -->` with the full serialized
//!    [`PendingAction`].
//! 2. A **pending label** on the issue (`pending-transfer` or
//!    `pending-close`), which is the authoritative existence signal.
//!
//! Discovery scans repositories by pending label and re-hydrates each
//! action from the first comment whose marker JSON matches the expected
//! type. At most one pending action per `(issue, type)` is represented;
//! scheduling checks the label before posting anything new.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use crate::config;
use crate::github::GithubClient;
use crate::models::Issue;
use crate::transfer::TransferExecutor;
use crate::triage::duplicate::DuplicateChecker;
use crate::vectordb::VectorStore;

pub const LABEL_PENDING_TRANSFER: &str = "pending-transfer";
pub const LABEL_PENDING_CLOSE: &str = "pending-close";

/// Substring that identifies a marker comment.
pub const METADATA_MARKER: &str = "simili-pending-action";

fn metadata_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<!-- simili-pending-action: (\{.*?\}) -->").expect("static pattern")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Transfer,
    Close,
}

impl ActionType {
    /// The pending label that represents this action type on the issue.
    pub fn label(&self) -> &'static str {
        match self {
            ActionType::Transfer => LABEL_PENDING_TRANSFER,
            ActionType::Close => LABEL_PENDING_CLOSE,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Transfer => f.write_str("transfer"),
            ActionType::Close => f.write_str("close"),
        }
    }
}

/// A proposed destructive operation awaiting confirmation or expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub org: String,
    pub repo: String,
    pub issue_number: u64,
    /// Target repo (`"org/repo"`) for transfers, original issue URL for
    /// closes.
    pub target: String,
    #[serde(default)]
    pub comment_id: u64,
    pub scheduled_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Serializes an action into its HTML-comment sentinel.
pub fn format_metadata(action: &PendingAction) -> Result<String> {
    let json = serde_json::to_string(action).context("failed to serialize pending action")?;
    Ok(format!("<!-- simili-pending-action: {} -->", json))
}

/// Extracts an action from a comment body containing the sentinel.
pub fn parse_metadata(comment_body: &str) -> Result<PendingAction> {
    let captures = metadata_regex()
        .captures(comment_body)
        .ok_or_else(|| anyhow::anyhow!("pending action metadata not found"))?;
    let action: PendingAction = serde_json::from_str(&captures[1])
        .context("failed to parse pending action metadata")?;
    Ok(action)
}

/// Schedules and discovers pending actions against the issue host.
pub struct PendingManager<'a> {
    gh: &'a GithubClient,
}

impl<'a> PendingManager<'a> {
    pub fn new(gh: &'a GithubClient) -> Self {
        Self { gh }
    }

    /// Attaches the pending label; the marker metadata is expected to be in
    /// an already-posted comment.
    pub async fn schedule(&self, issue: &Issue, action_type: ActionType) -> Result<()> {
        self.gh
            .add_labels(
                &issue.org,
                &issue.repo,
                issue.number,
                &[action_type.label().to_string()],
            )
            .await
    }

    /// True when the issue already carries the pending label for this type.
    /// Enforces the at-most-one-per-(issue,type) invariant optimistically.
    pub fn already_scheduled(issue: &Issue, action_type: ActionType) -> bool {
        issue
            .labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case(action_type.label()))
    }

    /// Full already-scheduled check: the pending label is present *and* a
    /// matching marker comment exists. A label without a marker means the
    /// pending state is torn and should be re-materialized.
    pub async fn is_scheduled(&self, issue: &Issue, action_type: ActionType) -> Result<bool> {
        if !Self::already_scheduled(issue, action_type) {
            return Ok(false);
        }
        Ok(self
            .extract_pending_action(issue, action_type)
            .await?
            .is_some())
    }

    /// Finds all pending actions in a repository by label scan.
    pub async fn find_pending_actions(&self, org: &str, repo: &str) -> Result<Vec<PendingAction>> {
        let mut actions = Vec::new();

        for action_type in [ActionType::Transfer, ActionType::Close] {
            let issues = self
                .gh
                .list_issues_by_label(org, repo, action_type.label())
                .await
                .with_context(|| format!("failed to list pending {} issues", action_type))?;

            for issue in issues {
                if let Ok(Some(action)) = self.extract_pending_action(&issue, action_type).await {
                    actions.push(action);
                }
            }
        }

        Ok(actions)
    }

    /// Re-hydrates the pending action for a single issue, if the pending
    /// label is present and a matching marker comment exists.
    pub async fn get_pending_action(&self, issue: &Issue) -> Result<Option<PendingAction>> {
        for action_type in [ActionType::Transfer, ActionType::Close] {
            if Self::already_scheduled(issue, action_type) {
                return self.extract_pending_action(issue, action_type).await;
            }
        }
        Ok(None)
    }

    async fn extract_pending_action(
        &self,
        issue: &Issue,
        action_type: ActionType,
    ) -> Result<Option<PendingAction>> {
        let comments = self
            .gh
            .list_comments(&issue.org, &issue.repo, issue.number)
            .await?;

        for comment in &comments {
            let Ok(mut action) = parse_metadata(&comment.body) else {
                continue;
            };
            if action.action_type == action_type && action.issue_number == issue.number {
                // Identity comes from where the comment was found, not from
                // possibly stale marker content.
                action.org = issue.org.clone();
                action.repo = issue.repo.clone();
                if action.comment_id == 0 {
                    action.comment_id = comment.id;
                }
                return Ok(Some(action));
            }
        }

        Ok(None)
    }

    /// Removes the pending label, dissolving the action.
    pub async fn cancel(&self, action: &PendingAction) -> Result<()> {
        self.gh
            .remove_label(
                &action.org,
                &action.repo,
                action.issue_number,
                action.action_type.label(),
            )
            .await
    }
}

/// Implements `simili process-pending`: scans every enabled repository and
/// reconciles the pending actions that have expired.
pub async fn run_process_pending(config_path: Option<&Path>, dry_run: bool) -> Result<()> {
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

    if !cfg.defaults.delayed_actions.enabled {
        println!("delayed actions are disabled in config");
        return Ok(());
    }

    let gh = GithubClient::new()?;
    let vdb = VectorStore::new(&cfg.qdrant, cfg.embedding.primary.dimensions)?;
    let manager = PendingManager::new(&gh);

    let mut processed = 0usize;
    for repo_cfg in cfg.repositories.iter().filter(|r| r.enabled) {
        println!(
            "processing pending actions for {}/{}...",
            repo_cfg.org, repo_cfg.repo
        );

        let actions = match manager.find_pending_actions(&repo_cfg.org, &repo_cfg.repo).await {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!("failed to find pending actions: {}", e);
                continue;
            }
        };

        for action in &actions {
            if !action.is_expired() {
                continue;
            }

            println!(
                "processing {} action for issue #{}...",
                action.action_type, action.issue_number
            );

            let outcome = match action.action_type {
                ActionType::Transfer => {
                    let executor = TransferExecutor::new(&gh, &gh, &vdb, &cfg, dry_run);
                    executor.process_pending_transfer(action).await
                }
                ActionType::Close => {
                    let checker =
                        DuplicateChecker::with_delayed_actions(&cfg, &gh, dry_run);
                    checker.process_pending_close(action).await
                }
            };

            match outcome {
                Ok(()) => processed += 1,
                Err(e) => tracing::warn!(
                    "failed to process {} for issue #{}: {}",
                    action.action_type,
                    action.issue_number,
                    e
                ),
            }
        }
    }

    println!("processed {} pending actions", processed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_action() -> PendingAction {
        PendingAction {
            action_type: ActionType::Transfer,
            org: "acme".to_string(),
            repo: "intake".to_string(),
            issue_number: 7,
            target: "acme/api".to_string(),
            comment_id: 123,
            scheduled_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(24),
        }
    }

    #[test]
    fn metadata_round_trips() {
        let action = sample_action();
        let metadata = format_metadata(&action).unwrap();
        assert!(metadata.starts_with("<!-- simili-pending-action: {"));
        assert!(metadata.ends_with("-->"));

        let parsed = parse_metadata(&metadata).unwrap();
        assert_eq!(parsed.action_type, ActionType::Transfer);
        assert_eq!(parsed.issue_number, 7);
        assert_eq!(parsed.target, "acme/api");
        assert_eq!(parsed.comment_id, 123);
    }

    #[test]
    fn metadata_is_found_inside_a_full_comment() {
        let action = sample_action();
        let metadata = format_metadata(&action).unwrap();
        let body = format!(
            "## Summary\n\nThis issue will be transferred.\n\n{}\n\n---\nfooter",
            metadata
        );
        let parsed = parse_metadata(&body).unwrap();
        assert_eq!(parsed.issue_number, 7);
    }

    #[test]
    fn parse_fails_without_sentinel() {
        assert!(parse_metadata("just a normal comment").is_err());
        assert!(parse_metadata("<!-- some-other-marker: {} -->").is_err());
    }

    #[test]
    fn action_type_serializes_lowercase() {
        let json = serde_json::to_string(&sample_action()).unwrap();
        assert!(json.contains(r#""type":"transfer""#));
    }

    #[test]
    fn expiry_uses_expires_at() {
        let mut action = sample_action();
        assert!(!action.is_expired());
        action.expires_at = Utc::now() - Duration::minutes(1);
        assert!(action.is_expired());
    }

    #[test]
    fn already_scheduled_checks_labels_case_insensitively() {
        let issue = Issue {
            labels: vec!["Pending-Transfer".to_string()],
            ..Issue::default()
        };
        assert!(PendingManager::already_scheduled(&issue, ActionType::Transfer));
        assert!(!PendingManager::already_scheduled(&issue, ActionType::Close));
    }
}
