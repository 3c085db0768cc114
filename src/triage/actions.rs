//! Triage action execution and result persistence.
//!
//! Actions are applied one by one; an individual failure is logged and the
//! rest still run, so a flaky label call cannot block the close or the
//! comment. Results can be written to a JSON file and replayed later with
//! `simili triage-execute`.

use anyhow::{Context, Result};
use std::path::Path;

use crate::github::GithubClient;
use crate::models::Issue;

use super::{Action, TriageActionType, TriageResult};

pub struct ActionExecutor<'a> {
    gh: &'a GithubClient,
    dry_run: bool,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(gh: &'a GithubClient, dry_run: bool) -> Self {
        Self { gh, dry_run }
    }

    /// Applies every action in the result, continuing past failures.
    pub async fn execute(&self, issue: &Issue, result: &TriageResult) -> Result<()> {
        for action in &result.actions {
            if let Err(e) = self.execute_action(issue, action).await {
                tracing::warn!("error executing action {:?}: {}", action.action_type, e);
            }
        }
        Ok(())
    }

    async fn execute_action(&self, issue: &Issue, action: &Action) -> Result<()> {
        tracing::info!(
            "executing action: {:?} (reason: {})",
            action.action_type,
            action.reason
        );

        if self.dry_run {
            return Ok(());
        }

        match action.action_type {
            TriageActionType::AddLabel => {
                self.gh
                    .add_labels(
                        &issue.org,
                        &issue.repo,
                        issue.number,
                        &[action.label.clone()],
                    )
                    .await
            }
            TriageActionType::RemoveLabel => {
                self.gh
                    .remove_label(&issue.org, &issue.repo, issue.number, &action.label)
                    .await
            }
            TriageActionType::Comment => {
                self.gh
                    .post_comment(&issue.org, &issue.repo, issue.number, &action.comment)
                    .await
            }
            TriageActionType::Close => {
                self.gh
                    .close_issue(&issue.org, &issue.repo, issue.number, "not_planned")
                    .await
            }
        }
    }
}

/// Drops comment actions; used when the unified comment already carries
/// the triage output.
pub fn filter_non_comment_actions(actions: &[Action]) -> Vec<Action> {
    actions
        .iter()
        .filter(|a| a.action_type != TriageActionType::Comment)
        .cloned()
        .collect()
}

/// Drops close actions; used when the close is scheduled as a pending
/// action instead of executed inline.
pub fn filter_close_actions(actions: &[Action]) -> Vec<Action> {
    actions
        .iter()
        .filter(|a| a.action_type != TriageActionType::Close)
        .cloned()
        .collect()
}

/// Writes a triage result to a JSON file.
pub fn write_output(result: &TriageResult, path: &Path) -> Result<()> {
    let data = serde_json::to_string_pretty(result).context("failed to serialize result")?;
    std::fs::write(path, data)
        .with_context(|| format!("failed to write output: {}", path.display()))?;
    Ok(())
}

/// Reads a triage result from a JSON file.
pub fn read_output(path: &Path) -> Result<TriageResult> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read output: {}", path.display()))?;
    let result: TriageResult =
        serde_json::from_str(&data).context("failed to parse triage result")?;
    Ok(result)
}

/// Implements `simili triage-execute`: applies a pre-computed triage
/// result (from `--input`) to the issue described by `--issue`.
pub async fn run_triage_execute(input: &Path, issue_path: &Path, dry_run: bool) -> Result<()> {
    let result = read_output(input)?;

    let issue_data = std::fs::read_to_string(issue_path)
        .with_context(|| format!("failed to read issue file: {}", issue_path.display()))?;
    let issue: Issue =
        serde_json::from_str(&issue_data).context("failed to parse issue JSON")?;

    let gh = GithubClient::new()?;
    let executor = ActionExecutor::new(&gh, dry_run);
    executor.execute(&issue, &result).await?;

    println!(
        "executed {} actions on {}#{}",
        result.actions.len(),
        issue.full_repo(),
        issue.number
    );
    Ok(())
}
