//! Webhook event payload parsing.
//!
//! Events arrive as JSON files (the path is handed to `simili process
//! --event-path`, typically from a CI runner's event file). The payload
//! carries an `action` discriminator plus nested issue, repository, and
//! sender objects; only the fields the pipeline consumes are modeled here.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::Issue;

/// A webhook event as delivered by the issue host.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub action: String,
    pub issue: Option<EventIssue>,
    #[serde(rename = "repository")]
    pub repo: Option<EventRepo>,
    pub comment: Option<EventComment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventIssue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub html_url: String,
    pub user: Option<EventUser>,
    #[serde(default)]
    pub labels: Vec<EventLabel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRepo {
    #[serde(default)]
    pub full_name: String,
    pub owner: EventUser,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventComment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
}

/// What the dispatcher should do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Opened,
    Edited,
    Closed,
    Reopened,
    Deleted,
    Comment,
    Other,
}

impl Event {
    /// Classifies the event for dispatch.
    ///
    /// Comment events are detected by the presence of the `comment` object,
    /// regardless of the comment action (created/edited), since any of them
    /// is a cue to re-check pending actions on the issue.
    pub fn kind(&self) -> EventKind {
        if self.comment.is_some() {
            return EventKind::Comment;
        }
        if self.issue.is_none() {
            return EventKind::Other;
        }
        match self.action.as_str() {
            "opened" => EventKind::Opened,
            "edited" => EventKind::Edited,
            "closed" => EventKind::Closed,
            "reopened" => EventKind::Reopened,
            "deleted" => EventKind::Deleted,
            _ => EventKind::Other,
        }
    }

    /// Normalizes the payload into the internal [`Issue`] model.
    ///
    /// Returns `None` when the payload has no issue or repository object.
    pub fn to_issue(&self) -> Option<Issue> {
        let issue = self.issue.as_ref()?;
        let repo = self.repo.as_ref()?;

        Some(Issue {
            org: repo.owner.login.clone(),
            repo: repo.name.clone(),
            number: issue.number,
            title: issue.title.clone(),
            body: issue.body.clone().unwrap_or_default(),
            state: issue.state.clone(),
            labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
            author: issue
                .user
                .as_ref()
                .map(|u| u.login.clone())
                .unwrap_or_default(),
            url: issue.html_url.clone(),
            created_at: None,
            updated_at: None,
        })
    }
}

/// Reads and parses an event JSON file.
pub fn parse_event_file(path: &Path) -> Result<Event> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read event file: {}", path.display()))?;
    let event: Event =
        serde_json::from_str(&data).with_context(|| "failed to parse event JSON")?;
    Ok(event)
}
