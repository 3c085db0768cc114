//! Pipeline core types: the step trait, the shared context, and the
//! graceful skip signal.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{Issue, SearchResult};
use crate::pending::PendingAction;
use crate::triage::TriageResult;

/// Graceful stop signal: the rest of the pipeline should be skipped for
/// logic reasons (repo disabled, cooldown active). Not an error condition;
/// the engine recognizes it by downcast.
#[derive(Debug, thiserror::Error)]
#[error("skip pipeline: {0}")]
pub struct SkipPipeline(pub String);

/// The external-facing result of one pipeline execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnifiedResult {
    pub issue_number: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub skip_reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub similar_found: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triage_result: Option<TriageResult>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub transferred: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub transfer_target: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub comment_posted: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub indexed: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub actions_executed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Mutable state carried through the pipeline steps. Steps communicate
/// exclusively through this context; each event gets its own instance, so
/// events can be processed concurrently without shared mutable state.
pub struct StepContext {
    pub issue: Issue,
    pub cfg: Arc<Config>,

    /// Accumulating external-facing result.
    pub result: UnifiedResult,

    /// Vector search results for downstream steps.
    pub similar_issues: Vec<SearchResult>,

    /// Matched transfer target (`"org/repo"`), empty when none.
    pub transfer_target: String,

    /// Output of the triage step.
    pub triage_result: Option<TriageResult>,

    /// The unified comment composed by the response builder; posted later
    /// by the action executor.
    pub comment_body: String,

    /// Why the pipeline stopped, when it stopped gracefully.
    pub skip_reason: String,
}

impl StepContext {
    pub fn new(issue: Issue, cfg: Arc<Config>) -> Self {
        let result = UnifiedResult {
            issue_number: issue.number,
            ..UnifiedResult::default()
        };
        Self {
            issue,
            cfg,
            result,
            similar_issues: Vec::new(),
            transfer_target: String::new(),
            triage_result: None,
            comment_body: String::new(),
            skip_reason: String::new(),
        }
    }

    /// Marks the result as skipped and returns the skip signal.
    pub fn skip(&mut self, reason: &str) -> anyhow::Error {
        self.result.skipped = true;
        self.result.skip_reason = reason.to_string();
        self.skip_reason = reason.to_string();
        SkipPipeline(reason.to_string()).into()
    }
}

/// A single unit of work in the pipeline.
#[async_trait]
pub trait Step: Send + Sync {
    /// Unique identifier, used in config overrides and logs.
    fn name(&self) -> &'static str;

    /// Executes the step. Returning an error that downcasts to
    /// [`SkipPipeline`] stops execution gracefully; any other error is a
    /// step failure the engine handles per its criticality.
    async fn run(&self, ctx: &mut StepContext) -> Result<()>;
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Step({})", self.name())
    }
}
