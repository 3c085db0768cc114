//! Issue quality assessment: deterministic heuristics averaged with an
//! LLM judgment.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::QualityConfig;
use crate::llm::LlmProvider;
use crate::models::Issue;

use super::{strip_json_fences, truncate_text, QualityResult};

const BUG_WORDS: [&str; 5] = ["bug", "error", "crash", "broken", "not working"];
const REPRO_WORDS: [&str; 4] = [
    "steps to reproduce",
    "reproduction",
    "to reproduce",
    "how to reproduce",
];

const LLM_SYSTEM_PROMPT: &str = "You are an issue quality assessor. Analyze the issue and assess its quality.\n\
Respond with JSON containing:\n\
- \"score\": 0-1 quality score\n\
- \"missing\": array of missing information (e.g., \"reproduction steps\", \"version info\", \"expected behavior\")\n\
- \"feedback\": constructive feedback message for the author\n\n\
Be helpful and constructive. Focus on what would help maintainers understand and address the issue.";

pub struct QualityChecker {
    llm: Arc<dyn LlmProvider>,
    min_score: f64,
    needs_info_label: String,
}

impl QualityChecker {
    pub fn new(llm: Arc<dyn LlmProvider>, cfg: &QualityConfig) -> Self {
        Self {
            llm,
            min_score: cfg.min_score,
            needs_info_label: cfg.needs_info_label.clone(),
        }
    }

    /// Assesses an issue. An LLM failure degrades to the basic result.
    pub async fn check(&self, issue: &Issue) -> Result<QualityResult> {
        let basic = basic_quality_check(issue);

        match self.llm_quality_check(issue).await {
            Ok(llm_result) => Ok(merge_results(basic, llm_result)),
            Err(e) => {
                tracing::warn!("LLM quality check failed: {}", e);
                Ok(basic)
            }
        }
    }

    pub fn needs_info(&self, result: &QualityResult) -> bool {
        result.score < self.min_score
    }

    pub fn needs_info_label(&self) -> &str {
        &self.needs_info_label
    }

    async fn llm_quality_check(&self, issue: &Issue) -> Result<QualityResult> {
        let prompt = format!(
            "Issue Title: {}\n\nIssue Body:\n{}\n\nExisting Labels: {}\n\n\
             Assess this issue's quality. Return JSON only.",
            issue.title,
            truncate_text(&issue.body, 2000),
            issue.labels.join(", ")
        );

        let response = self
            .llm
            .complete_with_system(LLM_SYSTEM_PROMPT, &prompt)
            .await
            .context("LLM quality check failed")?;

        let cleaned = strip_json_fences(&response);
        let mut result: QualityResult =
            serde_json::from_str(cleaned).context("failed to parse LLM response")?;
        result.score = result.score.clamp(0.0, 1.0);
        Ok(result)
    }
}

/// Rule-based scoring: start at 1.0 and subtract for a thin body (0.3), a
/// short title (0.2), and bug language without reproduction steps (0.2).
pub fn basic_quality_check(issue: &Issue) -> QualityResult {
    let mut result = QualityResult {
        score: 1.0,
        missing: Vec::new(),
        feedback: String::new(),
    };

    if issue.body.trim().len() < 50 {
        result.score -= 0.3;
        result.missing.push("detailed description".to_string());
    }

    if issue.title.trim().len() < 10 {
        result.score -= 0.2;
        result.missing.push("descriptive title".to_string());
    }

    let body_lower = issue.body.to_lowercase();
    let mentions_bug = BUG_WORDS.iter().any(|w| body_lower.contains(w));
    let mentions_repro = REPRO_WORDS.iter().any(|w| body_lower.contains(w));
    if mentions_bug && !mentions_repro {
        result.score -= 0.2;
        result.missing.push("reproduction steps".to_string());
    }

    result.score = result.score.max(0.0);
    result
}

/// Mean of the two scores, union of missing items, LLM feedback.
fn merge_results(basic: QualityResult, llm: QualityResult) -> QualityResult {
    let mut missing = basic.missing.clone();
    for item in llm.missing {
        if !missing.contains(&item) {
            missing.push(item);
        }
    }

    QualityResult {
        score: (basic.score + llm.score) / 2.0,
        missing,
        feedback: llm.feedback,
    }
}
