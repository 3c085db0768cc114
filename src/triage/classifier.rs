//! Label classification: a keyword rule pass, then an LLM pass over the
//! labels the rules did not reach.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{ClassifierConfig, LabelConfig};
use crate::llm::LlmProvider;
use crate::models::Issue;

use super::{strip_json_fences, truncate_text, LabelResult};

const LLM_SYSTEM_PROMPT: &str = "You are an issue classification assistant. Analyze the issue and determine which labels apply.\n\
Respond with a JSON array of objects with \"label\", \"confidence\" (0-1), and \"reason\" fields.\n\
Only include labels that are relevant. Be conservative - only assign labels you are confident about.";

pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    labels: Vec<LabelConfig>,
    min_confidence: f64,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>, cfg: &ClassifierConfig) -> Self {
        Self {
            llm,
            labels: cfg.labels.clone(),
            min_confidence: cfg.min_confidence,
        }
    }

    /// Suggests labels for an issue. An LLM failure degrades to the
    /// rule-based results alone.
    pub async fn classify(&self, issue: &Issue) -> Result<Vec<LabelResult>> {
        let rule_results = self.classify_by_rules(issue);

        let llm_results = match self.classify_by_llm(issue, &rule_results).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("LLM classification failed: {}", e);
                return Ok(self.apply_min_confidence(rule_results));
            }
        };

        Ok(self.merge_results(rule_results, llm_results))
    }

    /// Keyword scoring: `matched / total` keywords, capped at 1.0.
    fn classify_by_rules(&self, issue: &Issue) -> Vec<LabelResult> {
        let text = format!("{} {}", issue.title, issue.body).to_lowercase();
        let mut results = Vec::new();

        for label in &self.labels {
            if label.keywords.is_empty() {
                continue;
            }

            let matches = label
                .keywords
                .iter()
                .filter(|kw| text.contains(&kw.to_lowercase()))
                .count();
            if matches == 0 {
                continue;
            }

            let confidence = (matches as f64 / label.keywords.len() as f64).min(1.0);
            results.push(LabelResult {
                label: label.name.clone(),
                confidence,
                reason: "keyword match".to_string(),
            });
        }

        results
    }

    async fn classify_by_llm(
        &self,
        issue: &Issue,
        existing: &[LabelResult],
    ) -> Result<Vec<LabelResult>> {
        let assigned: Vec<&str> = existing.iter().map(|r| r.label.as_str()).collect();
        let remaining: Vec<&str> = self
            .labels
            .iter()
            .map(|l| l.name.as_str())
            .filter(|name| !assigned.contains(name))
            .collect();

        if remaining.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = format!(
            "Issue Title: {}\n\nIssue Body:\n{}\n\nAvailable Labels: {}\n\n\
             Classify this issue. Return JSON array only, no other text.",
            issue.title,
            truncate_text(&issue.body, 2000),
            remaining.join(", ")
        );

        let response = self
            .llm
            .complete_with_system(LLM_SYSTEM_PROMPT, &prompt)
            .await
            .context("LLM classification failed")?;

        parse_classification_response(&response, &remaining)
    }

    fn merge_results(
        &self,
        rule_results: Vec<LabelResult>,
        llm_results: Vec<LabelResult>,
    ) -> Vec<LabelResult> {
        let mut by_label: BTreeMap<String, LabelResult> = BTreeMap::new();

        for result in llm_results {
            by_label.insert(result.label.clone(), result);
        }
        for result in rule_results {
            match by_label.get(&result.label) {
                Some(existing) if existing.confidence >= result.confidence => {}
                _ => {
                    by_label.insert(result.label.clone(), result);
                }
            }
        }

        self.apply_min_confidence(by_label.into_values().collect())
    }

    fn apply_min_confidence(&self, results: Vec<LabelResult>) -> Vec<LabelResult> {
        results
            .into_iter()
            .filter(|r| r.confidence >= self.min_confidence)
            .collect()
    }
}

/// Parses the LLM's JSON array, filtering to the labels it was asked about.
fn parse_classification_response(
    response: &str,
    valid_labels: &[&str],
) -> Result<Vec<LabelResult>> {
    let cleaned = strip_json_fences(response);
    let results: Vec<LabelResult> =
        serde_json::from_str(cleaned).context("failed to parse LLM response")?;

    Ok(results
        .into_iter()
        .filter(|r| valid_labels.contains(&r.label.as_str()))
        .map(|mut r| {
            r.reason = "LLM classification".to_string();
            r
        })
        .collect())
}
