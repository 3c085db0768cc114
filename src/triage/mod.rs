//! Issue triage: label classification, quality assessment, and duplicate
//! detection.
//!
//! Each sub-checker combines a cheap rule pass with an LLM pass and
//! degrades gracefully: an LLM failure or unparseable response means "no
//! signal" for that sub-task, never a pipeline failure. The agent's output
//! is a [`TriageResult`] carrying both the analysis and the list of
//! [`Action`]s to apply, which can be executed directly or serialized to a
//! file and executed later by `simili triage-execute`.

pub mod actions;
pub mod classifier;
pub mod duplicate;
pub mod quality;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::llm::LlmProvider;
use crate::models::{Issue, SearchResult};

use self::classifier::Classifier;
use self::quality::QualityChecker;

/// Complete triage analysis for one issue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<DuplicateResult>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelResult {
    pub label: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityResult {
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateResult {
    pub is_duplicate: bool,
    pub similarity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Issue>,
    pub should_close: bool,
}

/// One side effect the triage pass wants applied to the issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: TriageActionType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageActionType {
    AddLabel,
    RemoveLabel,
    Comment,
    Close,
}

/// Strips fenced code markers from an LLM response so strict-JSON output
/// survives models that wrap it in markdown.
pub(crate) fn strip_json_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let trimmed = trimmed.strip_prefix("```json").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix("```").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim()
}

pub(crate) fn truncate_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

/// Orchestrates the triage sub-checkers.
pub struct Agent {
    cfg: Config,
    classifier: Classifier,
    quality: QualityChecker,
}

impl Agent {
    pub fn new(cfg: &Config, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            cfg: cfg.clone(),
            classifier: Classifier::new(llm.clone(), &cfg.triage.classifier),
            quality: QualityChecker::new(llm, &cfg.triage.quality),
        }
    }

    /// Full triage over pre-fetched similarity results.
    ///
    /// A high-confidence duplicate with `should_close` short-circuits the
    /// remaining analysis; labeling a doomed issue is wasted work.
    pub async fn triage_with_similar(
        &self,
        issue: &Issue,
        similar: &[SearchResult],
    ) -> Result<TriageResult> {
        let mut result = TriageResult::default();

        if self.cfg.triage.duplicate.enabled && !similar.is_empty() {
            let dup = duplicate::check(similar, &self.cfg.triage.duplicate);
            if dup.is_duplicate {
                result
                    .actions
                    .extend(duplicate::get_actions(&dup));
                let should_close = dup.should_close;
                result.duplicate = Some(dup);
                if should_close {
                    return Ok(result);
                }
            } else {
                result.duplicate = Some(dup);
            }
        }

        self.classify_and_score(issue, &mut result).await;
        Ok(result)
    }

    /// Triage without duplicate analysis; used when a transfer rule has
    /// already claimed the issue and duplicate handling would conflict.
    pub async fn triage_without_duplicates(
        &self,
        issue: &Issue,
        _similar: &[SearchResult],
    ) -> Result<TriageResult> {
        let mut result = TriageResult::default();
        self.classify_and_score(issue, &mut result).await;
        Ok(result)
    }

    async fn classify_and_score(&self, issue: &Issue, result: &mut TriageResult) {
        if self.cfg.triage.classifier.enabled {
            match self.classifier.classify(issue).await {
                Ok(labels) => {
                    for l in &labels {
                        result.actions.push(Action {
                            action_type: TriageActionType::AddLabel,
                            label: l.label.clone(),
                            comment: String::new(),
                            reason: l.reason.clone(),
                        });
                    }
                    result.labels = labels;
                }
                Err(e) => tracing::warn!("label classification failed: {}", e),
            }
        }

        if self.cfg.triage.quality.enabled {
            match self.quality.check(issue).await {
                Ok(quality) => {
                    if self.quality.needs_info(&quality) {
                        result.actions.push(Action {
                            action_type: TriageActionType::AddLabel,
                            label: self.quality.needs_info_label().to_string(),
                            comment: String::new(),
                            reason: "issue needs more information".to_string(),
                        });
                        if !quality.feedback.is_empty() {
                            result.actions.push(Action {
                                action_type: TriageActionType::Comment,
                                label: String::new(),
                                comment: quality.feedback.clone(),
                                reason: "request additional information".to_string(),
                            });
                        }
                    }
                    result.quality = Some(quality);
                }
                Err(e) => tracing::warn!("quality check failed: {}", e),
            }
        }
    }
}

/// Builds the standalone triage summary comment (`simili triage` output;
/// the unified pipeline composes its own comment instead).
pub fn summary_comment(result: &TriageResult, similar: &[SearchResult]) -> String {
    let mut sections: Vec<String> = Vec::new();
    sections.push("## 🤖 Triage Summary\n".to_string());

    if result.labels.is_empty() {
        sections.push("### Labels\nNo labels applied (no confident matches found)".to_string());
    } else {
        let mut lines = vec!["### Labels Applied".to_string()];
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
        let mut line = format!("### Quality Score: {:.0}%", quality.score * 100.0);
        if quality.missing.is_empty() {
            line.push_str("\n✅ Issue is well-documented");
        } else {
            line.push_str(&format!("\n⚠️ Missing: {}", quality.missing.join(", ")));
        }
        sections.push(line);
    }

    if similar.is_empty() {
        sections.push("### Similar Issues\nNo similar issues found".to_string());
    } else {
        let mut lines = vec!["### Similar Issues".to_string()];
        for r in similar {
            lines.push(format!(
                "- [#{} - {}]({}) ({:.0}%)",
                r.issue.number,
                r.issue.title,
                r.issue.url,
                r.score * 100.0
            ));
        }
        sections.push(lines.join("\n"));
    }

    if let Some(dup) = &result.duplicate {
        if dup.is_duplicate {
            let mut line = format!(
                "### ⚠️ Potential Duplicate\nSimilarity: {:.0}%",
                dup.similarity * 100.0
            );
            if let Some(original) = &dup.original {
                line.push_str(&format!(
                    "\nOriginal: #{} - {}",
                    original.number, original.title
                ));
            }
            sections.push(line);
        }
    }

    sections.push("\n---\n<sub>🤖 Powered by Simili Triage</sub>".to_string());
    sections.join("\n\n")
}

/// Implements `simili triage`: standalone triage with JSON output.
pub async fn run_triage(
    config_path: Option<&Path>,
    event_path: &Path,
    output: Option<&Path>,
    execute: bool,
    dry_run: bool,
) -> Result<()> {
    use crate::embedding::FallbackEmbedder;
    use crate::github::GithubClient;
    use crate::similarity::SimilarityFinder;
    use crate::vectordb::VectorStore;

    let path = crate::config::find_config_path(config_path)
        .ok_or_else(|| anyhow::anyhow!("config file not found"))?;
    let cfg = crate::config::load_config(&path)?;

    if !cfg.triage.enabled {
        println!("triage is disabled in config");
        return Ok(());
    }

    let event = crate::event::parse_event_file(event_path)?;
    let issue = event
        .to_issue()
        .ok_or_else(|| anyhow::anyhow!("event has no issue payload"))?;

    let embedder = FallbackEmbedder::from_config(&cfg.embedding)?;
    let vdb = VectorStore::new(&cfg.qdrant, cfg.embedding.primary.dimensions)?;
    let llm = crate::llm::create_llm_provider(&cfg.triage.llm)?;
    let agent = Agent::new(&cfg, Arc::from(llm));

    let finder = SimilarityFinder::new(&cfg, &embedder, &vdb);
    let similar = match finder.find_similar(&issue, true).await {
        Ok(similar) => similar,
        Err(e) => {
            tracing::warn!("failed to find similar issues: {}", e);
            Vec::new()
        }
    };

    let mut result = agent.triage_with_similar(&issue, &similar).await?;
    result.actions.push(Action {
        action_type: TriageActionType::Comment,
        label: String::new(),
        comment: summary_comment(&result, &similar),
        reason: "triage summary".to_string(),
    });

    println!("triage #{}", issue.number);
    println!("  labels: {}", result.labels.len());
    if let Some(quality) = &result.quality {
        println!("  quality score: {:.0}%", quality.score * 100.0);
    }
    if let Some(dup) = &result.duplicate {
        if dup.is_duplicate {
            println!("  duplicate: {:.0}% similar", dup.similarity * 100.0);
        }
    }
    println!("  actions: {}", result.actions.len());

    if let Some(output) = output {
        actions::write_output(&result, output)?;
        println!("  wrote {}", output.display());
    }

    if execute {
        let gh = GithubClient::new()?;
        let executor = actions::ActionExecutor::new(&gh, dry_run);
        executor.execute(&issue, &result).await?;
        println!("  executed {} actions", result.actions.len());
    }

    Ok(())
}
