//! Transfer rule matching.
//!
//! Rules are evaluated in ascending priority order (stable, so config order
//! breaks ties). Within a rule, every present condition group must be
//! satisfied; within a group, any listed value suffices.

use crate::config::TransferRule;
use crate::models::Issue;

pub struct RuleMatcher {
    rules: Vec<TransferRule>,
}

impl RuleMatcher {
    /// Builds a matcher over a repository's transfer rules.
    pub fn new(rules: &[TransferRule]) -> Self {
        let mut sorted = rules.to_vec();
        sorted.sort_by_key(|r| r.priority);
        Self { rules: sorted }
    }

    /// Returns the first matching rule's target and the rule itself.
    pub fn matches(&self, issue: &Issue) -> Option<(&str, &TransferRule)> {
        self.rules
            .iter()
            .find(|rule| rule_matches(issue, rule))
            .map(|rule| (rule.target.as_str(), rule))
    }
}

/// AND across present condition groups, OR within each group. A rule with
/// no conditions never matches.
fn rule_matches(issue: &Issue, rule: &TransferRule) -> bool {
    let cond = &rule.r#match;
    let mut group_count = 0;
    let mut matched = 0;

    if !cond.labels.is_empty() {
        group_count += 1;
        if matches_any_label(&issue.labels, &cond.labels) {
            matched += 1;
        }
    }

    if !cond.title_contains.is_empty() {
        group_count += 1;
        if contains_any(&issue.title, &cond.title_contains) {
            matched += 1;
        }
    }

    if !cond.body_contains.is_empty() {
        group_count += 1;
        if contains_any(&issue.body, &cond.body_contains) {
            matched += 1;
        }
    }

    if !cond.author.is_empty() {
        group_count += 1;
        if issue.author.eq_ignore_ascii_case(&cond.author) {
            matched += 1;
        }
    }

    group_count > 0 && matched == group_count
}

fn matches_any_label(issue_labels: &[String], rule_labels: &[String]) -> bool {
    issue_labels.iter().any(|il| {
        rule_labels
            .iter()
            .any(|rl| il.eq_ignore_ascii_case(rl))
    })
}

fn contains_any(text: &str, substrings: &[String]) -> bool {
    let lower = text.to_lowercase();
    substrings
        .iter()
        .any(|sub| lower.contains(&sub.to_lowercase()))
}
