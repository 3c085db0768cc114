use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QdrantConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// Accepted for compatibility with existing configs; the adapter speaks
    /// a single HTTP transport.
    #[serde(default)]
    pub use_grpc: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub primary: ProviderConfig,
    #[serde(default)]
    pub fallback: ProviderConfig,
}

/// Settings for one embedding provider slot. A slot with an empty provider
/// name is treated as unconfigured.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.provider.is_empty() && !self.api_key.is_empty()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TriageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub duplicate: DuplicateConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Vec<LabelConfig>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            labels: Vec::new(),
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelConfig {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_needs_info_label")]
    pub needs_info_label: String,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_score: default_min_score(),
            needs_info_label: default_needs_info_label(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DuplicateConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_auto_close_threshold")]
    pub auto_close_threshold: f64,
    #[serde(default)]
    pub require_confirmation: bool,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_close_threshold: default_auto_close_threshold(),
            require_confirmation: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DefaultsConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_max_similar_to_show")]
    pub max_similar_to_show: usize,
    #[serde(default)]
    pub include_closed_issues: bool,
    #[serde(default = "default_closed_issue_weight")]
    pub closed_issue_weight: f64,
    #[serde(default)]
    pub cross_repo_search: bool,
    #[serde(default = "default_comment_cooldown_hours")]
    pub comment_cooldown_hours: i64,
    #[serde(default)]
    pub delayed_actions: DelayedActionsConfig,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_similar_to_show: default_max_similar_to_show(),
            include_closed_issues: false,
            closed_issue_weight: default_closed_issue_weight(),
            cross_repo_search: false,
            comment_cooldown_hours: default_comment_cooldown_hours(),
            delayed_actions: DelayedActionsConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DelayedActionsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_delay_hours")]
    pub delay_hours: i64,
    #[serde(default = "default_approve_reaction")]
    pub approve_reaction: String,
    #[serde(default = "default_cancel_reaction")]
    pub cancel_reaction: String,
    #[serde(default)]
    pub execute_on_approve: bool,
    #[serde(default)]
    pub optimistic_transfers: bool,
}

impl Default for DelayedActionsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_hours: default_delay_hours(),
            approve_reaction: default_approve_reaction(),
            cancel_reaction: default_cancel_reaction(),
            execute_on_approve: false,
            optimistic_transfers: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    pub org: String,
    pub repo: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    #[serde(default)]
    pub transfer_rules: Vec<TransferRule>,
}

/// Routes matching issues to another repository. Lower priority runs first.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TransferRule {
    #[serde(default)]
    pub r#match: MatchCondition,
    pub target: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MatchCondition {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub title_contains: Vec<String>,
    #[serde(default)]
    pub body_contains: Vec<String>,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    /// Optional step ordering override; empty means the default order.
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitsConfig {
    #[serde(default = "default_github_rps")]
    pub github_requests_per_second: u32,
    #[serde(default = "default_embedding_rps")]
    pub embedding_requests_per_second: u32,
    #[serde(default = "default_qdrant_rps")]
    pub qdrant_requests_per_second: u32,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            github_requests_per_second: default_github_rps(),
            embedding_requests_per_second: default_embedding_rps(),
            qdrant_requests_per_second: default_qdrant_rps(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_dimensions() -> usize {
    768
}
fn default_min_confidence() -> f64 {
    0.7
}
fn default_min_score() -> f64 {
    0.5
}
fn default_needs_info_label() -> String {
    "needs-info".to_string()
}
fn default_auto_close_threshold() -> f64 {
    0.95
}
fn default_similarity_threshold() -> f64 {
    0.82
}
fn default_max_similar_to_show() -> usize {
    5
}
fn default_closed_issue_weight() -> f64 {
    0.9
}
fn default_comment_cooldown_hours() -> i64 {
    1
}
fn default_delay_hours() -> i64 {
    24
}
fn default_approve_reaction() -> String {
    "+1".to_string()
}
fn default_cancel_reaction() -> String {
    "-1".to_string()
}
fn default_github_rps() -> u32 {
    10
}
fn default_embedding_rps() -> u32 {
    5
}
fn default_qdrant_rps() -> u32 {
    50
}

impl Config {
    /// Returns the repository entry for `(org, repo)`, if configured.
    pub fn repo_config(&self, org: &str, repo: &str) -> Option<&RepositoryConfig> {
        self.repositories
            .iter()
            .find(|r| r.org == org && r.repo == repo)
    }

    /// Repo-level similarity threshold override, or the global default.
    pub fn similarity_threshold(&self, org: &str, repo: &str) -> f64 {
        self.repo_config(org, repo)
            .and_then(|r| r.similarity_threshold)
            .unwrap_or(self.defaults.similarity_threshold)
    }
}

/// Replaces `${VAR}` patterns with values from the process environment.
/// Unset variables are left literal so that a missing secret is visible in
/// `config validate` output instead of silently becoming an empty string.
pub fn expand_env_vars(s: &str) -> String {
    let pattern = Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    pattern
        .replace_all(s, |caps: &regex::Captures| {
            match std::env::var(&caps[1]) {
                Ok(value) if !value.is_empty() => value,
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn expand_config_env_vars(cfg: &mut Config) {
    cfg.qdrant.url = expand_env_vars(&cfg.qdrant.url);
    cfg.qdrant.api_key = expand_env_vars(&cfg.qdrant.api_key);
    cfg.embedding.primary.api_key = expand_env_vars(&cfg.embedding.primary.api_key);
    cfg.embedding.primary.model = expand_env_vars(&cfg.embedding.primary.model);
    cfg.embedding.fallback.api_key = expand_env_vars(&cfg.embedding.fallback.api_key);
    cfg.embedding.fallback.model = expand_env_vars(&cfg.embedding.fallback.model);
    cfg.triage.llm.api_key = expand_env_vars(&cfg.triage.llm.api_key);
    cfg.triage.llm.model = expand_env_vars(&cfg.triage.llm.model);
}

/// Reads, env-expands, and parses the configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let mut config: Config =
        serde_yaml_ng::from_str(&content).with_context(|| "failed to parse config file")?;

    expand_config_env_vars(&mut config);
    Ok(config)
}

/// Looks for the config file in the conventional locations.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let candidates = [
        ".github/simili.yaml",
        ".github/simili.yml",
        "simili.yaml",
        "simili.yml",
    ];
    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(home) = std::env::var_os("HOME") {
        let path = PathBuf::from(home).join(".config/simili/config.yaml");
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Validates the configuration, returning one `field: message` entry per
/// offending field. An empty vector means the config is usable.
pub fn validate(cfg: &Config) -> Vec<String> {
    let mut errors = Vec::new();

    if cfg.qdrant.url.is_empty() {
        errors.push("qdrant.url: required".to_string());
    }

    if cfg.embedding.primary.provider.is_empty() {
        errors.push("embedding.primary.provider: required".to_string());
    } else if !is_known_provider(&cfg.embedding.primary.provider) {
        errors.push("embedding.primary.provider: must be 'gemini' or 'openai'".to_string());
    }
    if cfg.embedding.primary.api_key.is_empty() {
        errors.push("embedding.primary.api_key: required".to_string());
    }
    if cfg.embedding.primary.dimensions == 0 {
        errors.push("embedding.primary.dimensions: must be > 0".to_string());
    }
    if !cfg.embedding.fallback.provider.is_empty()
        && !is_known_provider(&cfg.embedding.fallback.provider)
    {
        errors.push("embedding.fallback.provider: must be 'gemini' or 'openai'".to_string());
    }

    if !(0.0..=1.0).contains(&cfg.defaults.similarity_threshold) {
        errors.push("defaults.similarity_threshold: must be between 0 and 1".to_string());
    }
    if !(0.0..=1.0).contains(&cfg.defaults.closed_issue_weight) {
        errors.push("defaults.closed_issue_weight: must be between 0 and 1".to_string());
    }
    if cfg.defaults.delayed_actions.enabled && cfg.defaults.delayed_actions.delay_hours < 1 {
        errors.push("defaults.delayed_actions.delay_hours: must be >= 1".to_string());
    }

    if cfg.triage.enabled {
        if cfg.triage.llm.provider.is_empty() {
            errors.push("triage.llm.provider: required when triage is enabled".to_string());
        } else if !is_known_provider(&cfg.triage.llm.provider) {
            errors.push("triage.llm.provider: must be 'gemini' or 'openai'".to_string());
        }
        if !(0.0..=1.0).contains(&cfg.triage.duplicate.auto_close_threshold) {
            errors.push("triage.duplicate.auto_close_threshold: must be between 0 and 1".to_string());
        }
    }

    for (i, repo) in cfg.repositories.iter().enumerate() {
        let prefix = format!("repositories[{}]", i);
        if repo.org.is_empty() {
            errors.push(format!("{}.org: required", prefix));
        }
        if repo.repo.is_empty() {
            errors.push(format!("{}.repo: required", prefix));
        }

        for (j, rule) in repo.transfer_rules.iter().enumerate() {
            let rule_prefix = format!("{}.transfer_rules[{}]", prefix, j);
            if rule.target.is_empty() {
                errors.push(format!("{}.target: required", rule_prefix));
            } else if !rule.target.contains('/') {
                errors.push(format!(
                    "{}.target: must be in format 'org/repo'",
                    rule_prefix
                ));
            }
            let m = &rule.r#match;
            if m.labels.is_empty()
                && m.title_contains.is_empty()
                && m.body_contains.is_empty()
                && m.author.is_empty()
            {
                errors.push(format!(
                    "{}.match: at least one condition required",
                    rule_prefix
                ));
            }
        }
    }

    errors
}

fn is_known_provider(name: &str) -> bool {
    name == "gemini" || name == "openai"
}

/// Implements `simili config validate`.
pub fn run_validate(config_path: Option<&Path>) -> Result<()> {
    let path = find_config_path(config_path)
        .ok_or_else(|| anyhow::anyhow!("config file not found"))?;

    let cfg = load_config(&path)?;
    let errors = validate(&cfg);
    if errors.is_empty() {
        println!("config ok: {}", path.display());
        println!("  repositories: {}", cfg.repositories.len());
        return Ok(());
    }

    for error in &errors {
        println!("config error: {}", error);
    }
    anyhow::bail!("invalid configuration ({} errors)", errors.len())
}
