//! Configuration system for RAGGuard.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Configuration is
//! loaded from the user config directory (`config.toml`) and/or
//! `.ragguard/config.toml` in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagGuardConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub hallucination: HallucinationConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RagGuardConfig {
    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retrieval.validate()?;
        self.safety.validate()?;
        self.hallucination.validate()?;
        self.models.validate()?;
        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

/// Retrieval pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates scoring below this are dropped.
    #[serde(default = "default_min_similarity_score")]
    pub min_similarity_score: f32,
    /// Character budget for the packed context.
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    #[serde(default = "default_max_chunks_per_document")]
    pub max_chunks_per_document: usize,
    /// MMR trade-off: 1.0 is pure relevance, 0.0 is pure novelty.
    #[serde(default = "default_diversity_lambda")]
    pub diversity_lambda: f32,
    /// Multiplier applied to `top_k` when querying the vector index.
    #[serde(default = "default_over_fetch_factor")]
    pub over_fetch_factor: usize,
    #[serde(default = "default_true")]
    pub use_reranking: bool,
    #[serde(default = "default_true")]
    pub use_diversity_rerank: bool,
    #[serde(default)]
    pub use_query_expansion: bool,
    #[serde(default = "default_true")]
    pub use_context_optimization: bool,
}

fn default_min_similarity_score() -> f32 {
    0.5
}
fn default_max_context_length() -> usize {
    4000
}
fn default_max_chunks_per_document() -> usize {
    5
}
fn default_diversity_lambda() -> f32 {
    0.3
}
fn default_over_fetch_factor() -> usize {
    2
}
fn default_true() -> bool {
    true
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_similarity_score: default_min_similarity_score(),
            max_context_length: default_max_context_length(),
            max_chunks_per_document: default_max_chunks_per_document(),
            diversity_lambda: default_diversity_lambda(),
            over_fetch_factor: default_over_fetch_factor(),
            use_reranking: true,
            use_diversity_rerank: true,
            use_query_expansion: false,
            use_context_optimization: true,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("retrieval.min_similarity_score", self.min_similarity_score)?;
        check_unit("retrieval.diversity_lambda", self.diversity_lambda)?;
        if self.max_context_length == 0 {
            return Err(ConfigError::invalid(
                "retrieval.max_context_length must be positive",
            ));
        }
        if self.max_chunks_per_document == 0 {
            return Err(ConfigError::invalid(
                "retrieval.max_chunks_per_document must be positive",
            ));
        }
        if self.over_fetch_factor == 0 {
            return Err(ConfigError::invalid(
                "retrieval.over_fetch_factor must be positive",
            ));
        }
        Ok(())
    }
}

/// How aggressively a successful analysis is turned into a rejection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyTier {
    /// Reject anything with overall risk of at least 0.2.
    Strict,
    /// Defer to the analyzer's own verdict.
    #[default]
    Moderate,
    /// Reject only overall risk of at least 0.8.
    Permissive,
}

impl std::fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyTier::Strict => write!(f, "strict"),
            SafetyTier::Moderate => write!(f, "moderate"),
            SafetyTier::Permissive => write!(f, "permissive"),
        }
    }
}

/// What the caller is given when content is not served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    #[default]
    Reject,
    SafeResponse,
    LimitedResponse,
    AlternativeModel,
    CacheOnly,
    HumanReview,
}

impl std::fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackStrategy::Reject => write!(f, "reject"),
            FallbackStrategy::SafeResponse => write!(f, "safe_response"),
            FallbackStrategy::LimitedResponse => write!(f, "limited_response"),
            FallbackStrategy::AlternativeModel => write!(f, "alternative_model"),
            FallbackStrategy::CacheOnly => write!(f, "cache_only"),
            FallbackStrategy::HumanReview => write!(f, "human_review"),
        }
    }
}

/// Safety decision engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub tier: SafetyTier,
    /// Consecutive failures that open the circuit breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Minutes the breaker stays open before allowing a probe.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Total analyzer attempts per validation call.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Risk at or above which decisions escalate to human review.
    #[serde(default = "default_human_review_threshold")]
    pub human_review_threshold: f32,
    #[serde(default)]
    pub default_strategy: FallbackStrategy,
    #[serde(default = "default_true")]
    pub enable_hallucination_detection: bool,
    /// Seconds an analysis stays cached; 0 disables the cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_timeout_minutes() -> u64 {
    5
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_human_review_threshold() -> f32 {
    0.8
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_cache_capacity() -> usize {
    1024
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            tier: SafetyTier::default(),
            failure_threshold: default_failure_threshold(),
            timeout_minutes: default_timeout_minutes(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            human_review_threshold: default_human_review_threshold(),
            default_strategy: FallbackStrategy::default(),
            enable_hallucination_detection: true,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl SafetyConfig {
    pub fn breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("safety.human_review_threshold", self.human_review_threshold)?;
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "safety.failure_threshold must be positive",
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::invalid(
                "safety.max_retry_attempts must be positive",
            ));
        }
        if self.default_strategy == FallbackStrategy::HumanReview {
            return Err(ConfigError::invalid(
                "safety.default_strategy cannot be human_review; it is chosen by threshold",
            ));
        }
        Ok(())
    }
}

/// Hallucination detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallucinationConfig {
    /// Confidence above which a response is reported as hallucinated.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Mean answer/context similarity below this flags a factual hallucination.
    #[serde(default = "default_semantic_similarity_threshold")]
    pub semantic_similarity_threshold: f32,
    /// Share of supported claims below this flags a contradictory response.
    #[serde(default = "default_factual_consistency_threshold")]
    pub factual_consistency_threshold: f32,
    /// Share of attributed sentences below this flags a sourceless response.
    #[serde(default = "default_source_coverage_threshold")]
    pub source_coverage_threshold: f32,
    /// Cosine needed for a claim to count as supported.
    #[serde(default = "default_claim_support_threshold")]
    pub claim_support_threshold: f32,
    /// Cosine needed for a sentence to count as attributed to a source.
    #[serde(default = "default_attribution_threshold")]
    pub attribution_threshold: f32,
    #[serde(default = "default_numeric_tolerance")]
    pub numeric_tolerance: f64,
    #[serde(default = "default_max_claims")]
    pub max_claims: usize,
    /// Embedding model used for sentence similarity; the default model when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

fn default_confidence_threshold() -> f32 {
    0.7
}
fn default_semantic_similarity_threshold() -> f32 {
    0.3
}
fn default_factual_consistency_threshold() -> f32 {
    0.5
}
fn default_source_coverage_threshold() -> f32 {
    0.5
}
fn default_max_claims() -> usize {
    50
}
fn default_claim_support_threshold() -> f32 {
    0.7
}
fn default_attribution_threshold() -> f32 {
    0.5
}
fn default_numeric_tolerance() -> f64 {
    0.1
}

impl Default for HallucinationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            semantic_similarity_threshold: default_semantic_similarity_threshold(),
            factual_consistency_threshold: default_factual_consistency_threshold(),
            source_coverage_threshold: default_source_coverage_threshold(),
            claim_support_threshold: default_claim_support_threshold(),
            attribution_threshold: default_attribution_threshold(),
            numeric_tolerance: default_numeric_tolerance(),
            max_claims: default_max_claims(),
            model_name: None,
        }
    }
}

impl HallucinationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit(
            "hallucination.confidence_threshold",
            self.confidence_threshold,
        )?;
        check_unit(
            "hallucination.semantic_similarity_threshold",
            self.semantic_similarity_threshold,
        )?;
        check_unit(
            "hallucination.factual_consistency_threshold",
            self.factual_consistency_threshold,
        )?;
        check_unit(
            "hallucination.source_coverage_threshold",
            self.source_coverage_threshold,
        )?;
        check_unit(
            "hallucination.claim_support_threshold",
            self.claim_support_threshold,
        )?;
        check_unit(
            "hallucination.attribution_threshold",
            self.attribution_threshold,
        )?;
        if self.numeric_tolerance < 0.0 {
            return Err(ConfigError::invalid(
                "hallucination.numeric_tolerance cannot be negative",
            ));
        }
        Ok(())
    }
}

/// Model residency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// The pinned model; never evicted to make room for another.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_memory_budget_mb")]
    pub max_memory_budget_mb: f64,
    /// Estimate used for models absent from `memory_estimates_mb`.
    #[serde(default = "default_memory_estimate_mb")]
    pub default_memory_estimate_mb: f64,
    #[serde(default)]
    pub memory_estimates_mb: BTreeMap<String, f64>,
    /// Vector size produced by the built-in hashing embedder.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

fn default_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_max_memory_budget_mb() -> f64 {
    2048.0
}
fn default_memory_estimate_mb() -> f64 {
    500.0
}
fn default_embedding_dimension() -> usize {
    384
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            max_memory_budget_mb: default_max_memory_budget_mb(),
            default_memory_estimate_mb: default_memory_estimate_mb(),
            memory_estimates_mb: BTreeMap::new(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

impl ModelsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::invalid("models.default_model cannot be empty"));
        }
        if self.max_memory_budget_mb <= 0.0 {
            return Err(ConfigError::invalid(
                "models.max_memory_budget_mb must be positive",
            ));
        }
        if self.default_memory_estimate_mb < 0.0
            || self.memory_estimates_mb.values().any(|mb| *mb < 0.0)
        {
            return Err(ConfigError::invalid(
                "models memory estimates cannot be negative",
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::invalid(
                "models.embedding_dimension must be positive",
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "ragguard", "ragguard")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".ragguard").join("config.toml")
}

/// Load configuration by merging all layers, then validate the result.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&RagGuardConfig>,
) -> Result<RagGuardConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(RagGuardConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (RAGGUARD_RETRIEVAL__DIVERSITY_LAMBDA, RAGGUARD_SAFETY__TIER, ...)
    figment = figment.merge(Env::prefixed("RAGGUARD_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: RagGuardConfig = figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Write `config` to `<workspace>/.ragguard/config.toml`, returning the path.
pub fn save_workspace_config(
    workspace: &Path,
    config: &RagGuardConfig,
) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize {
        message: e.to_string(),
    })?;
    std::fs::write(&path, rendered)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RagGuardConfig::default();
        assert_eq!(config.retrieval.min_similarity_score, 0.5);
        assert_eq!(config.retrieval.max_context_length, 4000);
        assert_eq!(config.retrieval.max_chunks_per_document, 5);
        assert_eq!(config.retrieval.diversity_lambda, 0.3);
        assert_eq!(config.safety.failure_threshold, 5);
        assert_eq!(config.safety.tier, SafetyTier::Moderate);
        assert_eq!(config.safety.default_strategy, FallbackStrategy::Reject);
        assert_eq!(config.hallucination.confidence_threshold, 0.7);
        assert_eq!(config.models.default_model, "all-MiniLM-L6-v2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_enum_display() {
        assert_eq!(SafetyTier::Strict.to_string(), "strict");
        assert_eq!(SafetyTier::Permissive.to_string(), "permissive");
        assert_eq!(FallbackStrategy::HumanReview.to_string(), "human_review");
        assert_eq!(FallbackStrategy::CacheOnly.to_string(), "cache_only");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = RagGuardConfig::default();
        config.safety.tier = SafetyTier::Strict;
        config
            .models
            .memory_estimates_mb
            .insert("large".into(), 1500.0);
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: RagGuardConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.safety.tier, SafetyTier::Strict);
        assert_eq!(parsed.models.memory_estimates_mb.get("large"), Some(&1500.0));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: RagGuardConfig = toml::from_str(
            r#"
            [retrieval]
            diversity_lambda = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(parsed.retrieval.diversity_lambda, 0.9);
        assert_eq!(parsed.retrieval.max_context_length, 4000);
        assert_eq!(parsed.safety.max_retry_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RagGuardConfig::default();
        config.retrieval.diversity_lambda = 1.5;
        assert!(config.validate().is_err());

        let mut config = RagGuardConfig::default();
        config.safety.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = RagGuardConfig::default();
        config.safety.default_strategy = FallbackStrategy::HumanReview;
        assert!(config.validate().is_err());

        let mut config = RagGuardConfig::default();
        config.models.max_memory_budget_mb = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let safety = SafetyConfig::default();
        assert_eq!(safety.breaker_timeout(), Duration::from_secs(300));
        assert_eq!(safety.retry_delay(), Duration::from_secs(1));
    }
}
