//! Safety decision engine.
//!
//! Turns risk analyses into a single allow/deny/escalate [`SafetyDecision`].
//! Every call runs behind a shared circuit breaker: when the breaker is open
//! the analyzer is not touched and a fixed rejection is returned. Analyzer
//! errors are retried under a [`RetryPolicy`]; exhausted retries count as a
//! breaker failure and produce a rejection that asks for human review.
//!
//! The engine fails closed. Every path that cannot produce a verdict rejects.

use crate::analysis::{ContentType, RiskLevel, SafetyAnalysis, SafetyDecision};
use crate::analyzers::{CachedRiskAnalyzer, KeywordRiskAnalyzer, PatternRiskAnalyzer, RiskAnalyzer};
use crate::breaker::{CircuitBreakerStatus, SharedCircuitBreaker};
use crate::fallback::{owned_responses, requires_human_review, select_strategy, tier_allows};
use crate::hallucination::{HallucinationDetector, HeuristicHallucinationDetector};
use crate::metrics::{SafetyMetrics, SafetyMetricsSnapshot};
use crate::retry::RetryPolicy;
use chrono::Utc;
use ragguard_core::{
    ConfigError, EmbeddingProvider, FallbackStrategy, QueryRequest, RagGuardConfig, SafetyConfig,
    SafetyError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const REASON_BREAKER_OPEN: &str = "Safety service temporarily unavailable";
pub const REASON_ANALYSIS_FAILED: &str = "Safety analysis failed";
pub const REASON_DETECTION_FAILED: &str = "Hallucination detection failed";
pub const REASON_DEADLINE: &str = "Safety validation timed out";

/// A generation to validate: the user query plus the passages the answer is
/// grounded on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub request_id: Uuid,
    pub query: String,
    #[serde(default)]
    pub context: Vec<String>,
}

impl GenerationRequest {
    pub fn new(query: impl Into<String>, context: Vec<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            query: query.into(),
            context,
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

type Audit = BTreeMap<String, Value>;

struct Analyzed {
    analysis: SafetyAnalysis,
    analyzer: String,
}

pub struct SafetyDecisionEngine {
    config: SafetyConfig,
    primary: Option<Arc<dyn RiskAnalyzer>>,
    fallback: Arc<dyn RiskAnalyzer>,
    detector: Option<Arc<dyn HallucinationDetector>>,
    breaker: SharedCircuitBreaker,
    retry: RetryPolicy,
    metrics: Arc<SafetyMetrics>,
}

/// Builder for [`SafetyDecisionEngine`].
pub struct SafetyDecisionEngineBuilder {
    config: SafetyConfig,
    primary: Option<Arc<dyn RiskAnalyzer>>,
    fallback: Option<Arc<dyn RiskAnalyzer>>,
    detector: Option<Arc<dyn HallucinationDetector>>,
    breaker: Option<SharedCircuitBreaker>,
    retry: Option<RetryPolicy>,
    metrics: Option<Arc<SafetyMetrics>>,
}

impl SafetyDecisionEngineBuilder {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            primary: None,
            fallback: None,
            detector: None,
            breaker: None,
            retry: None,
            metrics: None,
        }
    }

    /// The analyzer consulted first. Without one, the fallback analyzer
    /// answers every call.
    pub fn primary_analyzer(mut self, analyzer: Arc<dyn RiskAnalyzer>) -> Self {
        self.primary = Some(analyzer);
        self
    }

    /// Used when the primary reports itself unavailable. Defaults to
    /// [`KeywordRiskAnalyzer`].
    pub fn fallback_analyzer(mut self, analyzer: Arc<dyn RiskAnalyzer>) -> Self {
        self.fallback = Some(analyzer);
        self
    }

    pub fn hallucination_detector(mut self, detector: Arc<dyn HallucinationDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Share a breaker with other engines. A fresh one is built from the
    /// config otherwise.
    pub fn circuit_breaker(mut self, breaker: SharedCircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn metrics(mut self, metrics: Arc<SafetyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<SafetyDecisionEngine, ConfigError> {
        self.config.validate()?;

        let primary = self.primary.map(|analyzer| {
            if self.config.cache_ttl_secs == 0 {
                analyzer
            } else {
                Arc::new(CachedRiskAnalyzer::new(
                    analyzer,
                    self.config.cache_capacity,
                    self.config.cache_ttl(),
                )) as Arc<dyn RiskAnalyzer>
            }
        });

        Ok(SafetyDecisionEngine {
            primary,
            fallback: self
                .fallback
                .unwrap_or_else(|| Arc::new(KeywordRiskAnalyzer::new())),
            detector: self.detector,
            breaker: self
                .breaker
                .unwrap_or_else(|| SharedCircuitBreaker::from_config(&self.config)),
            retry: self
                .retry
                .unwrap_or_else(|| RetryPolicy::from_config(&self.config)),
            metrics: self.metrics.unwrap_or_default(),
            config: self.config,
        })
    }
}

impl SafetyDecisionEngine {
    pub fn builder(config: SafetyConfig) -> SafetyDecisionEngineBuilder {
        SafetyDecisionEngineBuilder::new(config)
    }

    /// The standard engine: pattern analyzer first, keyword fallback, and the
    /// heuristic hallucination detector when an embedder is supplied and
    /// detection is enabled.
    pub fn from_config(
        config: &RagGuardConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> ragguard_core::Result<Self> {
        let mut builder = Self::builder(config.safety.clone())
            .primary_analyzer(Arc::new(PatternRiskAnalyzer::new()));
        if let Some(embedder) = embedder.filter(|_| config.safety.enable_hallucination_detection) {
            config.hallucination.validate()?;
            let detector =
                HeuristicHallucinationDetector::new(embedder, config.hallucination.clone())?;
            builder = builder.hallucination_detector(Arc::new(detector));
        }
        Ok(builder.build()?)
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Validate a raw query.
    pub async fn validate_query(&self, query: &str) -> SafetyDecision {
        self.validate_query_as(Uuid::new_v4(), query).await
    }

    /// Validate a query request, keeping its id in the audit trail.
    pub async fn validate_query_request(&self, request: &QueryRequest) -> SafetyDecision {
        self.validate_query_as(request.query_id, &request.query).await
    }

    async fn validate_query_as(&self, query_id: Uuid, query: &str) -> SafetyDecision {
        let audit = base_audit("query_id", query_id, "query");
        let Some(permit) = self.breaker.acquire() else {
            return self.finish(self.breaker_open_decision(audit));
        };

        match self.analyze(query, ContentType::Input).await {
            Ok(analyzed) => {
                permit.record_success();
                self.finish(self.decide(&analyzed, audit))
            }
            Err(e) => {
                permit.record_failure();
                self.finish(self.analysis_failure_decision(audit, &e))
            }
        }
    }

    /// Validate a generation request and, when present, the generated answer.
    ///
    /// The query is analyzed first; a query the tier rejects ends validation
    /// without looking at the answer. Otherwise the answer is analyzed as
    /// output, whatever the query's own verdict, and,
    /// when context is available, checked for hallucinations. The two
    /// verdicts are merged before the tier is applied.
    pub async fn validate_generation(
        &self,
        request: &GenerationRequest,
        response: Option<&str>,
    ) -> SafetyDecision {
        let mut audit = base_audit("request_id", request.request_id, "generation");
        let Some(permit) = self.breaker.acquire() else {
            return self.finish(self.breaker_open_decision(audit));
        };

        let input = match self.analyze(&request.query, ContentType::Input).await {
            Ok(analyzed) => analyzed,
            Err(e) => {
                permit.record_failure();
                return self.finish(self.analysis_failure_decision(audit, &e));
            }
        };

        let input_decision = self.decide(&input, audit.clone());
        let response = match response.filter(|r| !r.trim().is_empty()) {
            Some(r) if input_decision.allowed => r,
            _ => {
                permit.record_success();
                return self.finish(input_decision);
            }
        };

        let output = match self.analyze(response, ContentType::Output).await {
            Ok(analyzed) => analyzed,
            Err(e) => {
                permit.record_failure();
                return self.finish(self.analysis_failure_decision(audit, &e));
            }
        };
        permit.record_success();

        let mut analyzed = output;
        if let Some(detector) = self.active_detector(&request.context) {
            match detector
                .detect(&request.query, response, &request.context)
                .await
            {
                Ok(hallucination) => {
                    if hallucination.is_hallucinated {
                        self.metrics.record_hallucination();
                    }
                    audit.insert(
                        "hallucination".into(),
                        serde_json::to_value(&hallucination).unwrap_or(Value::Null),
                    );
                    analyzed.analysis = analyzed.analysis.combine_with_hallucination(&hallucination);
                }
                Err(e) => {
                    warn!(error = %e, "Hallucination detection failed");
                    return self.finish(self.failure_decision(
                        audit,
                        REASON_DETECTION_FAILED,
                        "hallucination_detection_failure",
                        Some(&e.to_string()),
                    ));
                }
            }
        }

        self.finish(self.decide(&analyzed, audit))
    }

    /// [`validate_query`](Self::validate_query) under a deadline.
    pub async fn validate_query_within(&self, query: &str, deadline: Duration) -> SafetyDecision {
        let query_id = Uuid::new_v4();
        match tokio::time::timeout(deadline, self.validate_query_as(query_id, query)).await {
            Ok(decision) => decision,
            Err(_) => self.finish(self.deadline_decision(
                base_audit("query_id", query_id, "query"),
                deadline,
            )),
        }
    }

    /// [`validate_generation`](Self::validate_generation) under a deadline.
    pub async fn validate_generation_within(
        &self,
        request: &GenerationRequest,
        response: Option<&str>,
        deadline: Duration,
    ) -> SafetyDecision {
        match tokio::time::timeout(deadline, self.validate_generation(request, response)).await {
            Ok(decision) => decision,
            Err(_) => self.finish(self.deadline_decision(
                base_audit("request_id", request.request_id, "generation"),
                deadline,
            )),
        }
    }

    /// Force the breaker closed with zero failures.
    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    pub fn circuit_breaker_status(&self) -> CircuitBreakerStatus {
        self.breaker.status()
    }

    pub fn metrics(&self) -> SafetyMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn active_detector(&self, context: &[String]) -> Option<&Arc<dyn HallucinationDetector>> {
        if !self.config.enable_hallucination_detection || context.is_empty() {
            return None;
        }
        self.detector.as_ref()
    }

    async fn analyze(
        &self,
        text: &str,
        content_type: ContentType,
    ) -> Result<Analyzed, SafetyError> {
        let Some(primary) = &self.primary else {
            return self.analyze_with_fallback(text, content_type).await;
        };

        let result = self
            .retry
            .run_if(
                |attempt| {
                    debug!(analyzer = primary.name(), attempt, %content_type, "Running risk analysis");
                    primary.analyze(text, content_type)
                },
                |e| !matches!(e, SafetyError::AnalyzerUnavailable { .. }),
            )
            .await;

        match result {
            Ok(analysis) => Ok(Analyzed {
                analysis,
                analyzer: primary.name().to_string(),
            }),
            Err(SafetyError::AnalyzerUnavailable { message }) => {
                warn!(
                    analyzer = primary.name(),
                    fallback = self.fallback.name(),
                    reason = %message,
                    "Primary analyzer unavailable; using fallback"
                );
                self.analyze_with_fallback(text, content_type).await
            }
            Err(e) => {
                warn!(
                    analyzer = primary.name(),
                    attempts = self.retry.max_attempts,
                    error = %e,
                    "All safety analysis attempts failed"
                );
                Err(e)
            }
        }
    }

    async fn analyze_with_fallback(
        &self,
        text: &str,
        content_type: ContentType,
    ) -> Result<Analyzed, SafetyError> {
        let analysis = self.fallback.analyze(text, content_type).await?;
        self.metrics.record_fallback_analysis();
        Ok(Analyzed {
            analysis,
            analyzer: self.fallback.name().to_string(),
        })
    }

    /// Apply the tier and pick a strategy for a successful analysis.
    fn decide(&self, analyzed: &Analyzed, mut audit: Audit) -> SafetyDecision {
        let analysis = &analyzed.analysis;
        let allowed = tier_allows(self.config.tier, analysis);
        let strategy = select_strategy(&self.config, analysis.overall_risk);
        let human_review =
            requires_human_review(&self.config, analysis.overall_risk, analysis.risk_level);

        audit.insert("analyzer".into(), json!(analyzed.analyzer));
        audit.insert("safety_tier".into(), json!(self.config.tier.to_string()));
        audit.insert("analysis_result".into(), json!(analysis.is_safe));
        audit.insert("risk_score".into(), json!(analysis.overall_risk));
        audit.insert("risk_level".into(), json!(analysis.risk_level.to_string()));
        audit.insert("flagged_content".into(), json!(analysis.flagged_content));
        audit.insert("reasoning".into(), json!(analysis.reasoning));
        audit.insert("fallback_strategy".into(), json!(strategy.to_string()));
        self.insert_breaker_state(&mut audit);

        let reason = if allowed {
            "Content passed safety validation".to_string()
        } else {
            analysis.reasoning.clone()
        };

        SafetyDecision {
            allowed,
            risk_level: analysis.risk_level,
            confidence: 1.0 - analysis.overall_risk,
            fallback_strategy: strategy,
            fallback_responses: if allowed {
                Vec::new()
            } else {
                owned_responses(strategy)
            },
            requires_human_review: human_review,
            reason,
            audit_data: audit,
        }
    }

    fn breaker_open_decision(&self, mut audit: Audit) -> SafetyDecision {
        self.metrics.record_short_circuit();
        audit.insert("fallback_reason".into(), json!("circuit_breaker_open"));
        self.insert_breaker_state(&mut audit);
        SafetyDecision {
            allowed: false,
            risk_level: RiskLevel::High,
            confidence: 0.0,
            fallback_strategy: FallbackStrategy::Reject,
            fallback_responses: owned_responses(FallbackStrategy::Reject),
            requires_human_review: false,
            reason: REASON_BREAKER_OPEN.to_string(),
            audit_data: audit,
        }
    }

    fn analysis_failure_decision(&self, audit: Audit, error: &SafetyError) -> SafetyDecision {
        self.metrics.record_analysis_failure();
        self.failure_decision(
            audit,
            REASON_ANALYSIS_FAILED,
            "analysis_failure",
            Some(&error.to_string()),
        )
    }

    fn deadline_decision(&self, audit: Audit, deadline: Duration) -> SafetyDecision {
        warn!(deadline_ms = deadline.as_millis() as u64, "Safety validation deadline exceeded");
        self.failure_decision(audit, REASON_DEADLINE, "deadline_exceeded", None)
    }

    fn failure_decision(
        &self,
        mut audit: Audit,
        reason: &str,
        fallback_reason: &str,
        error: Option<&str>,
    ) -> SafetyDecision {
        audit.insert("fallback_reason".into(), json!(fallback_reason));
        if let Some(error) = error {
            audit.insert("error_message".into(), json!(error));
        }
        self.insert_breaker_state(&mut audit);
        SafetyDecision {
            allowed: false,
            risk_level: RiskLevel::High,
            confidence: 0.0,
            fallback_strategy: FallbackStrategy::Reject,
            fallback_responses: owned_responses(FallbackStrategy::Reject),
            requires_human_review: true,
            reason: reason.to_string(),
            audit_data: audit,
        }
    }

    fn insert_breaker_state(&self, audit: &mut Audit) {
        let status = self.breaker.status();
        audit.insert(
            "circuit_breaker_state".into(),
            json!(status.state.to_string()),
        );
        audit.insert("failure_count".into(), json!(status.failure_count));
    }

    fn finish(&self, decision: SafetyDecision) -> SafetyDecision {
        self.metrics
            .record_decision(decision.allowed, decision.requires_human_review);
        if decision.allowed {
            debug!(
                risk_level = %decision.risk_level,
                confidence = decision.confidence,
                "Safety decision: allowed"
            );
        } else {
            info!(
                risk_level = %decision.risk_level,
                strategy = %decision.fallback_strategy,
                human_review = decision.requires_human_review,
                reason = %decision.reason,
                "Safety decision: rejected"
            );
        }
        decision
    }
}

fn base_audit(id_key: &str, id: Uuid, validation_type: &str) -> Audit {
    let mut audit = Audit::new();
    audit.insert(id_key.to_string(), json!(id.to_string()));
    audit.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
    audit.insert("validation_type".into(), json!(validation_type));
    audit
}
