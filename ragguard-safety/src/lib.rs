//! # RAGGuard Safety
//!
//! Decides whether a query, and the answer generated for it, may be served.
//! [`SafetyDecisionEngine`] combines a pluggable [`RiskAnalyzer`], an optional
//! [`HallucinationDetector`], a shared [`CircuitBreaker`] and fallback
//! policies into one [`SafetyDecision`] with an audit trail.

pub mod analysis;
pub mod analyzers;
pub mod breaker;
pub mod engine;
pub mod fallback;
pub mod hallucination;
pub mod metrics;
pub mod retry;

pub use analysis::{
    ContentType, HallucinationResult, HallucinationType, RiskLevel, SafetyAnalysis,
    SafetyCategory, SafetyDecision,
};
pub use analyzers::{CachedRiskAnalyzer, KeywordRiskAnalyzer, PatternRiskAnalyzer, RiskAnalyzer};
pub use breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerStatus, CircuitState, SharedCircuitBreaker,
};
pub use engine::{GenerationRequest, SafetyDecisionEngine, SafetyDecisionEngineBuilder};
pub use fallback::fallback_responses;
pub use hallucination::{HallucinationDetector, HeuristicHallucinationDetector};
pub use metrics::{SafetyMetrics, SafetyMetricsSnapshot};
pub use retry::{Backoff, RetryPolicy};
