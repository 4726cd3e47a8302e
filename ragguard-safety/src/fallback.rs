//! Tier policy and fallback strategy selection.

use crate::analysis::{RiskLevel, SafetyAnalysis};
use ragguard_core::{FallbackStrategy, SafetyConfig, SafetyTier};

/// Risk at or above which the strict tier rejects.
pub const STRICT_REJECT_AT: f32 = 0.2;
/// Risk at or above which the permissive tier rejects.
pub const PERMISSIVE_REJECT_AT: f32 = 0.8;

/// Whether a tier lets an analyzed piece of content through.
///
/// The moderate tier trusts the analyzer's own verdict; the other two look
/// only at overall risk.
pub fn tier_allows(tier: SafetyTier, analysis: &SafetyAnalysis) -> bool {
    match tier {
        SafetyTier::Strict => analysis.is_safe && analysis.overall_risk < STRICT_REJECT_AT,
        SafetyTier::Moderate => analysis.is_safe,
        SafetyTier::Permissive => analysis.overall_risk < PERMISSIVE_REJECT_AT,
    }
}

/// Pick the strategy for a rejected decision.
pub fn select_strategy(config: &SafetyConfig, overall_risk: f32) -> FallbackStrategy {
    if overall_risk >= config.human_review_threshold {
        FallbackStrategy::HumanReview
    } else {
        config.default_strategy
    }
}

pub fn requires_human_review(config: &SafetyConfig, overall_risk: f32, level: RiskLevel) -> bool {
    overall_risk >= config.human_review_threshold || level == RiskLevel::Critical
}

/// Canned texts shown to the caller in place of rejected content.
pub fn fallback_responses(strategy: FallbackStrategy) -> &'static [&'static str] {
    match strategy {
        FallbackStrategy::Reject => &[
            "I'm unable to process this request due to safety concerns.",
            "This request cannot be fulfilled safely.",
            "For safety reasons, I cannot provide a response to this query.",
        ],
        FallbackStrategy::SafeResponse => &[
            "I can help with general information on this topic. Could you please rephrase your question?",
            "I'd be happy to assist with a safer version of your question.",
            "Let me provide some general information that might be helpful.",
        ],
        FallbackStrategy::LimitedResponse => &[
            "I can provide limited information on this topic.",
            "Here's some basic information that should be safe to share.",
            "I can offer a general overview without going into specific details.",
        ],
        FallbackStrategy::AlternativeModel => &[
            "This request is being routed to a more conservative model.",
            "A restricted model will answer this request instead.",
        ],
        FallbackStrategy::CacheOnly => &[
            "I can only share previously reviewed answers for this topic.",
            "Only pre-approved information is available for this request.",
        ],
        FallbackStrategy::HumanReview => &[
            "Your request requires human review. Please contact support for assistance.",
            "This query needs additional review. Our team will get back to you soon.",
            "For quality and safety purposes, this request requires manual review.",
        ],
    }
}

pub(crate) fn owned_responses(strategy: FallbackStrategy) -> Vec<String> {
    fallback_responses(strategy)
        .iter()
        .map(|s| s.to_string())
        .collect()
}
