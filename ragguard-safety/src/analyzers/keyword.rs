//! Blocked-term fallback analyzer with no external dependencies.

use super::RiskAnalyzer;
use crate::analysis::{ContentType, SafetyAnalysis};
use async_trait::async_trait;
use ragguard_core::SafetyError;

pub const BLOCKED_TERMS: &[&str] = &[
    "violence",
    "hate",
    "kill",
    "harm",
    "illegal",
    "password",
    "secret",
    "private_key",
];

/// Risk added per blocked term present.
pub const TERM_WEIGHT: f32 = 0.2;

/// Risk at or above which content is unsafe.
pub const UNSAFE_AT: f32 = 0.5;

/// Substring match against a fixed blocked-term list.
///
/// Used when the primary analyzer cannot answer, so the engine always has a
/// verdict.
#[derive(Debug, Clone)]
pub struct KeywordRiskAnalyzer {
    terms: Vec<String>,
}

impl Default for KeywordRiskAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordRiskAnalyzer {
    pub fn new() -> Self {
        Self::with_terms(BLOCKED_TERMS.iter().copied())
    }

    pub fn with_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terms: terms.into_iter().map(|t| t.into().to_lowercase()).collect(),
        }
    }

    pub fn score(&self, text: &str) -> SafetyAnalysis {
        let lowered = text.to_lowercase();
        let flagged: Vec<String> = self
            .terms
            .iter()
            .filter(|t| lowered.contains(t.as_str()))
            .cloned()
            .collect();
        let risk = (flagged.len() as f32 * TERM_WEIGHT).min(1.0);
        let is_safe = risk < UNSAFE_AT;
        let reasoning = format!(
            "Fallback analysis: {}",
            if is_safe { "Safe" } else { "Unsafe" }
        );
        let mut analysis = SafetyAnalysis::from_overall_risk(risk, is_safe, flagged, reasoning);
        if !is_safe {
            analysis.suggestions.push("Review content".to_string());
        }
        analysis
    }
}

#[async_trait]
impl RiskAnalyzer for KeywordRiskAnalyzer {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn analyze(
        &self,
        text: &str,
        _content_type: ContentType,
    ) -> Result<SafetyAnalysis, SafetyError> {
        Ok(self.score(text))
    }
}
