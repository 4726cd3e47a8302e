//! Regex-based per-category risk scoring.

use super::RiskAnalyzer;
use crate::analysis::{ContentType, SafetyAnalysis, SafetyCategory};
use async_trait::async_trait;
use ragguard_core::SafetyError;
use regex::Regex;
use std::collections::BTreeMap;

/// Risk added for every pattern match.
pub const MATCH_WEIGHT: f32 = 0.2;

const CATEGORY_PATTERNS: &[(SafetyCategory, &str)] = &[
    (
        SafetyCategory::Violence,
        r"\b(kill|murder|violence|attack|harm|hurt)\b",
    ),
    (
        SafetyCategory::Violence,
        r"\b(weapon|gun|knife|bomb|explos)\w*\b",
    ),
    (
        SafetyCategory::Hate,
        r"\b(hate|discriminat|racist|sexist|homophobic)\b",
    ),
    (SafetyCategory::Hate, r"\b(slur|offensive|derogatory)\b"),
    (
        SafetyCategory::Sexual,
        r"\b(explicit|sexual|porn|adult|nsfw)\b",
    ),
    (
        SafetyCategory::Sexual,
        r"\b(inappropriate|offensive sexual)\b",
    ),
    (
        SafetyCategory::SelfHarm,
        r"\b(suicide|self.harm|kill myself|end my life)\b",
    ),
    (
        SafetyCategory::SelfHarm,
        r"\b(depression|anxiety|mental health crisis)\b",
    ),
    (
        SafetyCategory::Illegal,
        r"\b(illegal|criminal|fraud|scam|hack)\b",
    ),
    (
        SafetyCategory::Illegal,
        r"\b(drug|narcotic|substance abuse)\b",
    ),
    (
        SafetyCategory::Privacy,
        r"\b(password|secret|private.key|ssn|credit.card)\b",
    ),
    (
        SafetyCategory::Privacy,
        r"\b(personal.info|confidential|sensitive)\b",
    ),
];

/// Deterministic analyzer scoring each [`SafetyCategory`] by regex matches.
///
/// Every match adds [`MATCH_WEIGHT`] to its category, capped at 1.0. Matches
/// are reported as `category:term` in the flagged content.
pub struct PatternRiskAnalyzer {
    patterns: Vec<(SafetyCategory, Regex)>,
}

impl Default for PatternRiskAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternRiskAnalyzer {
    pub fn new() -> Self {
        let patterns = CATEGORY_PATTERNS
            .iter()
            .filter_map(|(category, pat)| Regex::new(pat).ok().map(|re| (*category, re)))
            .collect();
        Self { patterns }
    }

    /// Score `text` synchronously.
    pub fn score(&self, text: &str) -> SafetyAnalysis {
        let lowered = text.to_lowercase();
        let mut scores: BTreeMap<SafetyCategory, f32> =
            SafetyCategory::ALL.iter().map(|c| (*c, 0.0)).collect();
        let mut flagged = Vec::new();

        for (category, re) in &self.patterns {
            for caps in re.captures_iter(&lowered) {
                let term = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                if let Some(score) = scores.get_mut(category) {
                    *score = (*score + MATCH_WEIGHT).min(1.0);
                }
                flagged.push(format!("{category}:{term}"));
            }
        }

        SafetyAnalysis::from_category_scores(scores, flagged)
    }
}

#[async_trait]
impl RiskAnalyzer for PatternRiskAnalyzer {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn analyze(
        &self,
        text: &str,
        _content_type: ContentType,
    ) -> Result<SafetyAnalysis, SafetyError> {
        Ok(self.score(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RiskLevel;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(
            PatternRiskAnalyzer::new().patterns.len(),
            CATEGORY_PATTERNS.len()
        );
    }

    #[test]
    fn test_benign_text_is_safe() {
        let analysis = PatternRiskAnalyzer::new().score("What is the refund policy for shoes?");
        assert!(analysis.is_safe);
        assert_eq!(analysis.overall_risk, 0.0);
        assert_eq!(analysis.risk_level, RiskLevel::Low);
        assert!(analysis.flagged_content.is_empty());
        assert_eq!(analysis.category_scores.len(), SafetyCategory::ALL.len());
    }

    #[test]
    fn test_matches_accumulate_per_category() {
        let analysis =
            PatternRiskAnalyzer::new().score("Share the password and the secret credit card");
        let privacy = analysis.category_scores[&SafetyCategory::Privacy];
        assert!((privacy - 0.6).abs() < 1e-6);
        assert!(
            analysis
                .flagged_content
                .contains(&"privacy:password".to_string())
        );
        assert!(
            analysis
                .flagged_content
                .contains(&"privacy:credit card".to_string())
        );
        // 0.6 stays under the privacy threshold of 0.7.
        assert!(analysis.is_safe);
        assert_eq!(analysis.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_crossing_category_threshold_is_unsafe() {
        let analysis = PatternRiskAnalyzer::new()
            .score("attack with a gun, a knife and a bomb to kill and hurt");
        assert!(!analysis.is_safe);
        assert_eq!(analysis.category_scores[&SafetyCategory::Violence], 1.0);
        assert_eq!(analysis.risk_level, RiskLevel::Critical);
        assert!(analysis.reasoning.contains("High violence risk detected"));
        assert_eq!(
            analysis.suggestions,
            vec!["Remove violent language and imagery".to_string()]
        );
    }

    #[test]
    fn test_word_boundaries_and_case() {
        let analyzer = PatternRiskAnalyzer::new();
        assert!(analyzer.score("Skills and harmony").flagged_content.is_empty());
        assert_eq!(
            analyzer.score("EXPLOSIVES").flagged_content,
            vec!["violence:explos".to_string()]
        );
    }

    #[tokio::test]
    async fn test_trait_analyze_matches_score() {
        let analyzer = PatternRiskAnalyzer::new();
        let text = "how to hack a bank";
        let analysis = analyzer.analyze(text, ContentType::Input).await.unwrap();
        assert_eq!(analysis, analyzer.score(text));
    }
}
