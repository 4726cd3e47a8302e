//! Safety data model: analyses, hallucination results and final decisions.

use ragguard_core::FallbackStrategy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Coarse severity bucket derived from an overall risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.8 {
            RiskLevel::Critical
        } else if score >= 0.6 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Harm category scored by a risk analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    Violence,
    Hate,
    Sexual,
    SelfHarm,
    Illegal,
    Privacy,
    Misinformation,
    Toxicity,
}

impl SafetyCategory {
    pub const ALL: [SafetyCategory; 8] = [
        SafetyCategory::Violence,
        SafetyCategory::Hate,
        SafetyCategory::Sexual,
        SafetyCategory::SelfHarm,
        SafetyCategory::Illegal,
        SafetyCategory::Privacy,
        SafetyCategory::Misinformation,
        SafetyCategory::Toxicity,
    ];

    /// Score at or above which content is unsafe for this category.
    pub fn threshold(self) -> f32 {
        match self {
            SafetyCategory::Violence => 0.7,
            SafetyCategory::Hate => 0.6,
            SafetyCategory::Sexual => 0.8,
            SafetyCategory::SelfHarm => 0.9,
            SafetyCategory::Illegal => 0.8,
            SafetyCategory::Privacy => 0.7,
            SafetyCategory::Misinformation => 0.6,
            SafetyCategory::Toxicity => 0.5,
        }
    }

    /// Remediation hint shown when this category crosses its threshold.
    pub fn suggestion(self) -> &'static str {
        match self {
            SafetyCategory::Violence => "Remove violent language and imagery",
            SafetyCategory::Hate => "Ensure content is inclusive and respectful",
            SafetyCategory::Sexual => "Remove explicit sexual content",
            SafetyCategory::SelfHarm => "Include mental health resources for self-harm content",
            SafetyCategory::Illegal => "Remove references to illegal activities",
            SafetyCategory::Privacy => "Remove personal and sensitive information",
            SafetyCategory::Misinformation => "Verify factual accuracy of claims",
            SafetyCategory::Toxicity => "Improve tone to be more constructive",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SafetyCategory::Violence => "violence",
            SafetyCategory::Hate => "hate",
            SafetyCategory::Sexual => "sexual",
            SafetyCategory::SelfHarm => "self_harm",
            SafetyCategory::Illegal => "illegal",
            SafetyCategory::Privacy => "privacy",
            SafetyCategory::Misinformation => "misinformation",
            SafetyCategory::Toxicity => "toxicity",
        }
    }
}

impl std::fmt::Display for SafetyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the conversation is being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Input,
    Output,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Input => write!(f, "input"),
            ContentType::Output => write!(f, "output"),
        }
    }
}

/// The verdict of one risk analyzer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAnalysis {
    pub is_safe: bool,
    pub category_scores: BTreeMap<SafetyCategory, f32>,
    pub overall_risk: f32,
    pub risk_level: RiskLevel,
    pub flagged_content: Vec<String>,
    pub reasoning: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl SafetyAnalysis {
    /// Build an analysis from per-category scores.
    ///
    /// Overall risk is the highest category score. Content is unsafe when any
    /// category reaches its own threshold.
    pub fn from_category_scores(
        category_scores: BTreeMap<SafetyCategory, f32>,
        flagged_content: Vec<String>,
    ) -> Self {
        let category_scores: BTreeMap<_, _> = category_scores
            .into_iter()
            .map(|(c, s)| (c, clamp_unit(s)))
            .collect();
        let overall_risk = category_scores.values().copied().fold(0.0f32, f32::max);

        let crossed: Vec<(SafetyCategory, f32)> = category_scores
            .iter()
            .filter(|(c, s)| **s >= c.threshold())
            .map(|(c, s)| (*c, *s))
            .collect();

        let reasoning = if crossed.is_empty() {
            "Content appears safe based on analysis".to_string()
        } else {
            crossed
                .iter()
                .map(|(c, s)| format!("High {c} risk detected (score: {s:.2})"))
                .collect::<Vec<_>>()
                .join("; ")
        };
        let suggestions = crossed
            .iter()
            .map(|(c, _)| c.suggestion().to_string())
            .collect();

        Self {
            is_safe: crossed.is_empty(),
            category_scores,
            overall_risk,
            risk_level: RiskLevel::from_score(overall_risk),
            flagged_content,
            reasoning,
            suggestions,
        }
    }

    /// Build an analysis from a single aggregate score.
    pub fn from_overall_risk(
        overall_risk: f32,
        is_safe: bool,
        flagged_content: Vec<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        let overall_risk = clamp_unit(overall_risk);
        Self {
            is_safe,
            category_scores: BTreeMap::new(),
            overall_risk,
            risk_level: RiskLevel::from_score(overall_risk),
            flagged_content,
            reasoning: reasoning.into(),
            suggestions: Vec::new(),
        }
    }

    /// Merge a hallucination result into a new analysis.
    ///
    /// Risk becomes the larger of the two signals; hallucination findings are
    /// added to the flagged content and reasoning only when the response was
    /// judged hallucinated.
    pub fn combine_with_hallucination(&self, hallucination: &HallucinationResult) -> Self {
        let overall_risk = self.overall_risk.max(clamp_unit(hallucination.confidence_score));

        let mut flagged_content = self.flagged_content.clone();
        let mut reasoning = self.reasoning.clone();
        if hallucination.is_hallucinated {
            for kind in &hallucination.hallucination_types {
                let entry = format!("hallucination: {kind}");
                if !flagged_content.contains(&entry) {
                    flagged_content.push(entry);
                }
            }
            reasoning.push_str(&format!(
                "; Hallucination detected: {}",
                hallucination.explanations.join(", ")
            ));
        }

        let mut suggestions = self.suggestions.clone();
        suggestions.extend(hallucination.suggestions.iter().cloned());

        Self {
            is_safe: self.is_safe && !hallucination.is_hallucinated,
            category_scores: self.category_scores.clone(),
            overall_risk,
            risk_level: RiskLevel::from_score(overall_risk),
            flagged_content,
            reasoning,
            suggestions,
        }
    }
}

/// Kind of unsupported content found in a generated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HallucinationType {
    /// The answer drifts semantically away from its sources.
    Factual,
    /// Claims in the answer are not backed by the sources.
    Contradictory,
    /// Sentences cannot be attributed to any source.
    Sourceless,
    /// Numbers in the answer do not appear in the sources.
    Numerical,
}

impl HallucinationType {
    pub fn suggestions(self) -> [&'static str; 2] {
        match self {
            HallucinationType::Factual => [
                "Verify facts against reliable sources",
                "Add citations for factual claims",
            ],
            HallucinationType::Contradictory => [
                "Check for internal consistency",
                "Review conflicting statements",
            ],
            HallucinationType::Sourceless => [
                "Ensure all claims are supported by retrieved context",
                "Add source attribution for statements",
            ],
            HallucinationType::Numerical => [
                "Double-check all numbers and statistics",
                "Verify numerical data against sources",
            ],
        }
    }
}

impl std::fmt::Display for HallucinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HallucinationType::Factual => write!(f, "factual"),
            HallucinationType::Contradictory => write!(f, "contradictory"),
            HallucinationType::Sourceless => write!(f, "sourceless"),
            HallucinationType::Numerical => write!(f, "numerical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationResult {
    pub is_hallucinated: bool,
    pub confidence_score: f32,
    pub hallucination_types: BTreeSet<HallucinationType>,
    pub source_coverage: f32,
    pub factual_consistency: f32,
    pub semantic_similarity: f32,
    /// Sentences, claims and numbers that triggered a finding.
    #[serde(default)]
    pub problematic_segments: Vec<String>,
    #[serde(default)]
    pub explanations: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl HallucinationResult {
    /// A result for a response with nothing to check.
    pub fn clean() -> Self {
        Self {
            is_hallucinated: false,
            confidence_score: 0.0,
            hallucination_types: BTreeSet::new(),
            source_coverage: 1.0,
            factual_consistency: 1.0,
            semantic_similarity: 1.0,
            problematic_segments: Vec::new(),
            explanations: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

/// Outcome of one validation call. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub allowed: bool,
    pub risk_level: RiskLevel,
    /// How sure the engine is that the content is benign, `1 - overall_risk`.
    pub confidence: f32,
    pub fallback_strategy: FallbackStrategy,
    /// Canned texts for the caller to show in place of the content; empty when allowed.
    pub fallback_responses: Vec<String>,
    pub requires_human_review: bool,
    pub reason: String,
    pub audit_data: BTreeMap<String, serde_json::Value>,
}

pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
