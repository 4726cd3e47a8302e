//! Hallucination detection for generated responses.
//!
//! [`HeuristicHallucinationDetector`] compares a response with the passages it
//! was generated from using four signals:
//! - semantic similarity of each response sentence to the joined context
//! - claim support: sentences carrying entities or numbers must closely match
//!   at least one passage
//! - source attribution: share of sentences that match some passage
//! - numeric consistency: every number in the response must appear in the
//!   context within a tolerance
//!
//! The weighted sum of the four shortfalls is the detection confidence.

use crate::analysis::{HallucinationResult, HallucinationType};
use async_trait::async_trait;
use ragguard_core::{EmbeddingProvider, HallucinationConfig, SafetyError, cosine_similarity};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

const SEMANTIC_WEIGHT: f32 = 0.3;
const FACTUAL_WEIGHT: f32 = 0.3;
const SOURCE_WEIGHT: f32 = 0.2;
const NUMERICAL_WEIGHT: f32 = 0.2;

/// Claims shorter than this are not checked.
const MIN_CLAIM_CHARS: usize = 20;

const ENTITY_PATTERN: &str = r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b|\b\d+(?:\.\d+)?\b";
const NUMBER_PATTERN: &str =
    r"\b(\d+(?:\.\d+)?)\b(?:\s*(?:%|percent|dollars?|USD|years?|days?|months?))?";

/// Checks a generated response against its retrieval context.
#[async_trait]
pub trait HallucinationDetector: Send + Sync {
    async fn detect(
        &self,
        query: &str,
        response: &str,
        context: &[String],
    ) -> Result<HallucinationResult, SafetyError>;
}

pub struct HeuristicHallucinationDetector {
    embedder: Arc<dyn EmbeddingProvider>,
    config: HallucinationConfig,
    entity_re: Regex,
    number_re: Regex,
}

struct NumberMention {
    text: String,
    value: f64,
}

impl HeuristicHallucinationDetector {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        config: HallucinationConfig,
    ) -> Result<Self, SafetyError> {
        let compile = |pat: &str| {
            Regex::new(pat).map_err(|e| SafetyError::DetectionFailed {
                message: format!("invalid pattern: {e}"),
            })
        };
        Ok(Self {
            embedder,
            config,
            entity_re: compile(ENTITY_PATTERN)?,
            number_re: compile(NUMBER_PATTERN)?,
        })
    }

    pub fn config(&self) -> &HallucinationConfig {
        &self.config
    }

    fn model_name(&self) -> &str {
        self.config.model_name.as_deref().unwrap_or("")
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SafetyError> {
        let embeddings = self
            .embedder
            .embed_batch(texts, self.model_name())
            .await
            .map_err(|e| SafetyError::DetectionFailed {
                message: e.to_string(),
            })?;
        Ok(embeddings.into_iter().map(|e| e.vector).collect())
    }

    /// Indices of sentences with entities worth verifying.
    fn claim_indices(&self, sentences: &[String]) -> Vec<usize> {
        sentences
            .iter()
            .enumerate()
            .filter(|(_, s)| s.chars().count() > MIN_CLAIM_CHARS && self.entity_re.is_match(s))
            .map(|(i, _)| i)
            .take(self.config.max_claims)
            .collect()
    }

    fn extract_numbers(&self, text: &str) -> Vec<NumberMention> {
        self.number_re
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?.as_str().to_string();
                let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
                Some(NumberMention { text: whole, value })
            })
            .collect()
    }

    /// Response numbers with no context number within tolerance.
    fn inconsistent_numbers(&self, response: &str, context: &[String]) -> Vec<String> {
        let context_numbers = self.extract_numbers(&context.join(" "));
        self.extract_numbers(response)
            .into_iter()
            .filter(|n| {
                !context_numbers
                    .iter()
                    .any(|c| (n.value - c.value).abs() <= self.config.numeric_tolerance)
            })
            .map(|n| n.text)
            .collect()
    }
}

pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn supported_by_any(vector: &[f32], passages: &[Vec<f32>], threshold: f32) -> bool {
    passages
        .iter()
        .any(|p| cosine_similarity(vector, p) > threshold)
}

#[async_trait]
impl HallucinationDetector for HeuristicHallucinationDetector {
    async fn detect(
        &self,
        query: &str,
        response: &str,
        context: &[String],
    ) -> Result<HallucinationResult, SafetyError> {
        if context.is_empty() {
            return Err(SafetyError::DetectionFailed {
                message: "no context to check the response against".into(),
            });
        }

        let sentences = split_sentences(response);

        // One batch: sentences, then each passage, then the joined context.
        let mut texts = sentences.clone();
        texts.extend(context.iter().cloned());
        texts.push(context.join(" "));
        let mut vectors = self.embed_all(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(SafetyError::DetectionFailed {
                message: format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                ),
            });
        }
        let joined = vectors.pop().unwrap_or_default();
        let passages = vectors.split_off(sentences.len());
        let sentence_vectors = vectors;

        let mut problematic_segments = Vec::new();

        // Semantic similarity
        let similarities: Vec<f32> = sentence_vectors
            .iter()
            .map(|v| cosine_similarity(v, &joined))
            .collect();
        let semantic_similarity = if similarities.is_empty() {
            0.0
        } else {
            similarities.iter().sum::<f32>() / similarities.len() as f32
        };
        let low_similarity: Vec<String> = sentences
            .iter()
            .zip(&similarities)
            .filter(|(_, s)| **s < self.config.semantic_similarity_threshold)
            .map(|(text, _)| text.clone())
            .collect();

        // Claim support
        let claims = self.claim_indices(&sentences);
        let unsupported_claims: Vec<String> = claims
            .iter()
            .filter(|&&i| {
                !supported_by_any(
                    &sentence_vectors[i],
                    &passages,
                    self.config.claim_support_threshold,
                )
            })
            .map(|&i| sentences[i].clone())
            .collect();
        let factual_consistency = if claims.is_empty() {
            1.0
        } else {
            (claims.len() - unsupported_claims.len()) as f32 / claims.len() as f32
        };

        // Source attribution
        let unattributed: Vec<String> = sentences
            .iter()
            .zip(&sentence_vectors)
            .filter(|(_, v)| !supported_by_any(v, &passages, self.config.attribution_threshold))
            .map(|(text, _)| text.clone())
            .collect();
        let source_coverage = if sentences.is_empty() {
            0.0
        } else {
            (sentences.len() - unattributed.len()) as f32 / sentences.len() as f32
        };

        // Numeric consistency
        let bad_numbers = self.inconsistent_numbers(response, context);

        let mut types = BTreeSet::new();
        let mut explanations = Vec::new();
        if semantic_similarity < self.config.semantic_similarity_threshold {
            types.insert(HallucinationType::Factual);
            problematic_segments.extend(low_similarity);
            explanations.push(format!(
                "Low semantic similarity with sources ({semantic_similarity:.2})"
            ));
        }
        if factual_consistency < self.config.factual_consistency_threshold {
            types.insert(HallucinationType::Contradictory);
            problematic_segments.extend(unsupported_claims);
            explanations.push(format!(
                "Factual inconsistencies detected ({factual_consistency:.2})"
            ));
        }
        if source_coverage < self.config.source_coverage_threshold {
            types.insert(HallucinationType::Sourceless);
            problematic_segments.extend(unattributed);
            explanations.push(format!("Low source attribution ({source_coverage:.2})"));
        }
        if !bad_numbers.is_empty() {
            types.insert(HallucinationType::Numerical);
            problematic_segments.extend(bad_numbers.iter().cloned());
            explanations.push("Numerical inconsistencies detected".to_string());
        }

        let confidence_score = (SEMANTIC_WEIGHT * (1.0 - semantic_similarity.clamp(0.0, 1.0))
            + FACTUAL_WEIGHT * (1.0 - factual_consistency)
            + SOURCE_WEIGHT * (1.0 - source_coverage)
            + NUMERICAL_WEIGHT * if bad_numbers.is_empty() { 0.0 } else { 1.0 })
        .clamp(0.0, 1.0);

        let is_hallucinated = !types.is_empty() && confidence_score > self.config.confidence_threshold;

        debug!(
            query_len = query.len(),
            sentences = sentences.len(),
            claims = claims.len(),
            semantic_similarity,
            factual_consistency,
            source_coverage,
            confidence_score,
            is_hallucinated,
            "Hallucination analysis complete"
        );

        Ok(HallucinationResult {
            is_hallucinated,
            confidence_score,
            suggestions: suggestions_for(&types),
            hallucination_types: types,
            source_coverage,
            factual_consistency,
            semantic_similarity,
            problematic_segments,
            explanations,
        })
    }
}

fn suggestions_for(types: &BTreeSet<HallucinationType>) -> Vec<String> {
    let mut out: Vec<String> = types
        .iter()
        .flat_map(|t| t.suggestions())
        .map(str::to_string)
        .collect();
    if types.len() > 1 {
        out.push("Consider reducing response complexity".to_string());
        out.push("Focus on well-supported information".to_string());
    }
    out
}
