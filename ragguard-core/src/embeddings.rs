//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the contract the retrieval pipeline and the
//! hallucination detector consume. [`ModelBackedEmbedder`] implements it on
//! top of the [`ModelLifecycleManager`], so every embedding call goes through
//! model residency. [`HashingEmbeddingModel`] is a dependency-free model that
//! hashes term frequencies into a fixed number of dimensions.

use crate::error::RetrievalError;
use crate::models::{ModelLifecycleManager, ModelLoader};
use crate::types::Embedding;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Text to vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. An empty `model_name` selects the default model.
    async fn embed(&self, text: &str, model_name: &str) -> Result<Embedding, RetrievalError>;

    /// Embed several texts concurrently, preserving input order.
    async fn embed_batch(
        &self,
        texts: &[String],
        model_name: &str,
    ) -> Result<Vec<Embedding>, RetrievalError> {
        futures::future::try_join_all(texts.iter().map(|t| self.embed(t, model_name))).await
    }
}

/// A loaded model that can turn text into a vector synchronously.
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;
    fn dimension(&self) -> usize;
    fn encode(&self, text: &str) -> Vec<f32>;
}

/// Term-frequency hashing embedder, L2 normalised.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingModel {
    name: String,
    dimension: usize,
}

impl HashingEmbeddingModel {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension: dimension.max(1),
        }
    }
}

/// djb2
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

impl EmbeddingModel for HashingEmbeddingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            vector[simple_hash(term) % self.dimension] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// [`EmbeddingProvider`] that resolves models through the lifecycle manager.
pub struct ModelBackedEmbedder<L: ModelLoader> {
    manager: ModelLifecycleManager<L>,
}

impl<L> ModelBackedEmbedder<L>
where
    L: ModelLoader,
    L::Model: EmbeddingModel,
{
    pub fn new(manager: ModelLifecycleManager<L>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ModelLifecycleManager<L> {
        &self.manager
    }

    async fn resolve(&self, model_name: &str) -> Result<std::sync::Arc<L::Model>, RetrievalError> {
        let name = if model_name.trim().is_empty() {
            self.manager.default_model().to_string()
        } else {
            model_name.to_string()
        };
        if !self.manager.ensure_loaded(&name).await {
            return Err(RetrievalError::EmbeddingUnavailable {
                message: format!("model '{name}' could not be loaded"),
            });
        }
        // A concurrent load may have evicted it between the two calls.
        self.manager
            .get(&name)
            .await
            .ok_or_else(|| RetrievalError::EmbeddingUnavailable {
                message: format!("model '{name}' was evicted before use"),
            })
    }
}

#[async_trait]
impl<L> EmbeddingProvider for ModelBackedEmbedder<L>
where
    L: ModelLoader,
    L::Model: EmbeddingModel,
{
    async fn embed(&self, text: &str, model_name: &str) -> Result<Embedding, RetrievalError> {
        let model = self.resolve(model_name).await?;
        let vector = model.encode(text);
        debug!(model = model.name(), dimension = vector.len(), "Embedded text");
        Ok(Embedding::new(vector, model.name()))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        model_name: &str,
    ) -> Result<Vec<Embedding>, RetrievalError> {
        let model = self.resolve(model_name).await?;
        Ok(texts
            .iter()
            .map(|t| Embedding::new(model.encode(t), model.name()))
            .collect())
    }
}
