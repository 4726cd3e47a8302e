//! Model loader trait and the built-in hashing loader.

use crate::embeddings::HashingEmbeddingModel;
use crate::error::ModelError;
use async_trait::async_trait;
use std::sync::Arc;

/// Produces model handles for the lifecycle manager.
///
/// Loads may be slow and are always awaited outside the manager's locks.
#[async_trait]
pub trait ModelLoader: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    /// Load the named model into memory.
    async fn load(&self, name: &str) -> Result<Self::Model, ModelError>;

    /// Memory the loaded model is expected to occupy, if the loader knows.
    fn estimate_memory_mb(&self, _name: &str) -> Option<f64> {
        None
    }

    /// Called once a model leaves the cache.
    fn release(&self, _name: &str, _model: Arc<Self::Model>) {}
}

/// Loads [`HashingEmbeddingModel`]s of a fixed dimension for any name.
#[derive(Debug, Clone)]
pub struct HashingModelLoader {
    dimension: usize,
}

impl HashingModelLoader {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl ModelLoader for HashingModelLoader {
    type Model = HashingEmbeddingModel;

    async fn load(&self, name: &str) -> Result<Self::Model, ModelError> {
        if self.dimension == 0 {
            return Err(ModelError::LoadFailed {
                name: name.to_string(),
                message: "embedding dimension must be positive".into(),
            });
        }
        Ok(HashingEmbeddingModel::new(name, self.dimension))
    }

    fn estimate_memory_mb(&self, _name: &str) -> Option<f64> {
        // One f32 per dimension plus bookkeeping; negligible.
        Some(1.0)
    }
}
