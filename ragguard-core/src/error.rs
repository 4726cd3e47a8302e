//! Error types for RAGGuard.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering retrieval, model residency, safety analysis and configuration.

/// Top-level error type for the RAGGuard libraries.
#[derive(Debug, thiserror::Error)]
pub enum RagGuardError {
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Safety error: {0}")]
    Safety(#[from] SafetyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the retrieval path.
///
/// Only the validation variants and the two upstream variants ever reach a
/// pipeline caller; `StageFailed` is produced by re-ranking stages and is
/// absorbed into the pipeline statistics.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("top_k must be between {min} and {max}, got {value}")]
    InvalidTopK { value: usize, min: usize, max: usize },

    #[error("Embedding provider unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    #[error("Vector index unavailable: {message}")]
    IndexUnavailable { message: String },

    #[error("Invalid retrieval result: {reason}")]
    InvalidResult { reason: String },

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Retrieval deadline of {timeout_ms}ms exceeded")]
    DeadlineExceeded { timeout_ms: u64 },
}

impl RetrievalError {
    /// Whether this error means retrieval as a whole is unavailable, as
    /// opposed to the caller having sent a malformed request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RetrievalError::EmbeddingUnavailable { .. }
                | RetrievalError::IndexUnavailable { .. }
                | RetrievalError::DeadlineExceeded { .. }
        )
    }
}

/// Errors from the model lifecycle manager and model loaders.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Failed to load model '{name}': {message}")]
    LoadFailed { name: String, message: String },

    #[error("Model '{name}' needs {required_mb:.0}MB but the budget is {budget_mb:.0}MB")]
    BudgetExceeded {
        name: String,
        required_mb: f64,
        budget_mb: f64,
    },

    #[error("Model '{name}' is not resident")]
    NotResident { name: String },
}

/// Errors from safety analyzers.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("Safety analyzer unavailable: {message}")]
    AnalyzerUnavailable { message: String },

    #[error("Safety analysis failed: {message}")]
    AnalysisFailed { message: String },

    #[error("Hallucination detection failed: {message}")]
    DetectionFailed { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },

    #[error("Failed to serialize configuration: {message}")]
    Serialize { message: String },

    #[error("Failed to write configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// A convenience Result type for RAGGuard operations.
pub type Result<T> = std::result::Result<T, RagGuardError>;
