//! Risk analyzers: the pluggable seam behind the decision engine.

pub mod cached;
pub mod keyword;
pub mod pattern;

use crate::analysis::{ContentType, SafetyAnalysis};
use async_trait::async_trait;
use ragguard_core::SafetyError;

pub use cached::CachedRiskAnalyzer;
pub use keyword::KeywordRiskAnalyzer;
pub use pattern::PatternRiskAnalyzer;

/// Scores a piece of text for harmful content.
#[async_trait]
pub trait RiskAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        text: &str,
        content_type: ContentType,
    ) -> Result<SafetyAnalysis, SafetyError>;
}
