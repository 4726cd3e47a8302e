//! Bounded TTL cache in front of any [`RiskAnalyzer`].

use super::RiskAnalyzer;
use crate::analysis::{ContentType, SafetyAnalysis};
use async_trait::async_trait;
use lru::LruCache;
use ragguard_core::SafetyError;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

struct CachedAnalysis {
    stored_at: Instant,
    analysis: SafetyAnalysis,
}

/// Remembers successful analyses keyed by content type and exact text.
///
/// Entries older than the TTL are treated as misses. Failures are never
/// cached. A zero TTL turns the wrapper into a pass-through.
pub struct CachedRiskAnalyzer {
    inner: Arc<dyn RiskAnalyzer>,
    name: String,
    ttl: Duration,
    cache: Mutex<LruCache<(ContentType, String), CachedAnalysis>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedRiskAnalyzer {
    pub fn new(inner: Arc<dyn RiskAnalyzer>, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let name = format!("cached({})", inner.name());
        Self {
            inner,
            name,
            ttl,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<(ContentType, String), CachedAnalysis>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, key: &(ContentType, String)) -> Option<SafetyAnalysis> {
        let mut cache = self.lock();
        let fresh = cache
            .get(key)
            .map(|entry| (entry.stored_at.elapsed() < self.ttl, entry.analysis.clone()));
        match fresh {
            Some((true, analysis)) => Some(analysis),
            Some((false, _)) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl RiskAnalyzer for CachedRiskAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(
        &self,
        text: &str,
        content_type: ContentType,
    ) -> Result<SafetyAnalysis, SafetyError> {
        if self.ttl.is_zero() {
            return self.inner.analyze(text, content_type).await;
        }

        let key = (content_type, text.to_string());
        if let Some(analysis) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(analyzer = %self.name, %content_type, "Analysis cache hit");
            return Ok(analysis);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let analysis = self.inner.analyze(text, content_type).await?;
        self.lock().put(
            key,
            CachedAnalysis {
                stored_at: Instant::now(),
                analysis: analysis.clone(),
            },
        );
        Ok(analysis)
    }
}
