//! LRU model cache with a pinned default model.
//!
//! Models are kept resident while the sum of their memory estimates stays
//! within the configured budget. When a new model would not fit, the least
//! recently used non-default models are evicted. Two deliberate departures
//! from a textbook LRU:
//!
//! - the default model is never evicted to make room; it leaves the cache
//!   only through [`ModelLifecycleManager::unload`] or
//!   [`ModelLifecycleManager::shutdown`];
//! - eviction happens only after the incoming model has loaded, and only when
//!   the evictions actually make it fit. A failed load, or a model that would
//!   not fit even with every evictable model gone, leaves the cache exactly as
//!   it was. The cache therefore never drops below one resident model on
//!   account of a load.
//!
//! Loads and unloads for the same name are serialized by a per-name lock.
//! Recency updates on the hot path only take the shared read lock.

use super::loader::ModelLoader;
use crate::config::ModelsConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Point-in-time view of one resident model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCacheEntryInfo {
    pub name: String,
    pub loaded_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub request_count: u64,
    pub memory_estimate_mb: f64,
    pub is_default: bool,
}

struct CacheEntry<M> {
    name: String,
    handle: Arc<M>,
    loaded_at: DateTime<Utc>,
    last_used_ms: AtomicI64,
    /// Manager-wide recency tick; larger is more recent.
    last_used_seq: AtomicU64,
    request_count: AtomicU64,
    memory_estimate_mb: f64,
}

impl<M> CacheEntry<M> {
    fn touch(&self, seq: u64) {
        self.last_used_seq.fetch_max(seq, Ordering::Relaxed);
        self.last_used_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn info(&self, default_model: &str) -> ModelCacheEntryInfo {
        let last_used = DateTime::from_timestamp_millis(self.last_used_ms.load(Ordering::Relaxed))
            .unwrap_or(self.loaded_at);
        ModelCacheEntryInfo {
            name: self.name.clone(),
            loaded_at: self.loaded_at,
            last_used,
            request_count: self.request_count.load(Ordering::Relaxed),
            memory_estimate_mb: self.memory_estimate_mb,
            is_default: self.name == default_model,
        }
    }
}

struct Inner<L: ModelLoader> {
    loader: L,
    config: ModelsConfig,
    entries: RwLock<HashMap<String, Arc<CacheEntry<L::Model>>>>,
    load_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    clock: AtomicU64,
}

impl<L: ModelLoader> Inner<L> {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn load_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.load_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    fn estimate_for(&self, name: &str) -> f64 {
        self.config
            .memory_estimates_mb
            .get(name)
            .copied()
            .or_else(|| self.loader.estimate_memory_mb(name))
            .unwrap_or(self.config.default_memory_estimate_mb)
    }

    async fn touch(&self, name: &str) -> bool {
        let entries = self.entries.read().await;
        match entries.get(name) {
            Some(entry) => {
                entry.touch(self.tick());
                true
            }
            None => false,
        }
    }

    /// Runs with the per-name lock held.
    async fn load_and_commit(&self, name: &str) -> bool {
        if self.touch(name).await {
            return true;
        }

        let budget = self.config.max_memory_budget_mb;
        let estimate = self.estimate_for(name);
        if estimate > budget {
            warn!(
                model = name,
                estimate_mb = estimate,
                budget_mb = budget,
                "Model exceeds the memory budget on its own; refusing to load"
            );
            return false;
        }

        let started = std::time::Instant::now();
        let model = match self.loader.load(name).await {
            Ok(model) => Arc::new(model),
            Err(e) => {
                warn!(model = name, error = %e, "Model load failed");
                return false;
            }
        };

        // Victims are picked and removed only once the new model is in hand,
        // so a failed load leaves the cache as it was. While the load runs,
        // real usage can exceed the budget by up to `estimate`.
        let mut evicted = Vec::new();
        let admitted = {
            let mut entries = self.entries.write().await;
            let mut usage: f64 = entries.values().map(|e| e.memory_estimate_mb).sum();

            let mut candidates: Vec<_> = entries
                .values()
                .filter(|e| e.name != self.config.default_model)
                .map(|e| {
                    (
                        e.last_used_seq.load(Ordering::Relaxed),
                        e.name.clone(),
                        e.memory_estimate_mb,
                    )
                })
                .collect();
            candidates.sort_by_key(|(seq, _, _)| *seq);

            let mut victims = Vec::new();
            for (_, victim, mb) in candidates {
                if usage + estimate <= budget {
                    break;
                }
                usage -= mb;
                victims.push(victim);
            }

            let fits = usage + estimate <= budget;
            if fits {
                for victim in &victims {
                    if let Some(entry) = entries.remove(victim) {
                        evicted.push(entry);
                    }
                }
                let now = Utc::now();
                let entry = CacheEntry {
                    name: name.to_string(),
                    handle: Arc::clone(&model),
                    loaded_at: now,
                    last_used_ms: AtomicI64::new(now.timestamp_millis()),
                    last_used_seq: AtomicU64::new(self.tick()),
                    request_count: AtomicU64::new(0),
                    memory_estimate_mb: estimate,
                };
                entries.insert(name.to_string(), Arc::new(entry));
            }
            fits
        };

        for entry in evicted {
            info!(
                evicted = %entry.name,
                freed_mb = entry.memory_estimate_mb,
                incoming = name,
                "Evicted least recently used model"
            );
            self.loader.release(&entry.name, Arc::clone(&entry.handle));
        }

        if admitted {
            info!(
                model = name,
                estimate_mb = estimate,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Model loaded"
            );
        } else {
            warn!(
                model = name,
                estimate_mb = estimate,
                budget_mb = budget,
                "Model does not fit beside the pinned default model; releasing"
            );
            self.loader.release(name, model);
        }
        admitted
    }
}

/// Keeps expensive models resident under a memory ceiling.
///
/// Cloning is cheap and every clone shares the same cache.
pub struct ModelLifecycleManager<L: ModelLoader> {
    inner: Arc<Inner<L>>,
}

impl<L: ModelLoader> Clone for ModelLifecycleManager<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: ModelLoader> std::fmt::Debug for ModelLifecycleManager<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLifecycleManager")
            .field("default_model", &self.inner.config.default_model)
            .field("max_memory_budget_mb", &self.inner.config.max_memory_budget_mb)
            .finish()
    }
}

impl<L: ModelLoader> ModelLifecycleManager<L> {
    pub fn new(loader: L, config: ModelsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                config,
                entries: RwLock::new(HashMap::new()),
                load_locks: Mutex::new(HashMap::new()),
                clock: AtomicU64::new(0),
            }),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.inner.config.default_model
    }

    pub fn budget_mb(&self) -> f64 {
        self.inner.config.max_memory_budget_mb
    }

    /// Make `name` resident, evicting older models if needed.
    ///
    /// Returns `false` when the model failed to load or cannot fit. A model
    /// that is already resident only has its recency refreshed.
    ///
    /// The load itself runs on a spawned task, so dropping this future does
    /// not abandon a half-finished load or leave the cache inconsistent.
    pub async fn ensure_loaded(&self, name: &str) -> bool {
        if self.inner.touch(name).await {
            debug!(model = name, "Model already resident");
            return true;
        }

        let lock = self.inner.load_lock(name);
        let inner = Arc::clone(&self.inner);
        let owned = name.to_string();
        let task = tokio::spawn(async move {
            let _guard = lock.lock().await;
            inner.load_and_commit(&owned).await
        });

        match task.await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(model = name, error = %e, "Model load task did not complete");
                false
            }
        }
    }

    /// Handle to a resident model. Counts as a use.
    pub async fn get(&self, name: &str) -> Option<Arc<L::Model>> {
        let entries = self.inner.entries.read().await;
        let entry = entries.get(name)?;
        entry.touch(self.inner.tick());
        entry.request_count.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&entry.handle))
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.inner.entries.read().await.contains_key(name)
    }

    /// Drop `name` from the cache, including the default model.
    ///
    /// Returns whether the model was resident.
    pub async fn unload(&self, name: &str) -> bool {
        let lock = self.inner.load_lock(name);
        let _guard = lock.lock().await;
        let removed = self.inner.entries.write().await.remove(name);
        match removed {
            Some(entry) => {
                info!(model = name, freed_mb = entry.memory_estimate_mb, "Model unloaded");
                self.inner.loader.release(name, Arc::clone(&entry.handle));
                true
            }
            None => false,
        }
    }

    /// Drop every resident model.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.inner.entries.write().await.drain().collect();
        let count = drained.len();
        for (name, entry) in drained {
            self.inner.loader.release(&name, Arc::clone(&entry.handle));
        }
        info!(models = count, "Model manager shut down");
    }

    pub async fn memory_usage_mb(&self) -> f64 {
        self.inner
            .entries
            .read()
            .await
            .values()
            .map(|e| e.memory_estimate_mb)
            .sum()
    }

    pub async fn entry(&self, name: &str) -> Option<ModelCacheEntryInfo> {
        self.inner
            .entries
            .read()
            .await
            .get(name)
            .map(|e| e.info(&self.inner.config.default_model))
    }

    /// Snapshots of all resident models, sorted by name.
    pub async fn resident_models(&self) -> Vec<ModelCacheEntryInfo> {
        let entries = self.inner.entries.read().await;
        let mut infos: Vec<_> = entries
            .values()
            .map(|e| e.info(&self.inner.config.default_model))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::models::HashingModelLoader;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingLoader {
        loads: AtomicUsize,
        failing: HashSet<String>,
        released: Mutex<Vec<String>>,
    }

    impl RecordingLoader {
        fn failing(names: &[&str]) -> Self {
            Self {
                failing: names.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ModelLoader for RecordingLoader {
        type Model = String;

        async fn load(&self, name: &str) -> Result<String, ModelError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(name) {
                return Err(ModelError::LoadFailed {
                    name: name.into(),
                    message: "weights missing".into(),
                });
            }
            Ok(format!("handle:{name}"))
        }

        fn release(&self, name: &str, _model: Arc<String>) {
            self.released.lock().unwrap().push(name.to_string());
        }
    }

    fn config(default_model: &str, budget: f64) -> ModelsConfig {
        ModelsConfig {
            default_model: default_model.into(),
            max_memory_budget_mb: budget,
            default_memory_estimate_mb: 500.0,
            memory_estimates_mb: BTreeMap::new(),
            embedding_dimension: 16,
        }
    }

    async fn names(manager: &ModelLifecycleManager<RecordingLoader>) -> Vec<String> {
        manager
            .resident_models()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect()
    }

    #[tokio::test]
    async fn test_load_and_get() {
        let manager = ModelLifecycleManager::new(RecordingLoader::default(), config("d", 2000.0));
        assert!(manager.ensure_loaded("a").await);
        assert_eq!(manager.get("a").await.as_deref(), Some(&"handle:a".to_string()));
        assert!(manager.get("missing").await.is_none());

        let info = manager.entry("a").await.unwrap();
        assert_eq!(info.request_count, 1);
        assert!(!info.is_default);
        assert_eq!(manager.memory_usage_mb().await, 500.0);
    }

    #[tokio::test]
    async fn test_memory_estimate_precedence() {
        let mut cfg = config("d", 2000.0);
        cfg.memory_estimates_mb.insert("large".into(), 1500.0);

        // No loader estimate: configured value, then the default.
        let manager = ModelLifecycleManager::new(RecordingLoader::default(), cfg.clone());
        assert_eq!(manager.inner.estimate_for("large"), 1500.0);
        assert_eq!(manager.inner.estimate_for("anything"), 500.0);
        assert!(manager.ensure_loaded("anything").await);
        assert_eq!(manager.entry("anything").await.unwrap().memory_estimate_mb, 500.0);

        // The loader's estimate beats the default but not the config.
        let manager = ModelLifecycleManager::new(HashingModelLoader::new(8), cfg);
        assert_eq!(manager.inner.estimate_for("large"), 1500.0);
        assert_eq!(manager.inner.estimate_for("anything"), 1.0);
        assert!(manager.ensure_loaded("anything").await);
        assert_eq!(manager.memory_usage_mb().await, 1.0);
    }

    #[tokio::test]
    async fn test_resident_load_never_evicts() {
        let manager = ModelLifecycleManager::new(RecordingLoader::default(), config("d", 1000.0));
        assert!(manager.ensure_loaded("a").await);
        assert!(manager.ensure_loaded("b").await);
        for _ in 0..5 {
            assert!(manager.ensure_loaded("a").await);
            assert!(manager.ensure_loaded("b").await);
        }
        assert_eq!(manager.inner.loader.loads.load(Ordering::SeqCst), 2);
        assert!(manager.inner.loader.released.lock().unwrap().is_empty());
        assert_eq!(names(&manager).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let manager = ModelLifecycleManager::new(RecordingLoader::default(), config("d", 1000.0));
        assert!(manager.ensure_loaded("a").await);
        assert!(manager.ensure_loaded("b").await);
        // a becomes more recent than b
        assert!(manager.get("a").await.is_some());

        assert!(manager.ensure_loaded("c").await);
        assert_eq!(names(&manager).await, vec!["a", "c"]);
        assert_eq!(
            *manager.inner.loader.released.lock().unwrap(),
            vec!["b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_default_model_is_pinned() {
        let manager = ModelLifecycleManager::new(RecordingLoader::default(), config("a", 1000.0));
        assert!(manager.ensure_loaded("a").await);
        assert!(manager.ensure_loaded("b").await);
        // a is the oldest, but pinned
        assert!(manager.ensure_loaded("c").await);
        assert_eq!(names(&manager).await, vec!["a", "c"]);
        assert!(manager.entry("a").await.unwrap().is_default);
    }

    #[tokio::test]
    async fn test_cannot_fit_beside_default() {
        let mut cfg = config("a", 1000.0);
        cfg.memory_estimates_mb.insert("a".into(), 600.0);
        let manager = ModelLifecycleManager::new(RecordingLoader::default(), cfg);
        assert!(manager.ensure_loaded("a").await);
        assert!(!manager.ensure_loaded("b").await);
        assert_eq!(names(&manager).await, vec!["a"]);
        assert_eq!(
            *manager.inner.loader.released.lock().unwrap(),
            vec!["b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_oversized_model_refused_without_eviction() {
        let mut cfg = config("d", 1000.0);
        cfg.memory_estimates_mb.insert("huge".into(), 5000.0);
        let manager = ModelLifecycleManager::new(RecordingLoader::default(), cfg);
        assert!(manager.ensure_loaded("a").await);
        assert!(!manager.ensure_loaded("huge").await);
        assert_eq!(names(&manager).await, vec!["a"]);
        // never attempted
        assert_eq!(manager.inner.loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_cache_untouched() {
        let manager =
            ModelLifecycleManager::new(RecordingLoader::failing(&["broken"]), config("d", 1000.0));
        assert!(manager.ensure_loaded("a").await);
        assert!(manager.ensure_loaded("b").await);
        let before = manager.resident_models().await;

        assert!(!manager.ensure_loaded("broken").await);
        assert_eq!(manager.resident_models().await, before);
        assert!(manager.inner.loader.released.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unload_and_shutdown() {
        let manager = ModelLifecycleManager::new(RecordingLoader::default(), config("a", 2000.0));
        assert!(manager.ensure_loaded("a").await);
        assert!(manager.ensure_loaded("b").await);

        // explicit unload works on the default too
        assert!(manager.unload("a").await);
        assert!(!manager.unload("a").await);
        assert_eq!(names(&manager).await, vec!["b"]);

        manager.shutdown().await;
        assert!(manager.resident_models().await.is_empty());
        assert_eq!(manager.memory_usage_mb().await, 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_loads_of_same_model_load_once() {
        let manager = ModelLifecycleManager::new(RecordingLoader::default(), config("d", 2000.0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move { m.ensure_loaded("shared").await }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }
        assert_eq!(manager.inner.loader.loads.load(Ordering::SeqCst), 1);
    }
}
