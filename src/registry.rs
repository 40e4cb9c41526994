//! # Model Registry
//!
//! Owns the lazily-loaded model handles for one capability, keyed by a
//! configuration key (a Whisper size, a translation repo id, a voice profile).
//!
//! ## Key Features:
//! - **Single load per key**: concurrent first requests wait on the same
//!   in-flight load instead of starting their own
//! - **No cached failures**: a failed load leaves the slot empty so the next
//!   caller retries
//! - **Force reload**: replaces the stored handle (used by startup preload)
//! - **Status tracking**: load state and counters for the model endpoints
//!
//! Loads are blocking and can take minutes, so they always run on the tokio
//! blocking pool.

use crate::error::{Capability, PipelineError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OnceCell};

/// Current status of a model in the registry.
///
/// ## State Transitions:
/// NotLoaded → Loading → Loaded
/// Loading → Failed → Loading (retry on next request)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    /// Known key, never loaded (or invalidated)
    NotLoaded,

    /// A load is in flight
    Loading,

    /// Handle ready for inference
    Loaded {
        /// When the model was loaded (unix seconds)
        loaded_at: u64,
        /// How long the load took
        load_seconds: f64,
    },

    /// The last load attempt failed and nothing usable is cached
    Failed {
        message: String,
        failed_at: u64,
    },
}

impl ModelStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelStatus::Loaded { .. })
    }

    pub fn description(&self) -> String {
        match self {
            ModelStatus::NotLoaded => "Not loaded".to_string(),
            ModelStatus::Loading => "Loading into memory".to_string(),
            ModelStatus::Loaded { .. } => "Ready for inference".to_string(),
            ModelStatus::Failed { message, .. } => format!("Error: {}", message),
        }
    }
}

/// Blocking constructor for a handle. Receives the key being loaded.
pub type Loader<K, H> = Arc<dyn Fn(&K) -> anyhow::Result<Arc<H>> + Send + Sync>;

struct RegistryEntry<H: ?Sized> {
    cell: Arc<OnceCell<Arc<H>>>,
    status: ModelStatus,
    load_attempts: u32,
    last_error: Option<String>,
}

impl<H: ?Sized> RegistryEntry<H> {
    fn new() -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            status: ModelStatus::NotLoaded,
            load_attempts: 0,
            last_error: None,
        }
    }
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub capability: Capability,
    pub key: String,
    pub status: ModelStatus,
    pub description: String,
    pub load_attempts: u32,
    pub last_error: Option<String>,
}

type Slot<H> = Arc<OnceCell<Arc<H>>>;

/// State shared with detached load tasks.
struct RegistryInner<K, H: ?Sized> {
    capability: Capability,
    loader: Loader<K, H>,
    entries: Mutex<HashMap<K, RegistryEntry<H>>>,
}

/// Registry of handles for one capability.
///
/// `H` is usually a trait object (`dyn Transcriber`), so handles are shared
/// as `Arc<H>` between every pipeline invocation that uses them.
pub struct ModelRegistry<K, H: ?Sized> {
    inner: Arc<RegistryInner<K, H>>,
    /// Serializes force reloads so two preloads never build two handles
    reload_lock: Mutex<()>,
}

impl<K, H> ModelRegistry<K, H>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    H: ?Sized + Send + Sync + 'static,
{
    pub fn new(capability: Capability, loader: Loader<K, H>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                capability,
                loader,
                entries: Mutex::new(HashMap::new()),
            }),
            reload_lock: Mutex::new(()),
        }
    }

    /// Build a registry from a plain closure.
    pub fn with_loader<F>(capability: Capability, loader: F) -> Self
    where
        F: Fn(&K) -> anyhow::Result<Arc<H>> + Send + Sync + 'static,
    {
        Self::new(capability, Arc::new(loader))
    }

    pub fn capability(&self) -> Capability {
        self.inner.capability
    }

    /// Get the handle for `key`, loading it on first use.
    ///
    /// ## Concurrency:
    /// The map lock is only held long enough to find the slot. The load runs
    /// in a detached task that fills the slot's `OnceCell`, so callers for the
    /// same key share one load and a caller that goes away does not cancel it.
    pub async fn get(&self, key: &K) -> Result<Arc<H>, PipelineError> {
        let slot = self.inner.slot(key).await;

        if let Some(handle) = slot.get() {
            tracing::trace!(capability = %self.inner.capability, key = %key, "Using cached model");
            return Ok(handle.clone());
        }

        self.fill(slot, key).await
    }

    /// Load `key` unconditionally and replace whatever handle is stored.
    ///
    /// A key with no stored handle joins the in-flight load (or starts one)
    /// instead of loading a second copy. If the load fails the previous
    /// handle (if any) stays in place.
    pub async fn force_load(&self, key: &K) -> Result<Arc<H>, PipelineError> {
        let _reload = self.reload_lock.lock().await;
        let capability = self.inner.capability;
        tracing::info!(capability = %capability, key = %key, "Force loading model");

        let current = self.inner.slot(key).await;
        if !current.initialized() {
            return self.fill(current, key).await;
        }

        self.inner.mark_loading(key, &current).await;
        let handle = match self.inner.run_loader(key).await {
            Ok((handle, load_seconds)) => {
                let mut entries = self.inner.entries.lock().await;
                match entries.get_mut(key) {
                    Some(entry) if Arc::ptr_eq(&entry.cell, &current) => {
                        entry.cell = Arc::new(OnceCell::new_with(Some(handle.clone())));
                        entry.status = ModelStatus::Loaded {
                            loaded_at: current_timestamp(),
                            load_seconds,
                        };
                        entry.last_error = None;
                    }
                    _ => tracing::debug!(
                        capability = %capability,
                        key = %key,
                        "Slot changed during force load; not storing the new handle"
                    ),
                }
                handle
            }
            Err(err) => {
                self.inner.record_failure(key, &current, &failure_message(&err)).await;
                return Err(err);
            }
        };
        Ok(handle)
    }

    /// Drop the cached handle for `key`. Returns whether a handle was cached.
    ///
    /// In-flight users keep their `Arc` until they finish; the next `get`
    /// performs a fresh load.
    pub async fn invalidate(&self, key: &K) -> bool {
        let mut entries = self.inner.entries.lock().await;
        match entries.remove(key) {
            Some(entry) => {
                let was_loaded = entry.cell.initialized();
                tracing::info!(
                    capability = %self.inner.capability,
                    key = %key,
                    was_loaded,
                    "Invalidated model handle"
                );
                was_loaded
            }
            None => false,
        }
    }

    /// Whether a usable handle is cached for `key`.
    pub async fn is_loaded(&self, key: &K) -> bool {
        let entries = self.inner.entries.lock().await;
        entries
            .get(key)
            .map(|entry| entry.cell.initialized())
            .unwrap_or(false)
    }

    /// Status of every key this registry has seen.
    pub async fn snapshot(&self) -> Vec<EntrySnapshot> {
        let entries = self.inner.entries.lock().await;
        let mut snapshot: Vec<EntrySnapshot> = entries
            .iter()
            .map(|(key, entry)| EntrySnapshot {
                capability: self.inner.capability,
                key: key.to_string(),
                description: entry.status.description(),
                status: entry.status.clone(),
                load_attempts: entry.load_attempts,
                last_error: entry.last_error.clone(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }

    /// Initialize `slot` from a detached task and wait for the outcome.
    async fn fill(&self, slot: Slot<H>, key: &K) -> Result<Arc<H>, PipelineError> {
        let inner = self.inner.clone();
        let key = key.clone();
        let task = tokio::spawn(async move {
            slot.get_or_try_init(|| inner.load_into(&key, &slot))
                .await
                .map(Arc::clone)
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(PipelineError::worker(join_err)),
        }
    }
}

impl<K, H> RegistryInner<K, H>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    H: ?Sized + Send + Sync + 'static,
{
    /// Current slot for `key`, creating the entry if needed.
    async fn slot(&self, key: &K) -> Slot<H> {
        let mut entries = self.entries.lock().await;
        entries
            .entry(key.clone())
            .or_insert_with(RegistryEntry::new)
            .cell
            .clone()
    }

    /// Run the loader for a first load of `slot`, recording status on its entry.
    async fn load_into(&self, key: &K, slot: &Slot<H>) -> Result<Arc<H>, PipelineError> {
        self.mark_loading(key, slot).await;

        match self.run_loader(key).await {
            Ok((handle, load_seconds)) => {
                self.update(key, slot, |entry| {
                    entry.status = ModelStatus::Loaded {
                        loaded_at: current_timestamp(),
                        load_seconds,
                    };
                    entry.last_error = None;
                })
                .await;
                Ok(handle)
            }
            Err(err) => {
                self.record_failure(key, slot, &failure_message(&err)).await;
                Err(err)
            }
        }
    }

    /// Run the loader on the blocking pool.
    async fn run_loader(&self, key: &K) -> Result<(Arc<H>, f64), PipelineError> {
        tracing::info!(capability = %self.capability, key = %key, "Loading model");
        let start_time = Instant::now();

        let loader = self.loader.clone();
        let owned_key = key.clone();
        let outcome = tokio::task::spawn_blocking(move || loader(&owned_key)).await;
        let load_seconds = start_time.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(handle)) => {
                tracing::info!(
                    capability = %self.capability,
                    key = %key,
                    load_seconds,
                    "Model loaded"
                );
                Ok((handle, load_seconds))
            }
            Ok(Err(err)) => {
                let message = format!("{:#}", err);
                tracing::error!(
                    capability = %self.capability,
                    key = %key,
                    error = %message,
                    "Model load failed"
                );
                Err(PipelineError::CapabilityLoad {
                    capability: self.capability,
                    key: key.to_string(),
                    message,
                })
            }
            Err(join_err) => Err(PipelineError::worker(join_err)),
        }
    }

    async fn mark_loading(&self, key: &K, slot: &Slot<H>) {
        self.update(key, slot, |entry| {
            entry.status = ModelStatus::Loading;
            entry.load_attempts += 1;
        })
        .await;
    }

    async fn record_failure(&self, key: &K, slot: &Slot<H>, message: &str) {
        self.update(key, slot, |entry| {
            // A failed force reload keeps serving the previous handle
            entry.status = if entry.cell.initialized() {
                ModelStatus::Loaded {
                    loaded_at: current_timestamp(),
                    load_seconds: 0.0,
                }
            } else {
                ModelStatus::Failed {
                    message: message.to_string(),
                    failed_at: current_timestamp(),
                }
            };
            entry.last_error = Some(message.to_string());
        })
        .await;
    }

    /// Apply `apply` only while `key` still maps to `slot`. An invalidated
    /// or replaced entry is left alone.
    async fn update<F>(&self, key: &K, slot: &Slot<H>, apply: F)
    where
        F: FnOnce(&mut RegistryEntry<H>),
    {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            if Arc::ptr_eq(&entry.cell, slot) {
                apply(entry);
            }
        }
    }
}

fn failure_message(err: &PipelineError) -> String {
    match err {
        PipelineError::CapabilityLoad { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    trait Model: Send + Sync {
        fn id(&self) -> usize;
    }

    struct Loaded(usize);

    impl Model for Loaded {
        fn id(&self) -> usize {
            self.0
        }
    }

    fn counting_registry(loads: Arc<AtomicUsize>) -> ModelRegistry<String, dyn Model> {
        ModelRegistry::with_loader(Capability::Synthesis, move |_key: &String| {
            // Slow enough that concurrent callers overlap with the load
            std::thread::sleep(Duration::from_millis(50));
            let n = loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Loaded(n)) as Arc<dyn Model>)
        })
    }

    /// Counts loads as they start and holds each one for `millis`.
    fn slow_registry(loads: Arc<AtomicUsize>, millis: u64) -> Arc<ModelRegistry<String, dyn Model>> {
        Arc::new(ModelRegistry::with_loader(Capability::Synthesis, move |_key: &String| {
            let n = loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(millis));
            Ok(Arc::new(Loaded(n)) as Arc<dyn Model>)
        }))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_load_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(loads.clone()));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.get(&"spanish".to_string()).await.map(|m| m.id())
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 0);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(registry.is_loaded(&"spanish".to_string()).await);
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_handles() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(loads.clone());

        let a = registry.get(&"spanish".to_string()).await.unwrap();
        let b = registry.get(&"base".to_string()).await.unwrap();
        let a_again = registry.get(&"spanish".to_string()).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert!(Arc::ptr_eq(&a, &a_again));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let registry: ModelRegistry<String, dyn Model> =
            ModelRegistry::with_loader(Capability::Translation, move |_key: &String| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("weights missing");
                }
                Ok(Arc::new(Loaded(7)) as Arc<dyn Model>)
            });

        let key = "m2m".to_string();
        let err = match registry.get(&key).await {
            Err(err) => err,
            Ok(_) => panic!("first load should fail"),
        };
        assert!(matches!(
            err,
            PipelineError::CapabilityLoad { capability: Capability::Translation, .. }
        ));

        let snapshot = registry.snapshot().await;
        assert!(matches!(snapshot[0].status, ModelStatus::Failed { .. }));

        let handle = registry.get(&key).await.unwrap();
        assert_eq!(handle.id(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let snapshot = registry.snapshot().await;
        assert!(snapshot[0].status.is_loaded());
        assert_eq!(snapshot[0].load_attempts, 2);
        assert!(snapshot[0].last_error.is_none());
    }

    #[tokio::test]
    async fn test_force_load_replaces_handle() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(loads.clone());
        let key = "base".to_string();

        let first = registry.get(&key).await.unwrap();
        let forced = registry.force_load(&key).await.unwrap();
        let after = registry.get(&key).await.unwrap();

        assert_ne!(first.id(), forced.id());
        assert!(Arc::ptr_eq(&forced, &after));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_force_load_keeps_previous_handle() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let registry: ModelRegistry<String, dyn Model> =
            ModelRegistry::with_loader(Capability::Transcription, move |_key: &String| {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    anyhow::bail!("cuda out of memory");
                }
                Ok(Arc::new(Loaded(1)) as Arc<dyn Model>)
            });
        let key = "turbo".to_string();

        let first = registry.get(&key).await.unwrap();
        assert!(registry.force_load(&key).await.is_err());

        let still = registry.get(&key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &still));
        let snapshot = registry.snapshot().await;
        assert!(snapshot[0].status.is_loaded());
        assert_eq!(snapshot[0].last_error.as_deref(), Some("cuda out of memory"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(loads.clone());
        let key = "spanish".to_string();

        assert!(!registry.invalidate(&key).await);
        registry.get(&key).await.unwrap();
        assert!(registry.invalidate(&key).await);
        assert!(!registry.is_loaded(&key).await);

        registry.get(&key).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_force_load_joins_in_flight_get() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = slow_registry(loads.clone(), 200);
        let key = "spanish".to_string();

        let preload = {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move { registry.force_load(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let requested = registry.get(&key).await.unwrap();
        let preloaded = preload.await.unwrap().unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&requested, &preloaded));
        let snapshot = registry.snapshot().await;
        assert!(snapshot[0].status.is_loaded());
        assert_eq!(snapshot[0].load_attempts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_joins_in_flight_force_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = slow_registry(loads.clone(), 200);
        let key = "base".to_string();

        let request = {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move { registry.get(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let preloaded = registry.force_load(&key).await.unwrap();
        let requested = request.await.unwrap().unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&requested, &preloaded));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_invalidate_during_load_leaves_key_unloaded() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = slow_registry(loads.clone(), 200);
        let key = "base".to_string();

        let request = {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move { registry.get(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!registry.invalidate(&key).await);

        // The in-flight caller still gets its handle
        assert!(request.await.unwrap().is_ok());
        assert!(!registry.is_loaded(&key).await);
        assert!(registry.snapshot().await.iter().all(|entry| !entry.status.is_loaded()));

        registry.get(&key).await.unwrap();
        assert!(registry.is_loaded(&key).await);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        let snapshot = registry.snapshot().await;
        assert!(snapshot[0].status.is_loaded());
        assert_eq!(snapshot[0].load_attempts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_abandoned_get_still_completes_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = slow_registry(loads.clone(), 200);
        let key = "spanish".to_string();

        let abandoned = {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move { registry.get(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        abandoned.abort();

        let handle = registry.get(&key).await.unwrap();
        assert_eq!(handle.id(), 0);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(registry.is_loaded(&key).await);
    }
}
