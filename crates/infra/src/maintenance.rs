//! Read-model maintenance: coordinated rebuild and cache invalidation.
//!
//! Projections and caches are derived state; the event log is the source of
//! truth, so both can be cleared and repopulated at any time. What needs
//! protecting is the *process*: two rebuilds mutating the same read stores
//! concurrently would interleave their clears and re-applies. The
//! [`MaintenanceLock`] makes that mutual exclusion explicit, with the two
//! contention policies the callers need:
//!
//! - scheduled refresh **blocks** until the lock frees;
//! - teardown refresh **tries** the lock and no-ops with an info log when
//!   another refresh is already running.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument};

use aurum_events::{EventEnvelope, EventHandler, HandlerError};

use crate::event_store::{EventStore, EventStoreError};
use crate::projections::{ProjectionError, Rebuildable};

/// Single-holder, non-reentrant lock around read-model maintenance.
#[derive(Debug, Default)]
pub struct MaintenanceLock {
    inner: Mutex<()>,
}

/// Proof of holding the maintenance lock; released on drop.
#[derive(Debug)]
pub struct MaintenanceGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl MaintenanceLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is free. The scheduled-refresh path.
    pub fn refresh_guard(&self) -> MaintenanceGuard<'_> {
        // The lock guards a process, not data; a panicked refresh must not
        // wedge every future one.
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        MaintenanceGuard { _guard: guard }
    }

    /// Try the lock without waiting. The teardown path: `None` means another
    /// refresh holds it and the caller should skip.
    pub fn try_teardown_guard(&self) -> Option<MaintenanceGuard<'_>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(MaintenanceGuard { _guard: guard }),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => Some(MaintenanceGuard {
                _guard: poisoned.into_inner(),
            }),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }
}

/// Why a refresh failed.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("rebuild of {projection} failed: {source}")]
    Rebuild {
        projection: &'static str,
        #[source]
        source: ProjectionError,
    },
}

/// What one completed refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub events_loaded: u64,
    pub projections_rebuilt: usize,
}

/// Handle to one named cache.
pub trait CacheHandle: Send + Sync {
    /// Drop every entry.
    fn clear(&self);

    /// Drop one entry; unknown keys are a no-op.
    fn evict(&self, key: &str);
}

/// Cache backend seam.
///
/// Caches are named per domain (the aggregate type doubles as the name), and
/// handles are cheap to obtain; a cache exists from first reference.
pub trait CacheManager: Send + Sync {
    fn cache(&self, name: &str) -> Arc<dyn CacheHandle>;

    /// Clear every cache this manager knows about.
    fn clear_all(&self);
}

impl<C> CacheManager for Arc<C>
where
    C: CacheManager + ?Sized,
{
    fn cache(&self, name: &str) -> Arc<dyn CacheHandle> {
        (**self).cache(name)
    }

    fn clear_all(&self) {
        (**self).clear_all()
    }
}

/// String-keyed cache for tests and single-process hosts.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl InMemoryCache {
    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.lock().unwrap().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl CacheHandle for InMemoryCache {
    fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn evict(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

/// Cache manager over [`InMemoryCache`]s, created on first reference.
#[derive(Debug, Default)]
pub struct InMemoryCacheManager {
    caches: Mutex<BTreeMap<String, Arc<InMemoryCache>>>,
}

impl InMemoryCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle, for tests that need to seed or inspect entries.
    pub fn cache_handle(&self, name: &str) -> Arc<InMemoryCache> {
        self.caches
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl CacheManager for InMemoryCacheManager {
    fn cache(&self, name: &str) -> Arc<dyn CacheHandle> {
        self.cache_handle(name)
    }

    fn clear_all(&self) {
        for cache in self.caches.lock().unwrap().values() {
            cache.clear();
        }
    }
}

/// Dispatch handler that evicts the cached entry for a changed aggregate.
///
/// Runs after the projections in the handler chain: by the time a cached
/// read could be refilled, the read model already reflects the event.
pub struct CacheInvalidationHandler {
    caches: Arc<dyn CacheManager>,
}

impl CacheInvalidationHandler {
    pub fn new(caches: Arc<dyn CacheManager>) -> Self {
        Self { caches }
    }
}

impl EventHandler for CacheInvalidationHandler {
    fn name(&self) -> &'static str {
        "cache_invalidation"
    }

    fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        self.caches
            .cache(event.aggregate_type())
            .evict(event.aggregate_id().as_str());
        debug!(
            cache = event.aggregate_type(),
            key = event.aggregate_id().as_str(),
            "cache entry evicted"
        );
        Ok(())
    }
}

/// Coordinated full refresh of all read models and caches.
pub struct ReadModelMaintenance<S> {
    lock: MaintenanceLock,
    store: S,
    projections: Vec<Arc<dyn Rebuildable>>,
    caches: Arc<dyn CacheManager>,
}

impl<S> ReadModelMaintenance<S>
where
    S: EventStore,
{
    pub fn new(
        store: S,
        projections: Vec<Arc<dyn Rebuildable>>,
        caches: Arc<dyn CacheManager>,
    ) -> Self {
        Self {
            lock: MaintenanceLock::new(),
            store,
            projections,
            caches,
        }
    }

    pub fn lock(&self) -> &MaintenanceLock {
        &self.lock
    }

    /// Full rebuild: load the log, rebuild every projection, clear caches.
    ///
    /// Blocks until any running refresh finishes.
    #[instrument(skip(self), err)]
    pub fn refresh(&self) -> Result<RefreshSummary, MaintenanceError> {
        let _guard = self.lock.refresh_guard();
        self.rebuild_all()
    }

    /// Teardown variant: skips (with an info log) when a refresh is running.
    #[instrument(skip(self), err)]
    pub fn refresh_on_teardown(&self) -> Result<Option<RefreshSummary>, MaintenanceError> {
        match self.lock.try_teardown_guard() {
            Some(_guard) => self.rebuild_all().map(Some),
            None => {
                info!("maintenance lock held, skipping teardown refresh");
                Ok(None)
            }
        }
    }

    fn rebuild_all(&self) -> Result<RefreshSummary, MaintenanceError> {
        let records = self.store.find_in_range(
            None,
            DateTime::<Utc>::MIN_UTC,
            DateTime::<Utc>::MAX_UTC,
        )?;
        let envelopes: Vec<EventEnvelope> = records.iter().map(|r| r.to_envelope()).collect();

        for projection in &self.projections {
            projection
                .rebuild_from_scratch(envelopes.clone())
                .map_err(|source| MaintenanceError::Rebuild {
                    projection: projection.projection_name(),
                    source,
                })?;
            debug!(
                projection = projection.projection_name(),
                events = envelopes.len(),
                "projection rebuilt"
            );
        }

        self.caches.clear_all();

        Ok(RefreshSummary {
            events_loaded: envelopes.len() as u64,
            projections_rebuilt: self.projections.len(),
        })
    }
}
