/// Latest-result cache with a time-to-live.
///
/// Holds the most recent `CachedResult` per city. A result younger than
/// the TTL is served as-is; an older one triggers a refresh. Entries are
/// never evicted: when a refresh fails, the previous result is served
/// with its true age and the failure reason.
///
/// # Single flight
/// Each city has one refresh slot. Callers that arrive while a refresh is
/// in flight wait for it and then share its outcome (the new result, or
/// the previous one annotated with the failure) instead of issuing a
/// second fetch. Different cities never block each other.
///
/// # Clock injection
/// The `_at` variants take `now` explicitly; the plain variants use
/// `Utc::now()`.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::logging::{self, DataSource};
use crate::model::{CachedResult, EngineError};
use crate::store::SnapshotStore;

/// Default time-to-live for a cached evaluation.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// A cached result as seen by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedView {
    pub city: String,
    pub result: CachedResult,
    pub age: Duration,
    /// `age < ttl`.
    pub fresh: bool,
    /// Set when the latest refresh attempt failed and this is an older result.
    pub stale_reason: Option<String>,
}

impl CachedView {
    pub fn age_seconds(&self) -> i64 {
        self.age.num_seconds()
    }

    /// `true` when zero stations reported for the city.
    pub fn no_data(&self) -> bool {
        self.result.is_empty()
    }
}

#[derive(Default)]
struct RefreshSlot {
    lock: Mutex<()>,
    /// Incremented after every completed refresh attempt.
    attempts: AtomicU64,
    last_error: Mutex<Option<EngineError>>,
}

pub struct ResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedResult>>,
    slots: Mutex<HashMap<String, Arc<RefreshSlot>>>,
    store: Option<Box<dyn SnapshotStore>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        ResultCache {
            ttl,
            entries: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// A cache that persists every successful refresh to `store` and starts
    /// warm with whatever the store already holds.
    pub fn with_store(ttl: Duration, store: Box<dyn SnapshotStore>) -> Self {
        let mut entries = HashMap::new();
        match store.load_all() {
            Ok(saved) => {
                logging::info(
                    DataSource::Store,
                    None,
                    &format!("warmed cache with {} saved result(s)", saved.len()),
                );
                entries.extend(saved);
            }
            Err(e) => logging::warn(DataSource::Store, None, &format!("warm-up failed: {}", e)),
        }
        ResultCache {
            ttl,
            entries: RwLock::new(entries),
            slots: Mutex::new(HashMap::new()),
            store: Some(store),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The stored result for `city`, whatever its age.
    pub fn peek(&self, city: &str) -> Option<CachedResult> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(city)
            .cloned()
    }

    /// The stored result for `city` with its age relative to `now`.
    pub fn view_at(&self, city: &str, now: DateTime<Utc>) -> Option<CachedView> {
        self.peek(city).map(|result| self.view(city, result, now, None))
    }

    fn view(
        &self,
        city: &str,
        result: CachedResult,
        now: DateTime<Utc>,
        stale_reason: Option<String>,
    ) -> CachedView {
        let age = now - result.computed_at;
        CachedView {
            city: city.to_string(),
            fresh: age < self.ttl,
            age,
            result,
            stale_reason,
        }
    }

    fn fresh_view(&self, city: &str, now: DateTime<Utc>) -> Option<CachedView> {
        self.view_at(city, now).filter(|v| v.fresh)
    }

    fn slot(&self, city: &str) -> Arc<RefreshSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(city.to_string()).or_default())
    }

    /// Returns the cached result if younger than the TTL, otherwise runs
    /// `refresh` (at most once across concurrent callers) and stores it.
    pub fn get_or_refresh_at<F>(
        &self,
        city: &str,
        now: DateTime<Utc>,
        refresh: F,
    ) -> Result<CachedView, EngineError>
    where
        F: FnOnce() -> Result<CachedResult, EngineError>,
    {
        // `seen` is taken before the freshness check so a refresh that
        // completes in between is shared rather than repeated.
        let slot = self.slot(city);
        let seen = slot.attempts.load(Ordering::SeqCst);
        if let Some(view) = self.fresh_view(city, now) {
            return Ok(view);
        }

        let _guard = slot.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.attempts.load(Ordering::SeqCst) != seen {
            return self.shared_outcome(city, now, &slot);
        }
        // `put` can store a result without going through a slot.
        if let Some(view) = self.fresh_view(city, now) {
            return Ok(view);
        }
        self.run_refresh(city, now, &slot, refresh)
    }

    pub fn get_or_refresh<F>(&self, city: &str, refresh: F) -> Result<CachedView, EngineError>
    where
        F: FnOnce() -> Result<CachedResult, EngineError>,
    {
        self.get_or_refresh_at(city, Utc::now(), refresh)
    }

    /// Runs `refresh` regardless of the TTL. A caller that waited behind
    /// another refresh of the same city shares that refresh's outcome.
    pub fn refresh_at<F>(
        &self,
        city: &str,
        now: DateTime<Utc>,
        refresh: F,
    ) -> Result<CachedView, EngineError>
    where
        F: FnOnce() -> Result<CachedResult, EngineError>,
    {
        let slot = self.slot(city);
        let seen = slot.attempts.load(Ordering::SeqCst);
        let _guard = slot.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if slot.attempts.load(Ordering::SeqCst) != seen {
            return self.shared_outcome(city, now, &slot);
        }
        self.run_refresh(city, now, &slot, refresh)
    }

    pub fn refresh<F>(&self, city: &str, refresh: F) -> Result<CachedView, EngineError>
    where
        F: FnOnce() -> Result<CachedResult, EngineError>,
    {
        self.refresh_at(city, Utc::now(), refresh)
    }

    /// Must be called with the slot lock held.
    fn run_refresh<F>(
        &self,
        city: &str,
        now: DateTime<Utc>,
        slot: &RefreshSlot,
        refresh: F,
    ) -> Result<CachedView, EngineError>
    where
        F: FnOnce() -> Result<CachedResult, EngineError>,
    {
        let outcome = refresh();
        let view = match outcome {
            Ok(result) => {
                self.put(city, result.clone());
                self.set_last_error(slot, None);
                Ok(self.view(city, result, now, None))
            }
            Err(err) => {
                self.set_last_error(slot, Some(err.clone()));
                match self.peek(city) {
                    Some(previous) => {
                        logging::warn(
                            DataSource::Cache,
                            Some(city),
                            &format!("refresh failed, serving previous result: {}", err),
                        );
                        Ok(self.view(city, previous, now, Some(err.to_string())))
                    }
                    None => Err(err),
                }
            }
        };
        slot.attempts.fetch_add(1, Ordering::SeqCst);
        view
    }

    /// The outcome of a refresh another caller just completed.
    fn shared_outcome(
        &self,
        city: &str,
        now: DateTime<Utc>,
        slot: &RefreshSlot,
    ) -> Result<CachedView, EngineError> {
        let last_error = slot
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match (self.peek(city), last_error) {
            (Some(result), err) => Ok(self.view(city, result, now, err.map(|e| e.to_string()))),
            (None, Some(err)) => Err(err),
            (None, None) => Err(EngineError::NoDataAvailable(city.to_string())),
        }
    }

    fn set_last_error(&self, slot: &RefreshSlot, err: Option<EngineError>) {
        *slot.last_error.lock().unwrap_or_else(PoisonError::into_inner) = err;
    }

    /// Stores `result` for `city`, replacing any previous entry, and
    /// mirrors it to the snapshot store if one is attached.
    pub fn put(&self, city: &str, result: CachedResult) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(city, &result) {
                logging::warn(DataSource::Store, Some(city), &format!("save failed: {}", e));
            }
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(city.to_string(), result);
    }

    /// Number of cities that have a refresh slot.
    pub fn tracked_slots(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn cities(&self) -> Vec<String> {
        let mut cities: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        cities.sort();
        cities
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        ResultCache::new(Duration::minutes(DEFAULT_TTL_MINUTES))
    }
}
