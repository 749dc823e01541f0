//! Explicit result cache for memoizing and expiring cells.
//!
//! [`CellCache`] replaces a process-wide memo table: callers create one,
//! share it (it is `Send + Sync`) and drop it when the cached results should
//! go away. Entries are keyed by cell identity only, so a cell whose function
//! changes but whose identity does not will keep returning the old result.
//! Give a cell a fresh identity when its computation changes.
//!
//! Each identity owns a slot guarded by its own mutex. The slot lock is held
//! across "check, compute, store", so concurrent evaluations of one identity
//! compute at most once while different identities proceed in parallel.
//! A slot leaves the map only when no other caller holds it, so removal never
//! lets a second caller start a parallel computation for the same identity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use dashmap::DashMap;

use crate::calendar::{Clock, Period, SystemClock};
use crate::error::CoreError;
use crate::id::NodeKey;
use crate::value::Value;

/// A cached result and the time it was computed.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub computed_at: NaiveDateTime,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Identity-keyed result cache with single-flight computation.
#[derive(Debug)]
pub struct CellCache {
    slots: DashMap<NodeKey, Slot>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for CellCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CellCache {
    /// Creates an empty cache on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        CellCache {
            slots: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the cached value for `key`, computing and storing it first if
    /// there is none or if it has gone stale under `expiry`.
    ///
    /// A failed computation leaves a stored entry untouched and drops a slot
    /// that never held one.
    pub fn get_or_compute<F>(
        &self,
        key: &NodeKey,
        expiry: Option<Period>,
        compute: F,
    ) -> Result<Value, CoreError>
    where
        F: FnOnce() -> Result<Value, CoreError>,
    {
        // Clone the slot out so the shard lock is released before blocking.
        let slot: Slot = Arc::clone(&self.slots.entry(key.clone()).or_default());
        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());

        let now = self.clock.now();
        if let Some(entry) = guard.as_ref() {
            match expiry {
                Some(period) if period.is_stale(entry.computed_at, now) => {
                    tracing::debug!(
                        %key,
                        %period,
                        computed_at = %entry.computed_at,
                        "cached value expired, recomputing"
                    );
                }
                _ => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(%key, "cache hit");
                    return Ok(entry.value.clone());
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%key, "cache miss");
        let value = match compute() {
            Ok(value) => value,
            Err(err) => {
                if guard.is_none() {
                    self.release(key, &slot);
                }
                return Err(err);
            }
        };
        *guard = Some(CacheEntry {
            value: value.clone(),
            computed_at: now,
        });
        Ok(value)
    }

    /// Returns a copy of the entry for `key`, if one is stored.
    pub fn peek(&self, key: &NodeKey) -> Option<CacheEntry> {
        let slot = self.slots.get(key).map(|s| Arc::clone(&s))?;
        let guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Drops the entry for `key`. Returns whether one was stored.
    ///
    /// Waits for an in-flight computation of `key` and discards its result.
    pub fn invalidate(&self, key: &NodeKey) -> bool {
        let slot = match self.slots.get(key) {
            Some(slot) => Arc::clone(&slot),
            None => return false,
        };
        let stored = slot.lock().unwrap_or_else(|e| e.into_inner()).take().is_some();
        self.release(key, &slot);
        stored
    }

    /// Invalidates every identity.
    pub fn clear(&self) {
        let keys: Vec<NodeKey> = self.slots.iter().map(|s| s.key().clone()).collect();
        for key in &keys {
            self.invalidate(key);
        }
    }

    /// Removes `slot` from the map if it is still the slot for `key` and the
    /// caller holds the only other reference. The shard lock taken by
    /// `remove_if` keeps new callers from cloning it meanwhile.
    fn release(&self, key: &NodeKey, slot: &Slot) {
        self.slots
            .remove_if(key, |_, s| Arc::ptr_eq(s, slot) && Arc::strong_count(s) == 2);
    }

    /// Number of identities with a stored value. Waits on slots that are
    /// being computed.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.iter().map(|s| Arc::clone(s.value())).collect();
        slots
            .iter()
            .filter(|s| s.lock().unwrap_or_else(|e| e.into_inner()).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
