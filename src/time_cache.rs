//! Process-wide reference time for signature and key validity checks.
//!
//! The host pushes wall-clock time with [`TimeCache::update_time`]; nothing
//! advances it implicitly, so verification results are reproducible for a
//! fixed cached value.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

static GLOBAL: Lazy<Arc<TimeCache>> = Lazy::new(|| Arc::new(TimeCache::new()));

/// Cached unix timestamp, shared between engine instances.
#[derive(Debug, Default)]
pub struct TimeCache {
    latest: AtomicI64,
}

impl TimeCache {
    /// A cache initialised to zero (unset).
    pub fn new() -> Self {
        Self {
            latest: AtomicI64::new(0),
        }
    }

    /// A cache starting at `time`.
    pub fn starting_at(time: i64) -> Self {
        Self {
            latest: AtomicI64::new(time),
        }
    }

    /// The process-wide cache.
    pub fn global() -> Arc<TimeCache> {
        Arc::clone(&GLOBAL)
    }

    /// Cached unix time in seconds, 0 when never set.
    pub fn get_time(&self) -> i64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Replace the cached time. Updates are stored as given; the cache never
    /// moves on its own.
    pub fn update_time(&self, new_time: i64) {
        log::debug!("Updating cached time to {}", new_time);
        self.latest.store(new_time, Ordering::SeqCst);
    }

    /// Cached time, or the system clock while the cache is still unset.
    pub fn now_or_system(&self) -> i64 {
        match self.get_time() {
            0 => Utc::now().timestamp(),
            cached => cached,
        }
    }

    /// Cached time as a `DateTime`, `None` while unset.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self.get_time() {
            0 => None,
            secs => DateTime::from_timestamp(secs, 0),
        }
    }
}
