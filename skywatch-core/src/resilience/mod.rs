//! Resilience patterns guarding every provider call
//!
//! Circuit breaking, rate limiting and retry with backoff. State is kept per
//! provider so that one misbehaving source never slows down the others.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{
    BreakerPermit, BreakerSettings, CircuitBreaker, CircuitState, ProviderHealth,
};
pub use rate_limit::{Admission, BudgetRemaining, RateLimitSettings, RateLimiter, RateWindow, WindowKind};
pub use retry::{RetryExecutor, RetryPolicy, RetryResult};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Read-mostly table of per-key state cells.
///
/// The outer map is only write-locked the first time a key is seen; after
/// that each key is mutated under its own mutex.
#[derive(Debug)]
pub(crate) struct ProviderTable<T> {
    cells: RwLock<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> ProviderTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Get the cell for `key`, creating it with `init` if missing
    pub(crate) fn cell(&self, key: &str, init: impl FnOnce() -> T) -> Arc<Mutex<T>> {
        if let Some(cell) = self
            .cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(cell);
        }

        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            cells
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(init()))),
        )
    }

    /// Get the cell for `key` without creating it
    pub(crate) fn get(&self, key: &str) -> Option<Arc<Mutex<T>>> {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Snapshot of all keys and their cells
    pub(crate) fn entries(&self) -> Vec<(String, Arc<Mutex<T>>)> {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, cell)| (key.clone(), Arc::clone(cell)))
            .collect()
    }
}

/// Lock a state cell, recovering the data if a holder panicked
pub(crate) fn lock<T>(cell: &Mutex<T>) -> MutexGuard<'_, T> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}
