//! Shared health state for the /health endpoint.
//! Updated by the import handlers, read by the API.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    /// Unix seconds at startup.
    pub started_at: AtomicI64,
    /// Multi-tab imports currently running.
    pub imports_in_flight: AtomicU64,
    /// Unix seconds of the last finished import (0 = none).
    pub last_import_at: AtomicI64,
    /// Failed previews, imports and proxy fetches since startup.
    pub fetch_failures: AtomicU64,
}

impl HealthState {
    pub fn new(started_at: i64) -> Self {
        let state = Self::default();
        state.started_at.store(started_at, Ordering::Relaxed);
        state
    }

    pub fn import_started(&self) {
        self.imports_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn import_finished(&self, at: i64) {
        self.imports_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.last_import_at.store(at, Ordering::Relaxed);
    }

    pub fn inc_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn started_at(&self) -> i64 {
        self.started_at.load(Ordering::Relaxed)
    }

    pub fn imports_in_flight(&self) -> u64 {
        self.imports_in_flight.load(Ordering::Relaxed)
    }

    pub fn last_import_at(&self) -> i64 {
        self.last_import_at.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_counters_balance() {
        let h = HealthState::new(100);
        h.import_started();
        h.import_started();
        h.import_finished(150);
        assert_eq!(h.imports_in_flight(), 1);
        assert_eq!(h.last_import_at(), 150);
        assert_eq!(h.started_at(), 100);
    }
}
