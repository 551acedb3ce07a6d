//! In-memory latency histogram for outbound HTML fetches.
//! Every direct and proxied fetch records its wall time, retries included.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Shared fetch latency. Fetchers record, API reads.
/// Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
    pub max_us: Option<u64>,
}

impl LatencyStats {
    /// Tracks 1us to 10min, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 600_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 600_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(h) = self.inner.lock() else {
            return LatencySnapshot { samples: 0, p50_us: None, p95_us: None, p99_us: None, max_us: None };
        };
        if h.len() == 0 {
            return LatencySnapshot { samples: 0, p50_us: None, p95_us: None, p99_us: None, max_us: None };
        }
        LatencySnapshot {
            samples: h.len(),
            p50_us: Some(h.value_at_quantile(0.5)),
            p95_us: Some(h.value_at_quantile(0.95)),
            p99_us: Some(h.value_at_quantile(0.99)),
            max_us: Some(h.max()),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let s = LatencyStats::new().snapshot();
        assert_eq!(s.samples, 0);
        assert!(s.p50_us.is_none());
    }

    #[test]
    fn percentiles_follow_samples() {
        let stats = LatencyStats::new();
        for ms in 1..=100 {
            stats.record(Duration::from_millis(ms));
        }
        let s = stats.snapshot();
        assert_eq!(s.samples, 100);
        let p50 = s.p50_us.unwrap();
        assert!((49_000..=51_000).contains(&p50), "p50 = {p50}");
        assert!(s.p99_us.unwrap() >= s.p95_us.unwrap());
        assert!(s.max_us.unwrap() >= 99_900);
    }
}
