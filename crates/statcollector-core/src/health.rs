//! Uniform per-stage health counters (`spec.md §4.7`).
//!
//! Every Parser, Filter, Source and Storage carries one of these. The
//! external HTTP status page (out of scope here) would consume it by
//! iterating the Dispatcher's registries and reading `snapshot()`.

use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounters {
    total: u64,
    ok: u64,
    err: u64,
    cumulative_latency: Duration,
    ok_latency: Duration,
    err_latency: Duration,
    /// Storage-only: running count of body keys successfully stored, used
    /// to derive `keys_per_sec`.
    keys_stored: u64,
}

impl HealthCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ok(&mut self, latency: Duration) {
        self.total += 1;
        self.ok += 1;
        self.cumulative_latency += latency;
        self.ok_latency += latency;
    }

    pub fn record_ok_with_keys(&mut self, latency: Duration, keys: u64) {
        self.record_ok(latency);
        self.keys_stored += keys;
    }

    pub fn record_err(&mut self, latency: Duration) {
        self.total += 1;
        self.err += 1;
        self.cumulative_latency += latency;
        self.err_latency += latency;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self, since: Duration) -> HealthSnapshot {
        let success_ratio = if self.total == 0 {
            1.0
        } else {
            self.ok as f64 / self.total as f64
        };
        let since_secs = since.as_secs_f64().max(f64::EPSILON);
        HealthSnapshot {
            total: self.total,
            ok: self.ok,
            err: self.err,
            cumulative_latency: self.cumulative_latency,
            ok_latency: self.ok_latency,
            err_latency: self.err_latency,
            success_ratio,
            ok_per_sec: self.ok as f64 / since_secs,
            keys_per_sec: self.keys_stored as f64 / since_secs,
        }
    }
}

/// A point-in-time read of [`HealthCounters`], with the derived rates spec.md
/// asks the status page to expose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSnapshot {
    pub total: u64,
    pub ok: u64,
    pub err: u64,
    pub cumulative_latency: Duration,
    pub ok_latency: Duration,
    pub err_latency: Duration,
    pub success_ratio: f64,
    pub ok_per_sec: f64,
    pub keys_per_sec: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_ratio_with_no_calls_is_one() {
        let health = HealthCounters::new();
        assert_eq!(health.snapshot(Duration::from_secs(1)).success_ratio, 1.0);
    }

    #[test]
    fn success_ratio_tracks_ok_vs_total() {
        let mut health = HealthCounters::new();
        health.record_ok(Duration::from_millis(10));
        health.record_ok(Duration::from_millis(10));
        health.record_err(Duration::from_millis(10));
        let snap = health.snapshot(Duration::from_secs(1));
        assert_eq!(snap.total, 3);
        assert!((snap.success_ratio - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_everything() {
        let mut health = HealthCounters::new();
        health.record_ok(Duration::from_millis(10));
        health.reset();
        assert_eq!(health.snapshot(Duration::from_secs(1)).total, 0);
    }

    #[test]
    fn keys_per_sec_only_counts_storage_recorded_keys() {
        let mut health = HealthCounters::new();
        health.record_ok_with_keys(Duration::from_millis(1), 10);
        let snap = health.snapshot(Duration::from_secs(2));
        assert_eq!(snap.keys_per_sec, 5.0);
    }
}
