//! Per-command detail counters.
//!
//! Each registered command keeps a latency histogram and a failure count;
//! the registry that owns them is keyed by command name and guarded by a
//! single coarse lock. Registration and snapshotting are off the hot path -
//! only `record_latency` and `got_failure` run per request, and those touch
//! one mutex and one atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hdrhistogram::Histogram;
use serde::Serialize;
use tracing::warn;

use crate::counters::COUNTER_WRAP_LIMIT;

/// Highest latency the histogram tracks, in microseconds (one minute).
const LATENCY_MAX_US: u64 = 60_000_000;

/// Latency and failure detail for one command.
#[derive(Debug)]
pub struct DetailCounter {
    name: String,
    latency_us: Mutex<Histogram<u64>>,
    failures: AtomicU64,
}

/// Serialisable latency percentiles, in microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencyReport {
    /// Number of recorded operations.
    pub ops: u64,
    /// Median latency.
    pub p50_us: u64,
    /// 95th percentile latency.
    pub p95_us: u64,
    /// 99th percentile latency.
    pub p99_us: u64,
    /// Highest recorded latency.
    pub max_us: u64,
}

/// Serialisable snapshot of one command's detail counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailReport {
    /// The command name.
    pub name: String,
    /// Latency percentiles.
    pub latency: LatencyReport,
    /// Failed executions.
    pub failures: u64,
}

impl DetailCounter {
    /// Creates a detail counter for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency_us: Mutex::new(
                Histogram::new_with_bounds(1, LATENCY_MAX_US, 3).expect("histogram creation"),
            ),
            failures: AtomicU64::new(0),
        }
    }

    /// The command name this counter records.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records one execution's latency, in microseconds. Values beyond the
    /// tracked range saturate.
    pub fn record_latency(&self, latency_us: u64) {
        if let Ok(mut histogram) = self.latency_us.lock() {
            histogram.saturating_record(latency_us);
        }
    }

    /// Records one failed execution.
    pub fn got_failure(&self) {
        if self.failures.load(Ordering::Relaxed) > COUNTER_WRAP_LIMIT {
            self.failures.store(0, Ordering::Relaxed);
        }
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Current failure count.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Serialisable snapshot.
    #[must_use]
    pub fn report(&self) -> DetailReport {
        let latency = self.latency_us.lock().map_or(
            LatencyReport {
                ops: 0,
                p50_us: 0,
                p95_us: 0,
                p99_us: 0,
                max_us: 0,
            },
            |histogram| LatencyReport {
                ops: histogram.len(),
                p50_us: histogram.value_at_quantile(0.50),
                p95_us: histogram.value_at_quantile(0.95),
                p99_us: histogram.value_at_quantile(0.99),
                max_us: histogram.max(),
            },
        );
        DetailReport {
            name: self.name.clone(),
            latency,
            failures: self.failures(),
        }
    }
}

/// Registry of detail counters, keyed by command name.
#[derive(Debug, Default)]
pub struct DetailRegistry {
    commands: Mutex<HashMap<String, Arc<DetailCounter>>>,
}

impl DetailRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a counter under its name. A duplicate name warns and
    /// overwrites the previous counter.
    pub fn register(&self, counter: Arc<DetailCounter>) {
        if counter.name().is_empty() {
            return;
        }
        if let Ok(mut commands) = self.commands.lock() {
            if commands.contains_key(counter.name()) {
                warn!(name = counter.name(), "detail counter already registered");
            }
            commands.insert(counter.name().to_string(), counter);
        }
    }

    /// Removes the counter registered under `name`. Idempotent.
    pub fn unregister(&self, name: &str) {
        if name.is_empty() {
            return;
        }
        if let Ok(mut commands) = self.commands.lock() {
            commands.remove(name);
        }
    }

    /// Returns the counter registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<DetailCounter>> {
        if name.is_empty() {
            return None;
        }
        self.commands
            .lock()
            .ok()
            .and_then(|commands| commands.get(name).cloned())
    }

    /// Number of registered counters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.lock().map_or(0, |commands| commands.len())
    }

    /// Returns true when no counters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered counter, sorted by name for stable
    /// output.
    #[must_use]
    pub fn report(&self) -> Vec<DetailReport> {
        let mut reports: Vec<DetailReport> = self.commands.lock().map_or_else(
            |_| Vec::new(),
            |commands| commands.values().map(|counter| counter.report()).collect(),
        );
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = DetailRegistry::new();
        registry.register(Arc::new(DetailCounter::new("dumpChunks")));
        let counter = registry.get("dumpChunks").unwrap();
        assert_eq!(counter.name(), "dumpChunks");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_register_overwrites() {
        let registry = DetailRegistry::new();
        let first = Arc::new(DetailCounter::new("find"));
        first.got_failure();
        registry.register(Arc::clone(&first));
        assert_eq!(registry.len(), 1);

        let second = Arc::new(DetailCounter::new("find"));
        registry.register(second);
        assert_eq!(registry.len(), 1);
        // The replacement starts fresh.
        assert_eq!(registry.get("find").unwrap().failures(), 0);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = DetailRegistry::new();
        registry.register(Arc::new(DetailCounter::new("find")));
        registry.unregister("find");
        assert!(registry.is_empty());
        registry.unregister("find");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_names_ignored() {
        let registry = DetailRegistry::new();
        registry.register(Arc::new(DetailCounter::new("")));
        assert!(registry.is_empty());
        assert!(registry.get("").is_none());
    }

    #[test]
    fn test_failure_counting() {
        let counter = DetailCounter::new("find");
        assert_eq!(counter.failures(), 0);
        for want in 1..=4 {
            counter.got_failure();
            assert_eq!(counter.failures(), want);
        }
    }

    #[test]
    fn test_failure_wrap_resets() {
        let counter = DetailCounter::new("find");
        counter
            .failures
            .store(COUNTER_WRAP_LIMIT + 10, Ordering::Relaxed);
        counter.got_failure();
        assert_eq!(counter.failures(), 1);
    }

    #[test]
    fn test_latency_report() {
        let counter = DetailCounter::new("find");
        let report = counter.report();
        assert_eq!(report.latency.ops, 0);
        assert_eq!(report.failures, 0);

        counter.record_latency(100);
        counter.record_latency(200);
        let report = counter.report();
        assert_eq!(report.latency.ops, 2);
        assert!(report.latency.p50_us >= 100);
        assert!(report.latency.max_us >= 199);
    }

    #[test]
    fn test_registry_report_sorted() {
        let registry = DetailRegistry::new();
        registry.register(Arc::new(DetailCounter::new("zeta")));
        registry.register(Arc::new(DetailCounter::new("alpha")));
        let names: Vec<String> = registry
            .report()
            .into_iter()
            .map(|report| report.name)
            .collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
