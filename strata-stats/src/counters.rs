//! Wrap-protected event counters.
//!
//! One process-wide bag of named monotonic counters: read classification,
//! slow-operation classification per operation type, and admission-refused
//! events per limiter. Reads use relaxed ordering - exactness is not
//! required, rates are. When any counter passes the wrap limit the whole
//! bag resets to zero, which keeps rate arithmetic sane over long uptimes
//! without ever overflowing.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// When any counter exceeds this, all counters in the bag reset.
pub const COUNTER_WRAP_LIMIT: u64 = 1 << 30;

/// The process-wide event counter bag.
#[derive(Debug, Default)]
pub struct EventCounters {
    // Read classification.
    read_single: AtomicU64,
    read_scatter: AtomicU64,

    // Slow-operation classification.
    query_slow: AtomicU64,
    write_slow: AtomicU64,
    command_slow: AtomicU64,
    refresh_slow: AtomicU64,

    // Admission refusals, per limiter.
    refresh_refused: AtomicU64,
    connection_refused: AtomicU64,
}

/// Serialisable snapshot of the counter bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountersReport {
    /// Queries routed to a single shard.
    pub read_single: u64,
    /// Queries scattered to more than one shard.
    pub read_scatter: u64,
    /// Slow routed queries.
    pub query_slow: u64,
    /// Slow routed writes.
    pub write_slow: u64,
    /// Slow admin commands.
    pub command_slow: u64,
    /// Slow routing refreshes.
    pub refresh_slow: u64,
    /// Refresh admissions refused by the limiter.
    pub refresh_refused: u64,
    /// Outbound connection admissions refused by the limiter.
    pub connection_refused: u64,
}

impl EventCounters {
    /// Creates a zeroed counter bag.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            read_single: AtomicU64::new(0),
            read_scatter: AtomicU64::new(0),
            query_slow: AtomicU64::new(0),
            write_slow: AtomicU64::new(0),
            command_slow: AtomicU64::new(0),
            refresh_slow: AtomicU64::new(0),
            refresh_refused: AtomicU64::new(0),
            connection_refused: AtomicU64::new(0),
        }
    }

    /// A query targeted exactly one shard.
    pub fn got_read_single(&self) {
        self.check_wrap();
        self.read_single.fetch_add(1, Ordering::Relaxed);
    }

    /// A query scattered to more than one shard.
    pub fn got_read_scatter(&self) {
        self.check_wrap();
        self.read_scatter.fetch_add(1, Ordering::Relaxed);
    }

    /// A routed query exceeded the slow threshold.
    pub fn got_query_slow(&self) {
        self.check_wrap();
        self.query_slow.fetch_add(1, Ordering::Relaxed);
    }

    /// A routed write exceeded the slow threshold.
    pub fn got_write_slow(&self) {
        self.check_wrap();
        self.write_slow.fetch_add(1, Ordering::Relaxed);
    }

    /// An admin command exceeded the slow threshold.
    pub fn got_command_slow(&self) {
        self.check_wrap();
        self.command_slow.fetch_add(1, Ordering::Relaxed);
    }

    /// A routing refresh exceeded the slow threshold.
    pub fn got_refresh_slow(&self) {
        self.check_wrap();
        self.refresh_slow.fetch_add(1, Ordering::Relaxed);
    }

    /// The refresh limiter refused an admission.
    pub fn got_refresh_refused(&self) {
        self.check_wrap();
        self.refresh_refused.fetch_add(1, Ordering::Relaxed);
    }

    /// The connection limiter refused an admission.
    pub fn got_connection_refused(&self) {
        self.check_wrap();
        self.connection_refused.fetch_add(1, Ordering::Relaxed);
    }

    /// Relaxed snapshot of every counter.
    #[must_use]
    pub fn report(&self) -> CountersReport {
        CountersReport {
            read_single: self.read_single.load(Ordering::Relaxed),
            read_scatter: self.read_scatter.load(Ordering::Relaxed),
            query_slow: self.query_slow.load(Ordering::Relaxed),
            write_slow: self.write_slow.load(Ordering::Relaxed),
            command_slow: self.command_slow.load(Ordering::Relaxed),
            refresh_slow: self.refresh_slow.load(Ordering::Relaxed),
            refresh_refused: self.refresh_refused.load(Ordering::Relaxed),
            connection_refused: self.connection_refused.load(Ordering::Relaxed),
        }
    }

    fn all(&self) -> [&AtomicU64; 8] {
        [
            &self.read_single,
            &self.read_scatter,
            &self.query_slow,
            &self.write_slow,
            &self.command_slow,
            &self.refresh_slow,
            &self.refresh_refused,
            &self.connection_refused,
        ]
    }

    /// Resets the whole bag once any member passes the wrap limit.
    fn check_wrap(&self) {
        let wrap = self
            .all()
            .iter()
            .any(|counter| counter.load(Ordering::Relaxed) > COUNTER_WRAP_LIMIT);
        if wrap {
            for counter in self.all() {
                counter.store(0, Ordering::Relaxed);
            }
        }
    }
}

/// The process-wide counter bag.
static GLOBAL: EventCounters = EventCounters::new();

/// Access to the process-wide counter bag.
#[must_use]
pub fn global() -> &'static EventCounters {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increments_show_in_report() {
        let counters = EventCounters::new();
        counters.got_read_single();
        counters.got_read_single();
        counters.got_read_scatter();
        counters.got_refresh_refused();

        let report = counters.report();
        assert_eq!(report.read_single, 2);
        assert_eq!(report.read_scatter, 1);
        assert_eq!(report.refresh_refused, 1);
        assert_eq!(report.write_slow, 0);
    }

    #[test]
    fn test_wrap_resets_every_counter() {
        let counters = EventCounters::new();
        counters.got_read_scatter();
        counters
            .read_single
            .store(COUNTER_WRAP_LIMIT + 5, Ordering::Relaxed);

        // The next increment notices the wrap and resets the whole bag.
        counters.got_command_slow();
        let report = counters.report();
        assert!(report.read_single <= COUNTER_WRAP_LIMIT);
        assert_eq!(report.read_single, 0);
        assert_eq!(report.read_scatter, 0);
        assert_eq!(report.command_slow, 1);
    }

    #[test]
    fn test_report_serialises() {
        let counters = EventCounters::new();
        counters.got_query_slow();
        let report = counters.report();
        // Names are stable: dashboards key on them.
        let json = serde_json::to_value(&report);
        assert!(json.is_ok());
    }
}
