//! System limits and configuration bounds.
//!
//! Put limits on everything. Every map, refresh pool and deadline has an
//! explicit maximum named in one place, so the system stays predictable
//! under collections with millions of chunks.

/// System-wide limits for the Strata routing tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of chunks held by one inner chunk-map bucket. When a
    /// collection exceeds this, the builder creates additional buckets.
    pub max_chunks_per_bucket: u32,

    /// Maximum number of routing refreshes in flight at once across all
    /// collections. Excess refreshes are refused, not queued.
    pub max_concurrent_refreshes: i64,

    /// Deadline for one catalogue query, in milliseconds. A timeout aborts
    /// the refresh and preserves the existing snapshot.
    pub catalog_timeout_ms: u64,

    /// Cadence of the periodic-task scheduler, in seconds. The refresher's
    /// own `next_refresh_at` gate decides whether a tick does work.
    pub scheduler_period_secs: u64,

    /// Lower bound of the randomised post-start refresh delay, in seconds.
    pub startup_jitter_min_secs: u64,
    /// Upper bound of the randomised post-start refresh delay, in seconds.
    pub startup_jitter_max_secs: u64,

    /// Lower bound of the randomised steady-state refresh interval, in
    /// seconds.
    pub refresh_interval_min_secs: u64,
    /// Upper bound of the randomised steady-state refresh interval, in
    /// seconds.
    pub refresh_interval_max_secs: u64,
}

impl Limits {
    /// Creates limits with production defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // 10k chunks per bucket keeps bucket copies cheap while a
            // million-chunk collection still fits in ~100 buckets.
            max_chunks_per_bucket: 10_000,

            max_concurrent_refreshes: 100,
            catalog_timeout_ms: 30_000,

            scheduler_period_secs: 60,

            // Spread freshly-started secondaries over a few minutes so a
            // rolling restart does not stampede the catalogue.
            startup_jitter_min_secs: 60,
            startup_jitter_max_secs: 240,

            // Steady state: roughly daily, decorrelated across the fleet.
            refresh_interval_min_secs: 80_000,
            refresh_interval_max_secs: 86_400,
        }
    }

    /// Creates limits sized for unit tests: tiny buckets so multi-bucket
    /// behaviour is exercised with a handful of chunks, and no waiting.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_chunks_per_bucket: 3,
            max_concurrent_refreshes: 2,
            catalog_timeout_ms: 1_000,
            scheduler_period_secs: 1,
            startup_jitter_min_secs: 0,
            startup_jitter_max_secs: 0,
            refresh_interval_min_secs: 0,
            refresh_interval_max_secs: 0,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
