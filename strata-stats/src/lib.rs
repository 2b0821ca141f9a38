//! Strata Stats - process-wide counters.
//!
//! Two layers: cheap always-on event counters with wrap protection, and
//! per-command detail counters (latency histogram + failure count) behind a
//! registry keyed by command name. Both publish serialisable reports;
//! neither is on the routing hot path beyond a relaxed atomic increment.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod counters;
mod detail;

pub use counters::{global, CountersReport, EventCounters, COUNTER_WRAP_LIMIT};
pub use detail::{DetailCounter, DetailRegistry, DetailReport, LatencyReport};
