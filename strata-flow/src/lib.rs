//! Strata Flow - admission control.
//!
//! Callers that must bound in-flight work (concurrent routing refreshes,
//! outbound catalogue connections) acquire a slot before starting and
//! release it when done. Nothing blocks and nothing queues: a refused
//! acquisition is the caller's signal to shed or defer the work.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod limiter;

pub use limiter::{CountLimiter, Limiter, Permit, DEFAULT_LIMIT};
