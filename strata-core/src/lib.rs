//! Strata Core - Strongly-typed identifiers, errors and limits.
//!
//! This crate provides the shared vocabulary of the Strata routing tier:
//! shard and namespace identity, chunk versions, the semantic error type and
//! the system-wide limits. It deliberately has no dependencies - everything
//! here is plain data.
//!
//! # Design Principles
//!
//! - **Strongly-typed identity**: a `ShardId` cannot be confused with a
//!   `Namespace`
//! - **Semantic errors**: one enum of routing-level error categories, not a
//!   stack of source-specific types
//! - **Explicit limits**: every bound the system relies on is named in one
//!   place

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use types::{ChunkVersion, Epoch, Namespace, ShardId};
