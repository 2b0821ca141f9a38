//! Strata Routing - the sharded-collection routing index.
//!
//! For each sharded collection this crate answers: given a shard-key value,
//! a shard-key range, or a query predicate, which backend shards own the
//! data? Lookups are on the hot path of every client request, so the index
//! is a two-level ordered map with O(log) point lookups, and updates are
//! functional: a refresh produces a new immutable snapshot that shares
//! unchanged buckets with the prior one.
//!
//! # Design
//!
//! - **Order-preserving key encoding**: shard keys compare as byte strings
//! - **Two-level index**: buckets of at most B chunks keep copy-on-write
//!   updates to O(delta / B) bucket copies
//! - **Immutable snapshots**: readers never lock; publication is an atomic
//!   pointer swap in the layer above

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod builder;
mod chunk;
mod chunk_map;
mod encoding;
mod key;
mod query;
mod table;

pub use builder::TableBuilder;
pub use chunk::Chunk;
pub use chunk_map::{ChunkMap, TopIndex};
pub use encoding::{compare_values, EncodedKey, KeyOrdering};
pub use key::{Collation, Direction, KeyDocument, KeyValue, ShardKeyPattern};
pub use query::{CmpOp, Filter, IndexBounds, Interval};
pub use table::{ChunkCursor, ChunkSummary, RoutingTable};
