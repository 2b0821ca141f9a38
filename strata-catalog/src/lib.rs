//! Strata Catalog - routing metadata cache and background refresh.
//!
//! The catalogue cache holds one immutable routing snapshot per sharded
//! collection and refreshes it from the upstream config store: full chunk
//! pulls on a cold miss, incremental deltas on a warm refresh. Refreshes
//! are single-flight per namespace and admission-limited across namespaces.
//! A periodic task re-pulls the whole sharded-collection set on replica
//! secondaries, jittered so a fleet never stampedes the catalogue.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod refresher;
mod role;
mod scheduler;
mod store;

pub use cache::{CatalogCache, CollectionCache, RoutingInfo};
pub use refresher::RoutingRefresh;
pub use role::{MemberState, ReplicaRole, SharedRole};
pub use scheduler::{PeriodicRunner, PeriodicTask};
pub use store::{ChunkDoc, CollectionEntry, ConfigStore, MemoryConfigStore};
