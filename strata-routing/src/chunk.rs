//! Immutable chunk descriptor.

use std::fmt;

use strata_core::{ChunkVersion, ShardId};

use crate::key::KeyDocument;

/// One chunk: a half-open shard-key interval `[min, max)` owned by one
/// shard at one version. Never mutated after construction; the routing
/// index shares chunks between snapshots behind `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    min: KeyDocument,
    max: KeyDocument,
    shard: ShardId,
    version: ChunkVersion,
}

impl Chunk {
    /// Creates a chunk descriptor. The builder validates that `min < max`
    /// under the collection's key ordering when it assembles the keyspace.
    #[must_use]
    pub const fn new(
        min: KeyDocument,
        max: KeyDocument,
        shard: ShardId,
        version: ChunkVersion,
    ) -> Self {
        Self {
            min,
            max,
            shard,
            version,
        }
    }

    /// Inclusive lower bound.
    #[must_use]
    pub const fn min(&self) -> &KeyDocument {
        &self.min
    }

    /// Exclusive upper bound.
    #[must_use]
    pub const fn max(&self) -> &KeyDocument {
        &self.max
    }

    /// The shard that owns this chunk.
    #[must_use]
    pub const fn shard(&self) -> &ShardId {
        &self.shard
    }

    /// The chunk's version.
    #[must_use]
    pub const fn version(&self) -> ChunkVersion {
        self.version
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} -> {}) on {} at {}",
            self.min, self.max, self.shard, self.version
        )
    }
}
