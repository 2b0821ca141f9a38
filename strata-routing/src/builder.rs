//! Routing table construction.
//!
//! Two paths: `build` assembles a fresh table from a full chunk set, and
//! `make_updated` derives a new snapshot from a delta, copying only the
//! buckets the delta touches and sharing the rest with the prior snapshot.
//! Both take their chunks sorted ascending by chunk version, the order the
//! catalogue reports changes in.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::Arc;

use tracing::{debug, error};

use strata_core::{ChunkVersion, Epoch, Error, Limits, Namespace, Result, ShardId};

use crate::chunk::Chunk;
use crate::chunk_map::{ChunkMap, TopIndex};
use crate::encoding::{EncodedKey, KeyOrdering};
use crate::key::{Collation, ShardKeyPattern};
use crate::table::RoutingTable;

/// Builder for fresh routing tables.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    nss: Namespace,
    pattern: ShardKeyPattern,
    default_collation: Option<Collation>,
    unique: bool,
    epoch: Epoch,
    bucket_size: u32,
}

impl TableBuilder {
    /// Creates a builder for the collection's declared epoch.
    #[must_use]
    pub fn new(
        nss: Namespace,
        pattern: ShardKeyPattern,
        default_collation: Option<Collation>,
        unique: bool,
        epoch: Epoch,
    ) -> Self {
        Self {
            nss,
            pattern,
            default_collation,
            unique,
            epoch,
            bucket_size: Limits::new().max_chunks_per_bucket,
        }
    }

    /// Overrides the bucket size (tests use tiny buckets to exercise the
    /// two-level structure with few chunks).
    #[must_use]
    pub const fn with_bucket_size(mut self, bucket_size: u32) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    /// Builds a table from the collection's full chunk set.
    ///
    /// Overlapping entries are collated in input order: each chunk evicts
    /// the previously-placed chunks its range covers, so the newest version
    /// of every range wins. The assembled keyspace must cover exactly
    /// `[MinKey, MaxKey)`.
    ///
    /// # Errors
    ///
    /// `ConflictingOperationInProgress` when a chunk carries a foreign
    /// epoch, the input is not version-sorted, a chunk is empty or
    /// inverted, or coverage of the keyspace is incomplete.
    pub fn build(&self, chunks: &[Chunk]) -> Result<RoutingTable> {
        let ordering = self.pattern.ordering();
        let mut collection_version = ChunkVersion::zero(self.epoch);
        let mut assembled = ChunkMap::new();

        for chunk in chunks {
            validate_chunk(&self.nss, chunk, collection_version, &ordering)?;
            collection_version = chunk.version();

            let min_key = ordering.encode(chunk.min())?;
            let max_key = ordering.encode(chunk.max())?;
            remove_overlapping(&mut assembled, &min_key, &max_key);
            assembled.insert(max_key, Arc::new(chunk.clone()));
        }

        let shard_versions = construct_shard_version_map(&self.nss, self.epoch, &assembled)?;
        debug!(
            ns = %self.nss,
            chunks = assembled.len(),
            shards = shard_versions.len(),
            version = %collection_version,
            "built routing table"
        );

        let top = TopIndex::from_sorted(&assembled, self.bucket_size);
        Ok(RoutingTable::assemble(
            self.nss.clone(),
            self.pattern.clone(),
            self.default_collation.clone(),
            self.unique,
            top,
            shard_versions,
            collection_version,
        ))
    }
}

impl RoutingTable {
    /// Derives a new snapshot with `changed` applied.
    ///
    /// Each changed chunk locates the one bucket covering its max key; that
    /// bucket is copied on first touch and edited in place, and every other
    /// bucket is shared with this snapshot. The result carries a fresh,
    /// strictly larger sequence number.
    ///
    /// # Errors
    ///
    /// `ConflictingOperationInProgress` when a chunk carries a foreign
    /// epoch or the delta is not version-sorted.
    /// `InvariantViolation` when a changed chunk's range cannot be located
    /// in the current index - the in-memory view is unrecoverable.
    pub fn make_updated(&self, changed: &[Chunk]) -> Result<Self> {
        let nss = self.ns().clone();
        let pattern = self.shard_key_pattern().clone();
        let ordering = pattern.ordering();
        let mut collection_version = self.version();
        let mut shard_versions = self.shard_versions.clone();

        // Buckets copied by this invocation, keyed by their top-index key.
        let mut copied: BTreeMap<EncodedKey, ChunkMap> = BTreeMap::new();

        for chunk in changed {
            validate_chunk(&nss, chunk, collection_version, &ordering)?;
            collection_version = chunk.version();

            let min_key = ordering.encode(chunk.min())?;
            let max_key = ordering.encode(chunk.max())?;

            // The first bucket whose last-max is >= the chunk's max covers
            // the chunk's range.
            let top_key = match self
                .top
                .buckets()
                .range((Included(max_key.clone()), Unbounded))
                .next()
            {
                Some((key, _)) => key.clone(),
                None => {
                    error!(
                        ns = %nss,
                        chunk = %chunk,
                        "changed chunk is outside the indexed keyspace"
                    );
                    return Err(Error::InvariantViolation {
                        reason: format!(
                            "no bucket covers changed chunk {chunk} of {nss}"
                        ),
                    });
                }
            };

            let bucket = copied.entry(top_key.clone()).or_insert_with(|| {
                // Copy-on-write: first touch of this bucket in this update.
                self.top.buckets()[&top_key].as_ref().clone()
            });
            remove_overlapping(bucket, &min_key, &max_key);
            bucket.insert(max_key, Arc::new(chunk.clone()));

            shard_versions
                .entry(chunk.shard().clone())
                .and_modify(|version| {
                    if chunk.version() > *version {
                        *version = chunk.version();
                    }
                })
                .or_insert_with(|| chunk.version());
        }

        debug!(
            ns = %nss,
            changed = changed.len(),
            copied_buckets = copied.len(),
            version = %collection_version,
            "updated routing table"
        );

        let mut buckets = self.top.buckets().clone();
        for (top_key, bucket) in copied {
            buckets.insert(top_key, Arc::new(bucket));
        }

        Ok(Self::assemble(
            nss,
            pattern,
            self.default_collation().cloned(),
            self.is_unique(),
            TopIndex::from_buckets(buckets),
            shard_versions,
            collection_version,
        ))
    }
}

/// Shared preconditions on every incoming chunk: matching epoch, version
/// order, and a non-inverted range.
fn validate_chunk(
    nss: &Namespace,
    chunk: &Chunk,
    collection_version: ChunkVersion,
    ordering: &KeyOrdering,
) -> Result<()> {
    if chunk.version().epoch != collection_version.epoch {
        return Err(Error::ConflictingOperationInProgress {
            reason: format!(
                "chunk {chunk} of {nss} has epoch {} different from that of the collection {}",
                chunk.version().epoch,
                collection_version.epoch
            ),
        });
    }
    if chunk.version() < collection_version {
        return Err(Error::ConflictingOperationInProgress {
            reason: format!(
                "chunks of {nss} are not sorted by version: {} after {collection_version}",
                chunk.version()
            ),
        });
    }
    let min_key = ordering.encode(chunk.min())?;
    let max_key = ordering.encode(chunk.max())?;
    if min_key >= max_key {
        return Err(Error::ConflictingOperationInProgress {
            reason: format!("chunk {chunk} of {nss} has min >= max"),
        });
    }
    Ok(())
}

/// Removes every entry whose key lies in `(min_key, max_key]` - exactly the
/// chunks overlapping the incoming range, since entries are keyed by their
/// exclusive max.
fn remove_overlapping(map: &mut ChunkMap, min_key: &EncodedKey, max_key: &EncodedKey) {
    let doomed: Vec<EncodedKey> = map
        .range((Excluded(min_key.clone()), Included(max_key.clone())))
        .map(|(key, _)| key.clone())
        .collect();
    for key in doomed {
        map.remove(&key);
    }
}

/// Single sweep over the assembled keyspace: per-shard max chunk version,
/// plus validation that the keyspace starts at `MinKey` and ends at
/// `MaxKey`.
fn construct_shard_version_map(
    nss: &Namespace,
    epoch: Epoch,
    assembled: &ChunkMap,
) -> Result<BTreeMap<ShardId, ChunkVersion>> {
    let mut shard_versions = BTreeMap::new();

    for chunk in assembled.values() {
        let entry = shard_versions
            .entry(chunk.shard().clone())
            .or_insert_with(|| ChunkVersion::zero(epoch));
        if chunk.version() > *entry {
            *entry = chunk.version();
        }
    }

    let covers = assembled
        .values()
        .next()
        .is_some_and(|first| first.min().is_all_min_key())
        && assembled
            .values()
            .next_back()
            .is_some_and(|last| last.max().is_all_max_key());
    if !covers {
        return Err(Error::ConflictingOperationInProgress {
            reason: format!("chunks of {nss} do not cover the keyspace [MinKey, MaxKey)"),
        });
    }

    Ok(shard_versions)
}
