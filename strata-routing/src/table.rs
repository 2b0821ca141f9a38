//! Immutable per-collection routing snapshot.
//!
//! A `RoutingTable` is created by the builder, handed out behind `Arc`, and
//! never mutated. Readers load the current snapshot once per request and
//! target against it for the whole request; publication of a newer snapshot
//! is an atomic swap in the catalogue layer. Staleness is tolerated - a
//! shard rejecting a stale version triggers the next refresh.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use strata_core::{ChunkVersion, Error, Namespace, Result, ShardId};

use crate::chunk::Chunk;
use crate::chunk_map::TopIndex;
use crate::encoding::KeyOrdering;
use crate::key::{has_simple_collation, Collation, KeyDocument, ShardKeyPattern};
use crate::query::{
    extract_shard_key_from_query, flatten_bounds, index_bounds_for_query, Filter, IndexBounds,
};

/// Source of snapshot sequence numbers, process-wide and strictly
/// increasing across all collections.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Allocates the next snapshot sequence number.
pub(crate) fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// One chunk of a cursor page, as the admin surface reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSummary {
    /// Inclusive lower bound.
    pub min: KeyDocument,
    /// Exclusive upper bound.
    pub max: KeyDocument,
    /// Owning shard.
    pub shard: ShardId,
}

/// A page of chunks plus the collection's total chunk count, used to audit
/// that the in-memory routing view agrees with the catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCursor {
    /// The page of chunks, in key order.
    pub chunks: Vec<ChunkSummary>,
    /// Total number of chunks in the table.
    pub total: usize,
}

/// Immutable routing snapshot of one sharded collection.
#[derive(Debug)]
pub struct RoutingTable {
    sequence: u64,
    nss: Namespace,
    pattern: ShardKeyPattern,
    ordering: KeyOrdering,
    default_collation: Option<Collation>,
    unique: bool,
    pub(crate) top: TopIndex,
    pub(crate) shard_versions: BTreeMap<ShardId, ChunkVersion>,
    collection_version: ChunkVersion,
}

impl RoutingTable {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        nss: Namespace,
        pattern: ShardKeyPattern,
        default_collation: Option<Collation>,
        unique: bool,
        top: TopIndex,
        shard_versions: BTreeMap<ShardId, ChunkVersion>,
        collection_version: ChunkVersion,
    ) -> Self {
        let ordering = pattern.ordering();
        Self {
            sequence: next_sequence(),
            nss,
            pattern,
            ordering,
            default_collation,
            unique,
            top,
            shard_versions,
            collection_version,
        }
    }

    /// Reload sequence number of this snapshot; strictly increasing across
    /// snapshots.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The collection this table routes.
    #[must_use]
    pub const fn ns(&self) -> &Namespace {
        &self.nss
    }

    /// The shard-key pattern of the collection.
    #[must_use]
    pub const fn shard_key_pattern(&self) -> &ShardKeyPattern {
        &self.pattern
    }

    /// The collection's default collation, if not the simple one.
    #[must_use]
    pub const fn default_collation(&self) -> Option<&Collation> {
        self.default_collation.as_ref()
    }

    /// Whether the shard key is enforced unique.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    /// The collection version: the highest chunk version in the table.
    #[must_use]
    pub const fn version(&self) -> ChunkVersion {
        self.collection_version
    }

    /// The highest chunk version on one shard, or `(0, 0, epoch)` for a
    /// shard that owns no chunks of this collection.
    #[must_use]
    pub fn version_for_shard(&self, shard: &ShardId) -> ChunkVersion {
        self.shard_versions.get(shard).copied().unwrap_or_else(|| {
            debug!(shard = %shard, ns = %self.nss, "shard has no tracked chunks");
            ChunkVersion::zero(self.collection_version.epoch)
        })
    }

    /// Total number of chunks.
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.top.num_chunks()
    }

    /// True when `other` routes this shard identically: same shard version.
    #[must_use]
    pub fn compatible_with(&self, other: &Self, shard: &ShardId) -> bool {
        self.version_for_shard(shard) == other.version_for_shard(shard)
    }

    /// Version-only compatibility check for one shard.
    #[must_use]
    pub fn compatible_with_version(&self, version: ChunkVersion, shard: &ShardId) -> bool {
        self.version_for_shard(shard) == version
    }

    /// Inserts the ids of every shard owning chunks of this collection.
    pub fn all_shard_ids(&self, out: &mut BTreeSet<ShardId>) {
        out.extend(self.shard_versions.keys().cloned());
    }

    /// Point targeting: the unique chunk whose `[min, max)` contains
    /// `shard_key`.
    ///
    /// # Errors
    ///
    /// `ShardKeyNotFound` when the collation disagrees with the collection
    /// default on a collation-sensitive key, when the key does not match
    /// the pattern, or when the located chunk fails the containment check.
    /// `InvariantViolation` when the keyspace is not covered.
    pub fn find_intersecting_chunk(
        &self,
        shard_key: &KeyDocument,
        collation: Option<&Collation>,
    ) -> Result<std::sync::Arc<Chunk>> {
        if !has_simple_collation(collation, self.default_collation.as_ref()) {
            for (name, value) in shard_key.fields() {
                if value.is_collatable() {
                    return Err(Error::ShardKeyNotFound {
                        reason: format!(
                            "cannot target single shard due to collation of key {name}"
                        ),
                    });
                }
            }
        }

        let encoded = self.ordering.encode(shard_key)?;
        let chunk = self.top.lookup(&encoded).ok_or_else(|| {
            Error::InvariantViolation {
                reason: format!("no chunk covers key {shard_key} in {}", self.nss),
            }
        })?;

        // The two-level probe guarantees key < max; confirm min <= key.
        let min_encoded = self.ordering.encode(chunk.min())?;
        if encoded < min_encoded {
            return Err(Error::ShardKeyNotFound {
                reason: format!("cannot target single shard using key {shard_key}"),
            });
        }
        Ok(std::sync::Arc::clone(chunk))
    }

    /// Point targeting under the simple collation.
    ///
    /// # Errors
    ///
    /// As [`Self::find_intersecting_chunk`], minus the collation gate.
    pub fn find_intersecting_chunk_with_simple_collation(
        &self,
        shard_key: &KeyDocument,
    ) -> Result<std::sync::Arc<Chunk>> {
        self.find_intersecting_chunk(shard_key, Some(&Collation::Simple))
    }

    /// Point targeting that also reports the owning shard's current
    /// version, for callers that attach versions to dispatched operations.
    ///
    /// # Errors
    ///
    /// As [`Self::find_intersecting_chunk`].
    pub fn find_intersecting_chunk_and_version(
        &self,
        shard_key: &KeyDocument,
        collation: Option<&Collation>,
    ) -> Result<(std::sync::Arc<Chunk>, ChunkVersion)> {
        let chunk = self.find_intersecting_chunk(shard_key, collation)?;
        let version = self.version_for_shard(chunk.shard());
        Ok((chunk, version))
    }

    /// Inserts every shard owning at least one chunk overlapping
    /// `[min, max]`, both bounds inclusive. Exits early once every shard of
    /// the collection is present.
    ///
    /// # Errors
    ///
    /// `ShardKeyNotFound` when either bound does not match the pattern.
    pub fn shard_ids_for_range(
        &self,
        min: &KeyDocument,
        max: &KeyDocument,
        out: &mut BTreeSet<ShardId>,
    ) -> Result<()> {
        let min_encoded = self.ordering.encode(min)?;
        let max_encoded = self.ordering.encode(max)?;
        let total_shards = self.shard_versions.len();
        self.top.visit_overlapping(&min_encoded, &max_encoded, |chunk| {
            out.insert(chunk.shard().clone());
            // All shards collected: nothing more to learn from this range.
            out.len() < total_shards
        });
        Ok(())
    }

    /// Like [`Self::shard_ids_for_range`] but collecting each shard's
    /// current version alongside its id.
    ///
    /// # Errors
    ///
    /// `ShardKeyNotFound` when either bound does not match the pattern.
    pub fn shard_ids_and_versions_for_range(
        &self,
        min: &KeyDocument,
        max: &KeyDocument,
        out: &mut BTreeMap<ShardId, ChunkVersion>,
    ) -> Result<()> {
        let mut ids = BTreeSet::new();
        self.shard_ids_for_range(min, max, &mut ids)?;
        for shard in ids {
            let version = self.version_for_shard(&shard);
            out.insert(shard, version);
        }
        Ok(())
    }

    /// Query targeting: the shard set that can answer `filter`.
    ///
    /// Equality on the full shard key targets a single shard; otherwise
    /// per-field index bounds flatten into key ranges and each range is
    /// targeted, stopping once every shard is present. A query for which
    /// no range matched still returns one shard; callers rely on a
    /// non-empty answer.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for geo-near filters, which must use the dedicated
    /// command instead of routed queries.
    pub fn shard_ids_for_query(
        &self,
        filter: &Filter,
        collation: Option<&Collation>,
        out: &mut BTreeSet<ShardId>,
    ) -> Result<()> {
        if filter.has_geo_near() {
            return Err(Error::InvalidArgument {
                name: "filter",
                reason: "use the geoNear command rather than a $near query".to_string(),
            });
        }

        // Fast path: an equality on the full shard key targets one chunk.
        if let Some(shard_key) = extract_shard_key_from_query(&self.pattern, filter) {
            match self.find_intersecting_chunk(&shard_key, collation) {
                Ok(chunk) => {
                    out.insert(chunk.shard().clone());
                    return Ok(());
                }
                Err(_) => {
                    // The query straddles shards; fall through to bounds.
                }
            }
        }

        let collation_is_simple =
            has_simple_collation(collation, self.default_collation.as_ref());
        let bounds: IndexBounds =
            index_bounds_for_query(&self.pattern, filter, collation_is_simple);
        let ranges = flatten_bounds(&self.pattern, &bounds);

        let total_shards = self.shard_versions.len();
        for (range_min, range_max) in &ranges {
            self.shard_ids_for_range(range_min, range_max, out)?;
            if out.len() == total_shards {
                break;
            }
        }

        // Callers assume at least one shard is always returned.
        if out.is_empty() {
            if let Some(first) = self.shard_versions.keys().next() {
                out.insert(first.clone());
            }
        }
        Ok(())
    }

    /// Cursor over all chunks in key order: at most `limit` summaries
    /// starting at logical offset `start`, plus the total chunk count.
    #[must_use]
    pub fn iterator_chunks(&self, start: usize, limit: usize) -> ChunkCursor {
        let chunks = self
            .top
            .iter_chunks()
            .skip(start)
            .take(limit)
            .map(|chunk| ChunkSummary {
                min: chunk.min().clone(),
                max: chunk.max().clone(),
                shard: chunk.shard().clone(),
            })
            .collect();
        ChunkCursor {
            chunks,
            total: self.num_chunks(),
        }
    }

    /// Writes the rendered table to the log. `Display` itself is pure.
    pub fn dump(&self) {
        tracing::info!(table = %self, "routing table dump");
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "RoutingTable: {} key: {} version: {}",
            self.nss, self.pattern, self.collection_version
        )?;
        writeln!(f, "Chunks:")?;
        for chunk in self.top.iter_chunks() {
            writeln!(f, "\t{chunk}")?;
        }
        writeln!(f, "Shard versions:")?;
        for (shard, version) in &self.shard_versions {
            writeln!(f, "\t{shard}: {version}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TableBuilder;
    use crate::key::KeyValue;
    use crate::query::CmpOp;
    use strata_core::Epoch;

    fn doc(v: KeyValue) -> KeyDocument {
        KeyDocument::from_pairs([("k", v)])
    }

    fn chunk(min: KeyValue, max: KeyValue, shard: &str, major: u32, minor: u32) -> Chunk {
        Chunk::new(
            doc(min),
            doc(max),
            ShardId::new(shard),
            ChunkVersion::new(major, minor, Epoch::new(1)),
        )
    }

    fn builder() -> TableBuilder {
        TableBuilder::new(
            Namespace::new("test.orders"),
            ShardKeyPattern::ascending("k"),
            None,
            false,
            Epoch::new(1),
        )
    }

    /// Three chunks on three shards: [MinKey,10) s0, [10,20) s1,
    /// [20,MaxKey) s2.
    fn three_shard_table() -> RoutingTable {
        builder()
            .build(&[
                chunk(KeyValue::MinKey, KeyValue::Int(10), "s0", 1, 0),
                chunk(KeyValue::Int(10), KeyValue::Int(20), "s1", 1, 1),
                chunk(KeyValue::Int(20), KeyValue::MaxKey, "s2", 1, 2),
            ])
            .unwrap()
    }

    fn cmp(field: &str, op: CmpOp, value: KeyValue) -> Filter {
        Filter::Cmp {
            field: field.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_single_chunk_table() {
        let table = builder()
            .build(&[chunk(KeyValue::MinKey, KeyValue::MaxKey, "s0", 1, 0)])
            .unwrap();
        assert_eq!(table.num_chunks(), 1);

        let found = table
            .find_intersecting_chunk_with_simple_collation(&doc(KeyValue::Int(5)))
            .unwrap();
        assert_eq!(found.shard(), &ShardId::new("s0"));

        let mut shards = BTreeSet::new();
        table
            .shard_ids_for_range(&doc(KeyValue::Int(0)), &doc(KeyValue::Int(100)), &mut shards)
            .unwrap();
        assert_eq!(shards, BTreeSet::from([ShardId::new("s0")]));
    }

    #[test]
    fn test_point_targeting_boundaries() {
        let table = three_shard_table();
        for (probe, want) in [
            (KeyValue::Int(9), "s0"),
            (KeyValue::Int(10), "s1"),
            (KeyValue::Int(19), "s1"),
            (KeyValue::Int(20), "s2"),
        ] {
            let found = table
                .find_intersecting_chunk_with_simple_collation(&doc(probe.clone()))
                .unwrap();
            assert_eq!(found.shard(), &ShardId::new(want), "probe {probe}");
        }
    }

    #[test]
    fn test_collation_mismatch_on_collatable_key() {
        let table = three_shard_table();
        let collation = Collation::Locale("fr".to_string());
        // A string key under a non-default collation cannot target.
        let err = table
            .find_intersecting_chunk(
                &doc(KeyValue::String("x".to_string())),
                Some(&collation),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ShardKeyNotFound { .. }));
        // A numeric key is collation-insensitive and targets fine.
        assert!(table
            .find_intersecting_chunk(&doc(KeyValue::Int(5)), Some(&collation))
            .is_ok());
    }

    #[test]
    fn test_wrong_shape_key_rejected() {
        let table = three_shard_table();
        let bad = KeyDocument::from_pairs([
            ("k", KeyValue::Int(1)),
            ("extra", KeyValue::Int(2)),
        ]);
        let err = table
            .find_intersecting_chunk_with_simple_collation(&bad)
            .unwrap_err();
        assert!(matches!(err, Error::ShardKeyNotFound { .. }));
    }

    #[test]
    fn test_range_targeting_inclusive_bounds() {
        let table = three_shard_table();
        let mut shards = BTreeSet::new();
        // [5, 10]: overlaps [MinKey,10) and, max being inclusive, [10,20).
        table
            .shard_ids_for_range(&doc(KeyValue::Int(5)), &doc(KeyValue::Int(10)), &mut shards)
            .unwrap();
        assert_eq!(
            shards,
            BTreeSet::from([ShardId::new("s0"), ShardId::new("s1")])
        );
    }

    #[test]
    fn test_range_targeting_all_shards() {
        let table = three_shard_table();
        let mut shards = BTreeSet::new();
        table
            .shard_ids_for_range(
                &doc(KeyValue::MinKey),
                &doc(KeyValue::MaxKey),
                &mut shards,
            )
            .unwrap();
        assert_eq!(shards.len(), 3);
    }

    #[test]
    fn test_range_and_versions() {
        let table = three_shard_table();
        let mut out = BTreeMap::new();
        table
            .shard_ids_and_versions_for_range(
                &doc(KeyValue::Int(15)),
                &doc(KeyValue::Int(25)),
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            out.get(&ShardId::new("s1")),
            Some(&ChunkVersion::new(1, 1, Epoch::new(1)))
        );
    }

    #[test]
    fn test_query_targeting_range() {
        let table = three_shard_table();
        // { k: { $gte: 5, $lt: 25 } } spans all three shards.
        let filter = Filter::And(vec![
            cmp("k", CmpOp::Gte, KeyValue::Int(5)),
            cmp("k", CmpOp::Lt, KeyValue::Int(25)),
        ]);
        let mut shards = BTreeSet::new();
        table.shard_ids_for_query(&filter, None, &mut shards).unwrap();
        assert_eq!(shards.len(), 3);

        // { k: 15 } targets exactly s1.
        let eq = cmp("k", CmpOp::Eq, KeyValue::Int(15));
        let mut shards = BTreeSet::new();
        table.shard_ids_for_query(&eq, None, &mut shards).unwrap();
        assert_eq!(shards, BTreeSet::from([ShardId::new("s1")]));
    }

    #[test]
    fn test_query_targeting_unbounded_filter() {
        let table = three_shard_table();
        let mut shards = BTreeSet::new();
        table
            .shard_ids_for_query(&Filter::And(Vec::new()), None, &mut shards)
            .unwrap();
        assert_eq!(shards.len(), 3);
    }

    #[test]
    fn test_query_targeting_geo_near_rejected() {
        let table = three_shard_table();
        let filter = Filter::GeoNear {
            field: "loc".to_string(),
        };
        let mut shards = BTreeSet::new();
        let err = table
            .shard_ids_for_query(&filter, None, &mut shards)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_query_targeting_text_goes_broad() {
        let table = three_shard_table();
        let filter = Filter::And(vec![
            cmp("k", CmpOp::Eq, KeyValue::Int(15)),
            Filter::Text {
                query: "anything".to_string(),
            },
        ]);
        let mut shards = BTreeSet::new();
        table.shard_ids_for_query(&filter, None, &mut shards).unwrap();
        // Equality fast path still wins: the full shard key is present.
        assert_eq!(shards.len(), 1);

        // Without the equality the text leaf forces all shards.
        let filter = Filter::Text {
            query: "anything".to_string(),
        };
        let mut shards = BTreeSet::new();
        table.shard_ids_for_query(&filter, None, &mut shards).unwrap();
        assert_eq!(shards.len(), 3);
    }

    #[test]
    fn test_all_shard_ids_and_versions() {
        let table = three_shard_table();
        let mut all = BTreeSet::new();
        table.all_shard_ids(&mut all);
        assert_eq!(all.len(), 3);
        assert_eq!(
            table.version_for_shard(&ShardId::new("s2")),
            ChunkVersion::new(1, 2, Epoch::new(1))
        );
        // Unknown shards answer (0, 0, epoch).
        assert_eq!(
            table.version_for_shard(&ShardId::new("nowhere")),
            ChunkVersion::zero(Epoch::new(1))
        );
    }

    #[test]
    fn test_iterator_chunks_pagination() {
        let table = three_shard_table();
        let page = table.iterator_chunks(1, 1);
        assert_eq!(page.total, 3);
        assert_eq!(page.chunks.len(), 1);
        assert_eq!(page.chunks[0].shard, ShardId::new("s1"));

        let beyond = table.iterator_chunks(5, 10);
        assert!(beyond.chunks.is_empty());
        assert_eq!(beyond.total, 3);
    }

    #[test]
    fn test_sequence_strictly_increases() {
        let a = three_shard_table();
        let b = three_shard_table();
        assert!(b.sequence() > a.sequence());
    }

    #[test]
    fn test_display_is_pure() {
        let table = three_shard_table();
        let rendered = format!("{table}");
        assert!(rendered.contains("test.orders"));
        assert!(rendered.contains("s1"));
    }

    #[test]
    fn test_full_coverage_property() {
        // Every probe in a spread of keys lands in a chunk containing it.
        let table = three_shard_table();
        let ord = table.shard_key_pattern().ordering();
        for probe in [
            KeyValue::MinKey,
            KeyValue::Int(-1_000),
            KeyValue::Int(0),
            KeyValue::Int(10),
            KeyValue::Int(19),
            KeyValue::Int(1_000_000),
            KeyValue::String("z".to_string()),
        ] {
            let key = doc(probe.clone());
            let found = table
                .find_intersecting_chunk_with_simple_collation(&key)
                .unwrap();
            let enc = ord.encode(&key).unwrap();
            assert!(ord.encode(found.min()).unwrap() <= enc);
            assert!(enc < ord.encode(found.max()).unwrap());
        }
    }

    #[test]
    fn test_disjointness_property() {
        let table = three_shard_table();
        let ord = table.shard_key_pattern().ordering();
        let chunks: Vec<_> = table.top.iter_chunks().collect();
        for pair in chunks.windows(2) {
            let prev_max = ord.encode(pair[0].max()).unwrap();
            let next_min = ord.encode(pair[1].min()).unwrap();
            // Contiguous and gap-free: each max meets the next min.
            assert_eq!(prev_max, next_min);
        }
    }
}
