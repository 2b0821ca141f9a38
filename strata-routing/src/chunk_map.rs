//! The two-level chunk index.
//!
//! Inner level: an ordered map from each chunk's encoded `max` to the
//! chunk, holding at most B contiguous chunks. Outer level: an ordered map
//! from each bucket's largest chunk-max to the bucket. Point lookup is an
//! upper-bound probe at each level; updates copy only the touched buckets
//! and share the rest between snapshots.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::encoding::EncodedKey;

/// Inner bucket: encoded chunk-max -> chunk, at most B entries.
pub type ChunkMap = BTreeMap<EncodedKey, Arc<Chunk>>;

/// Outer level of the routing index: encoded last-chunk-max -> bucket.
///
/// Invariants (established by the builder, relied on by every lookup):
/// the buckets concatenated in key order cover exactly `[MinKey, MaxKey)`,
/// every bucket is non-empty, and every chunk lives in exactly one bucket.
#[derive(Debug, Clone, Default)]
pub struct TopIndex {
    buckets: BTreeMap<EncodedKey, Arc<ChunkMap>>,
}

impl TopIndex {
    /// Partitions a fully-assembled chunk map into buckets of at most
    /// `bucket_size` chunks.
    ///
    /// Iterates from the largest key downward so the first (smallest-key)
    /// bucket is the partially-filled one; split boundaries then stay
    /// stable as later updates grow the map.
    #[must_use]
    pub fn from_sorted(chunks: &ChunkMap, bucket_size: u32) -> Self {
        let mut buckets = BTreeMap::new();
        let mut current = ChunkMap::new();
        let mut current_key: Option<EncodedKey> = None;

        for (key, chunk) in chunks.iter().rev() {
            if current_key.is_none() {
                // Largest key in this bucket becomes the top-index key.
                current_key = Some(key.clone());
            }
            current.insert(key.clone(), Arc::clone(chunk));
            if current.len() == bucket_size as usize {
                if let Some(top_key) = current_key.take() {
                    buckets.insert(top_key, Arc::new(std::mem::take(&mut current)));
                }
            }
        }
        if let Some(top_key) = current_key {
            buckets.insert(top_key, Arc::new(current));
        }

        Self { buckets }
    }

    /// Rebuilds a top index from an existing bucket map (used by
    /// copy-on-write updates).
    #[must_use]
    pub const fn from_buckets(buckets: BTreeMap<EncodedKey, Arc<ChunkMap>>) -> Self {
        Self { buckets }
    }

    /// Read access to the bucket map.
    #[must_use]
    pub const fn buckets(&self) -> &BTreeMap<EncodedKey, Arc<ChunkMap>> {
        &self.buckets
    }

    /// Two-level upper-bound probe: the chunk whose `[min, max)` can
    /// contain `key` (the first chunk with encoded max strictly above
    /// `key`, in the first bucket with last-max strictly above `key`).
    ///
    /// Returns `None` only when `key` is at or above the top of the
    /// keyspace, which a covering index never produces for a real key.
    #[must_use]
    pub fn lookup(&self, key: &EncodedKey) -> Option<&Arc<Chunk>> {
        let (_, bucket) = self
            .buckets
            .range((Excluded(key.clone()), Unbounded))
            .next()?;
        bucket
            .range((Excluded(key.clone()), Unbounded))
            .next()
            .map(|(_, chunk)| chunk)
    }

    /// Visits every chunk that may overlap `[min, max]`, both bounds
    /// inclusive, in key order. The visitor returns false to stop early.
    ///
    /// At both levels the walk yields entries strictly above `min` and
    /// stops only after yielding the first entry whose key is above `max`
    /// (that entry is the one containing `max`).
    pub fn visit_overlapping<F>(&self, min: &EncodedKey, max: &EncodedKey, mut visit: F)
    where
        F: FnMut(&Arc<Chunk>) -> bool,
    {
        for (top_key, bucket) in self.buckets.range((Excluded(min.clone()), Unbounded)) {
            for (chunk_key, chunk) in bucket.range((Excluded(min.clone()), Unbounded)) {
                if !visit(chunk) {
                    return;
                }
                if chunk_key > max {
                    return;
                }
            }
            if top_key > max {
                return;
            }
        }
    }

    /// Iterates all chunks in key order across buckets.
    pub fn iter_chunks(&self) -> impl Iterator<Item = &Arc<Chunk>> {
        self.buckets.values().flat_map(|bucket| bucket.values())
    }

    /// Total number of chunks across buckets.
    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.len()).sum()
    }

    /// Number of buckets.
    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// The first chunk in key order.
    #[must_use]
    pub fn first_chunk(&self) -> Option<&Arc<Chunk>> {
        self.buckets
            .values()
            .next()
            .and_then(|bucket| bucket.values().next())
    }

    /// The last chunk in key order.
    #[must_use]
    pub fn last_chunk(&self) -> Option<&Arc<Chunk>> {
        self.buckets
            .values()
            .next_back()
            .and_then(|bucket| bucket.values().next_back())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::KeyOrdering;
    use crate::key::{Direction, KeyDocument, KeyValue};
    use strata_core::{ChunkVersion, Epoch, ShardId};

    fn ordering() -> KeyOrdering {
        KeyOrdering::new(vec![Direction::Ascending])
    }

    fn doc(v: KeyValue) -> KeyDocument {
        KeyDocument::from_pairs([("k", v)])
    }

    fn chunk_map(bounds: &[KeyValue]) -> ChunkMap {
        // bounds = [b0, b1, .., bn] produces chunks [b0,b1), [b1,b2), ...
        let ord = ordering();
        let epoch = Epoch::new(1);
        let mut map = ChunkMap::new();
        for (i, pair) in bounds.windows(2).enumerate() {
            let min = doc(pair[0].clone());
            let max = doc(pair[1].clone());
            let key = ord.encode(&max).unwrap();
            #[allow(clippy::cast_possible_truncation)]
            let version = ChunkVersion::new(1, i as u32, epoch);
            map.insert(
                key,
                Arc::new(Chunk::new(min, max, ShardId::new(format!("s{i}")), version)),
            );
        }
        map
    }

    fn bounds(n: i64) -> Vec<KeyValue> {
        let mut out = vec![KeyValue::MinKey];
        out.extend((1..n).map(|i| KeyValue::Int(i * 10)));
        out.push(KeyValue::MaxKey);
        out
    }

    #[test]
    fn test_partition_fills_first_bucket_last() {
        // 7 chunks, bucket size 3: buckets of 1, 3, 3 from the bottom up.
        let map = chunk_map(&bounds(7));
        let top = TopIndex::from_sorted(&map, 3);
        assert_eq!(top.num_chunks(), 7);
        assert_eq!(top.num_buckets(), 3);
        let sizes: Vec<usize> = top.buckets().values().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![1, 3, 3]);
    }

    #[test]
    fn test_bucket_keys_are_last_chunk_max() {
        let map = chunk_map(&bounds(7));
        let top = TopIndex::from_sorted(&map, 3);
        let ord = ordering();
        for (top_key, bucket) in top.buckets() {
            let (last_key, last_chunk) = bucket.iter().next_back().unwrap();
            assert_eq!(top_key, last_key);
            assert_eq!(&ord.encode(last_chunk.max()).unwrap(), top_key);
        }
    }

    #[test]
    fn test_lookup_finds_containing_chunk() {
        let map = chunk_map(&bounds(7));
        let top = TopIndex::from_sorted(&map, 3);
        let ord = ordering();

        for (probe, want_min) in [
            (KeyValue::Int(-5), KeyValue::MinKey),
            (KeyValue::Int(0), KeyValue::MinKey),
            (KeyValue::Int(9), KeyValue::MinKey),
            (KeyValue::Int(10), KeyValue::Int(10)),
            (KeyValue::Int(35), KeyValue::Int(30)),
            (KeyValue::Int(60), KeyValue::Int(60)),
            (KeyValue::Int(1_000_000), KeyValue::Int(60)),
        ] {
            let enc = ord.encode(&doc(probe.clone())).unwrap();
            let chunk = top.lookup(&enc).unwrap();
            assert_eq!(
                chunk.min(),
                &doc(want_min.clone()),
                "probe {probe} landed in {chunk}"
            );
        }
    }

    #[test]
    fn test_visit_overlapping_inclusive_bounds() {
        let map = chunk_map(&bounds(7));
        let top = TopIndex::from_sorted(&map, 3);
        let ord = ordering();

        // [15, 30] overlaps [10,20) and [20,30), and the inclusive max
        // bound pulls in [30,40) which contains 30.
        let min = ord.encode(&doc(KeyValue::Int(15))).unwrap();
        let max = ord.encode(&doc(KeyValue::Int(30))).unwrap();
        let mut mins = Vec::new();
        top.visit_overlapping(&min, &max, |chunk| {
            mins.push(chunk.min().clone());
            true
        });
        assert_eq!(
            mins,
            vec![
                doc(KeyValue::Int(10)),
                doc(KeyValue::Int(20)),
                doc(KeyValue::Int(30)),
            ]
        );
    }

    #[test]
    fn test_visit_overlapping_early_stop() {
        let map = chunk_map(&bounds(7));
        let top = TopIndex::from_sorted(&map, 3);
        let ord = ordering();
        let min = ord.encode(&doc(KeyValue::MinKey)).unwrap();
        let max = ord.encode(&doc(KeyValue::MaxKey)).unwrap();
        let mut seen = 0;
        top.visit_overlapping(&min, &max, |_| {
            seen += 1;
            seen < 2
        });
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_first_and_last_chunk() {
        let map = chunk_map(&bounds(7));
        let top = TopIndex::from_sorted(&map, 3);
        assert!(top.first_chunk().unwrap().min().is_all_min_key());
        assert!(top.last_chunk().unwrap().max().is_all_max_key());
    }
}
