//! The upstream catalogue-metadata boundary.
//!
//! The config store owns all durable sharding state. The cache consumes
//! three queries: the sharded-collection set, chunk documents for one
//! namespace (ordered by version, full or incremental), and the primary
//! shard of unsharded namespaces.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use strata_core::{ChunkVersion, Epoch, Error, Namespace, Result, ShardId};
use strata_routing::{Chunk, Collation, KeyDocument, ShardKeyPattern};

/// One chunk document as the catalogue stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDoc {
    /// The collection this chunk belongs to.
    pub ns: Namespace,
    /// Inclusive lower bound of the chunk.
    pub min: KeyDocument,
    /// Exclusive upper bound of the chunk.
    pub max: KeyDocument,
    /// Owning shard.
    pub shard: ShardId,
    /// Chunk version, `(major, minor, epoch)`.
    pub version: ChunkVersion,
}

impl ChunkDoc {
    /// Converts the document into the routing-index chunk descriptor.
    #[must_use]
    pub fn into_chunk(self) -> Chunk {
        Chunk::new(self.min, self.max, self.shard, self.version)
    }
}

/// Catalogue entry describing one sharded collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionEntry {
    /// The collection namespace.
    pub ns: Namespace,
    /// The shard-key pattern.
    pub shard_key: ShardKeyPattern,
    /// Default collation, when not the simple one.
    pub default_collation: Option<Collation>,
    /// Whether the shard key is enforced unique.
    pub unique: bool,
    /// Current sharding incarnation of the collection.
    pub epoch: Epoch,
}

/// The catalogue-metadata store boundary.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Lists every currently-sharded collection.
    async fn load_sharded_collections(&self) -> Result<Vec<CollectionEntry>>;

    /// Loads chunk documents for `ns`, ordered ascending by chunk version.
    /// With `since = None` the full chunk set is returned (cold load); with
    /// a version, only chunks changed after it (warm incremental refresh).
    /// A store whose chunks carry a different epoch than `since` returns
    /// the full chunk set - versions do not compare across epochs.
    async fn load_chunks(
        &self,
        ns: &Namespace,
        since: Option<ChunkVersion>,
    ) -> Result<Vec<ChunkDoc>>;

    /// The primary shard of an unsharded namespace, `None` when the
    /// namespace is unknown entirely.
    async fn primary_shard(&self, ns: &Namespace) -> Result<Option<ShardId>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<Namespace, CollectionEntry>,
    chunks: HashMap<Namespace, Vec<ChunkDoc>>,
    primaries: HashMap<Namespace, ShardId>,
}

/// In-memory config store, used by tests and the demo wiring.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    state: Mutex<MemoryState>,
}

impl MemoryConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a sharded collection.
    pub fn upsert_collection(&self, entry: CollectionEntry) {
        if let Ok(mut state) = self.state.lock() {
            state.collections.insert(entry.ns.clone(), entry);
        }
    }

    /// Replaces the chunk set of a namespace.
    pub fn set_chunks(&self, ns: &Namespace, chunks: Vec<ChunkDoc>) {
        if let Ok(mut state) = self.state.lock() {
            state.chunks.insert(ns.clone(), chunks);
        }
    }

    /// Appends chunk documents to a namespace (newly split or moved
    /// chunks).
    pub fn push_chunks(&self, ns: &Namespace, chunks: Vec<ChunkDoc>) {
        if let Ok(mut state) = self.state.lock() {
            state.chunks.entry(ns.clone()).or_default().extend(chunks);
        }
    }

    /// Records the primary shard of an unsharded namespace.
    pub fn set_primary(&self, ns: &Namespace, shard: ShardId) {
        if let Ok(mut state) = self.state.lock() {
            state.primaries.insert(ns.clone(), shard);
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load_sharded_collections(&self) -> Result<Vec<CollectionEntry>> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        let mut entries: Vec<CollectionEntry> = state.collections.values().cloned().collect();
        entries.sort_by(|a, b| a.ns.cmp(&b.ns));
        Ok(entries)
    }

    async fn load_chunks(
        &self,
        ns: &Namespace,
        since: Option<ChunkVersion>,
    ) -> Result<Vec<ChunkDoc>> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        let Some(all) = state.chunks.get(ns) else {
            return Err(Error::NamespaceNotFound {
                ns: ns.to_string(),
            });
        };
        let epoch_changed = since.is_some_and(|version| {
            all.iter().any(|doc| doc.version.epoch != version.epoch)
        });
        let mut chunks: Vec<ChunkDoc> = match since {
            Some(version) if !epoch_changed => all
                .iter()
                .filter(|doc| doc.version > version)
                .cloned()
                .collect(),
            _ => all.clone(),
        };
        chunks.sort_by_key(|doc| doc.version);
        Ok(chunks)
    }

    async fn primary_shard(&self, ns: &Namespace) -> Result<Option<ShardId>> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state.primaries.get(ns).cloned())
    }
}

fn poisoned() -> Error {
    Error::InvariantViolation {
        reason: "config store lock poisoned".to_string(),
    }
}
