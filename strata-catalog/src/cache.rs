//! Per-collection routing snapshot cache.
//!
//! Holds one immutable `RoutingTable` per sharded collection behind an
//! atomic publish point. Readers clone the current `Arc` and target against
//! that snapshot for the whole request. Refreshes are single-flight per
//! namespace: concurrent requests for the same collection wait on the one
//! in-flight pull and adopt its result. Across namespaces, refresh
//! admission is bounded by a limiter; refused refreshes serve the stale
//! snapshot rather than queueing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use strata_core::{Error, Limits, Namespace, Result, ShardId};
use strata_flow::{Limiter, Permit};
use strata_routing::{Chunk, RoutingTable, TableBuilder};

use crate::store::{ChunkDoc, ConfigStore};

/// What the cache knows about one namespace: the routing table when the
/// collection is sharded, otherwise the primary shard owning it whole.
#[derive(Debug, Clone)]
pub struct RoutingInfo {
    /// Routing snapshot; `None` for unsharded namespaces.
    pub table: Option<Arc<RoutingTable>>,
    /// Primary shard for unsharded namespaces.
    pub primary: Option<ShardId>,
}

impl RoutingInfo {
    /// Returns the routing table, failing for unsharded namespaces.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` when the namespace has no routing table.
    pub fn table(&self, ns: &Namespace) -> Result<Arc<RoutingTable>> {
        self.table
            .clone()
            .ok_or_else(|| Error::NamespaceNotFound {
                ns: ns.to_string(),
            })
    }
}

/// The catalogue cache consumed by the routing core.
#[async_trait]
pub trait CatalogCache: Send + Sync {
    /// Lists every currently-sharded collection namespace.
    async fn list_sharded_collections(&self) -> Result<Vec<Namespace>>;

    /// Returns routing info for `ns`. With `force_refresh` the upstream is
    /// asked for the latest chunk deltas before answering.
    async fn routing_info(&self, ns: &Namespace, force_refresh: bool) -> Result<RoutingInfo>;
}

/// Cache state of one namespace.
#[derive(Debug, Default)]
struct NsEntry {
    /// Serialises refreshes of this namespace: single-flight.
    refresh: tokio::sync::Mutex<()>,
    /// The published snapshot. Writers swap the `Arc`; readers clone it.
    current: RwLock<Option<Arc<RoutingTable>>>,
}

impl NsEntry {
    fn snapshot(&self) -> Option<Arc<RoutingTable>> {
        self.current.read().ok().and_then(|table| table.clone())
    }

    fn publish(&self, table: Arc<RoutingTable>) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(table);
        }
    }
}

/// The production catalogue cache.
pub struct CollectionCache {
    store: Arc<dyn ConfigStore>,
    refresh_limiter: Arc<dyn Limiter>,
    limits: Limits,
    entries: Mutex<HashMap<Namespace, Arc<NsEntry>>>,
}

impl CollectionCache {
    /// Creates a cache over `store`, bounding concurrent refreshes with
    /// `refresh_limiter`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConfigStore>,
        refresh_limiter: Arc<dyn Limiter>,
        limits: Limits,
    ) -> Self {
        Self {
            store,
            refresh_limiter,
            limits,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, ns: &Namespace) -> Arc<NsEntry> {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(entries.entry(ns.clone()).or_default())
    }

    /// The currently-published snapshot of `ns`, if any. No refresh.
    #[must_use]
    pub fn current(&self, ns: &Namespace) -> Option<Arc<RoutingTable>> {
        self.entry(ns).snapshot()
    }

    async fn with_deadline<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>> + Send,
    {
        let deadline = Duration::from_millis(self.limits.catalog_timeout_ms);
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation,
                waited_ms: self.limits.catalog_timeout_ms,
            }),
        }
    }

    /// Full (cold) load: collection entry plus the complete chunk set.
    async fn cold_load(&self, ns: &Namespace) -> Result<RoutingInfo> {
        let collections = self
            .with_deadline("load_sharded_collections", self.store.load_sharded_collections())
            .await?;
        let Some(collection) = collections.into_iter().find(|entry| &entry.ns == ns) else {
            // Not sharded: route whole-namespace to the primary shard.
            let primary = self
                .with_deadline("primary_shard", self.store.primary_shard(ns))
                .await?;
            return match primary {
                Some(shard) => Ok(RoutingInfo {
                    table: None,
                    primary: Some(shard),
                }),
                None => Err(Error::NamespaceNotFound {
                    ns: ns.to_string(),
                }),
            };
        };

        let chunks = self
            .with_deadline("load_chunks", self.store.load_chunks(ns, None))
            .await?;
        let chunks = into_chunks(chunks);
        let table = TableBuilder::new(
            collection.ns,
            collection.shard_key,
            collection.default_collation,
            collection.unique,
            collection.epoch,
        )
        .with_bucket_size(self.limits.max_chunks_per_bucket)
        .build(&chunks)?;
        info!(ns = %ns, chunks = table.num_chunks(), version = %table.version(), "built routing table from full chunk set");
        Ok(RoutingInfo {
            table: Some(Arc::new(table)),
            primary: None,
        })
    }

    /// Warm refresh: incremental delta applied onto `prev`. An epoch change
    /// surfaces as a conflict and falls back to a full rebuild.
    async fn warm_refresh(
        &self,
        ns: &Namespace,
        prev: &Arc<RoutingTable>,
    ) -> Result<RoutingInfo> {
        let chunks = self
            .with_deadline("load_chunks", self.store.load_chunks(ns, Some(prev.version())))
            .await?;
        if chunks.is_empty() {
            debug!(ns = %ns, version = %prev.version(), "routing table already current");
            return Ok(RoutingInfo {
                table: Some(Arc::clone(prev)),
                primary: None,
            });
        }

        let chunks = into_chunks(chunks);
        match prev.make_updated(&chunks) {
            Ok(table) => {
                debug!(ns = %ns, changed = chunks.len(), version = %table.version(), "applied chunk delta");
                Ok(RoutingInfo {
                    table: Some(Arc::new(table)),
                    primary: None,
                })
            }
            Err(Error::ConflictingOperationInProgress { reason }) => {
                // Epoch changed (drop-and-recreate): all prior routing
                // state is invalid.
                warn!(ns = %ns, reason = %reason, "chunk delta conflicts; rebuilding from scratch");
                self.cold_load(ns).await
            }
            Err(err) => Err(err),
        }
    }

    async fn refresh(&self, ns: &Namespace, entry: &NsEntry) -> Result<RoutingInfo> {
        let info = match entry.snapshot() {
            Some(prev) => self.warm_refresh(ns, &prev).await?,
            None => self.cold_load(ns).await?,
        };
        if let Some(table) = &info.table {
            entry.publish(Arc::clone(table));
        }
        Ok(info)
    }
}

#[async_trait]
impl CatalogCache for CollectionCache {
    async fn list_sharded_collections(&self) -> Result<Vec<Namespace>> {
        let collections = self
            .with_deadline("load_sharded_collections", self.store.load_sharded_collections())
            .await?;
        Ok(collections.into_iter().map(|entry| entry.ns).collect())
    }

    async fn routing_info(&self, ns: &Namespace, force_refresh: bool) -> Result<RoutingInfo> {
        let entry = self.entry(ns);

        let observed = entry.snapshot();
        if !force_refresh {
            if let Some(table) = &observed {
                return Ok(RoutingInfo {
                    table: Some(Arc::clone(table)),
                    primary: None,
                });
            }
        }

        // Single-flight: one refresh per namespace at a time.
        let _flight = entry.refresh.lock().await;

        // Someone else refreshed while we waited for the flight; their
        // result satisfies this request.
        let current = entry.snapshot();
        let observed_seq = observed.as_ref().map(|table| table.sequence());
        if let Some(table) = &current {
            if observed_seq.map_or(true, |seq| table.sequence() > seq) {
                return Ok(RoutingInfo {
                    table: Some(Arc::clone(table)),
                    primary: None,
                });
            }
        }

        let Some(_permit) = Permit::try_acquire(&self.refresh_limiter) else {
            strata_stats::global().got_refresh_refused();
            // Stale routing is tolerated; shards reject and re-trigger.
            return match current {
                Some(table) => {
                    warn!(ns = %ns, "refresh admission refused; serving current snapshot");
                    Ok(RoutingInfo {
                        table: Some(table),
                        primary: None,
                    })
                }
                None => Err(Error::ConflictingOperationInProgress {
                    reason: format!("too many routing refreshes in flight, none cached for {ns}"),
                }),
            };
        };

        self.refresh(ns, &entry).await
    }
}

fn into_chunks(docs: Vec<ChunkDoc>) -> Vec<Chunk> {
    docs.into_iter().map(ChunkDoc::into_chunk).collect()
}
