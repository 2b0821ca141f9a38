//! Background routing refresh on replica secondaries.
//!
//! Every routing server that is currently a read-only replica re-pulls the
//! sharded-collection set periodically and forces a refresh per collection,
//! so secondaries keep warm routing tables without waiting for a stale-
//! version error. The schedule is randomised per member: a uniform startup
//! delay spreads rolling restarts, and a uniform steady-state interval
//! keeps the fleet from refreshing in lockstep against the catalogue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use strata_core::Limits;

use crate::cache::CatalogCache;
use crate::role::ReplicaRole;
use crate::scheduler::PeriodicTask;

/// A refresh slower than this is counted as a slow operation.
const REFRESH_SLOW_THRESHOLD_MS: u128 = 10_000;

/// The routing auto-refresh task.
pub struct RoutingRefresh {
    catalog: Arc<dyn CatalogCache>,
    role: Arc<dyn ReplicaRole>,
    limits: Limits,
    /// Unix seconds of the next tick that does work.
    next_refresh_at: AtomicU64,
}

impl RoutingRefresh {
    /// Creates the task, scheduling its first run a randomised startup
    /// delay from now.
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogCache>, role: Arc<dyn ReplicaRole>, limits: Limits) -> Self {
        let now = unix_now();
        let first = now
            + uniform_jitter(
                now,
                limits.startup_jitter_min_secs,
                limits.startup_jitter_max_secs,
            );
        info!(next_refresh_at = first, "routing auto-refresh scheduled");
        Self {
            catalog,
            role,
            limits,
            next_refresh_at: AtomicU64::new(first),
        }
    }

    /// Forces the next tick to do work (tests and admin triggers).
    pub fn force_due(&self) {
        self.next_refresh_at.store(0, Ordering::Relaxed);
    }

    /// Unix seconds of the next refresh.
    #[must_use]
    pub fn next_refresh_at(&self) -> u64 {
        self.next_refresh_at.load(Ordering::Relaxed)
    }

    /// One full refresh pass. Returns false when the pass aborted before
    /// touching collections (list failure or role flip), in which case the
    /// schedule is left alone so the next tick retries.
    async fn refresh_all(&self) -> bool {
        let namespaces = match self.catalog.list_sharded_collections().await {
            Ok(namespaces) => namespaces,
            Err(err) => {
                // Next tick retries; the cached snapshots stay live.
                warn!(error = %err, "listing sharded collections failed");
                return false;
            }
        };

        // A role flip is possible while the list query ran.
        if !self.role.member_state().is_secondary() {
            return false;
        }

        for ns in namespaces {
            debug!(ns = %ns, "refreshing collection routing");
            let started = Instant::now();
            if let Err(err) = self.catalog.routing_info(&ns, true).await {
                warn!(ns = %ns, error = %err, "collection refresh failed");
            }
            if started.elapsed().as_millis() > REFRESH_SLOW_THRESHOLD_MS {
                strata_stats::global().got_refresh_slow();
            }
        }
        true
    }
}

#[async_trait]
impl PeriodicTask for RoutingRefresh {
    fn name(&self) -> &str {
        "routing-auto-refresh"
    }

    async fn do_work(&self) {
        if !self.role.member_state().is_secondary() {
            return;
        }
        let now = unix_now();
        if now < self.next_refresh_at.load(Ordering::Relaxed) {
            return;
        }

        if !self.refresh_all().await {
            return;
        }

        let next = now
            + uniform_jitter(
                now,
                self.limits.refresh_interval_min_secs,
                self.limits.refresh_interval_max_secs,
            );
        self.next_refresh_at.store(next, Ordering::Relaxed);
        info!(next_refresh_at = next, "routing auto-refresh complete");
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Uniform draw from `[lo, hi]`, freshly seeded from the wall clock. The
/// only requirement is decorrelation across fleet members.
fn uniform_jitter(seed: u64, lo: u64, hi: u64) -> u64 {
    if lo >= hi {
        return lo;
    }
    let mut rng = StdRng::seed_from_u64(seed ^ 0x5174_a7a7_c0ff_ee00);
    rng.gen_range(lo..=hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CollectionCache, RoutingInfo};
    use crate::role::{MemberState, SharedRole};
    use crate::store::{ChunkDoc, CollectionEntry, MemoryConfigStore};
    use strata_core::{ChunkVersion, Epoch, Namespace, ShardId};
    use strata_flow::CountLimiter;
    use strata_routing::{KeyDocument, KeyValue, ShardKeyPattern};

    fn seeded_catalog() -> (Namespace, Arc<MemoryConfigStore>, Arc<CollectionCache>) {
        let ns = Namespace::new("test.orders");
        let epoch = Epoch::new(1);
        let store = Arc::new(MemoryConfigStore::new());
        store.upsert_collection(CollectionEntry {
            ns: ns.clone(),
            shard_key: ShardKeyPattern::ascending("k"),
            default_collation: None,
            unique: false,
            epoch,
        });
        store.set_chunks(
            &ns,
            vec![ChunkDoc {
                ns: ns.clone(),
                min: KeyDocument::from_pairs([("k", KeyValue::MinKey)]),
                max: KeyDocument::from_pairs([("k", KeyValue::MaxKey)]),
                shard: ShardId::new("s0"),
                version: ChunkVersion::new(1, 0, epoch),
            }],
        );
        let cache = Arc::new(CollectionCache::new(
            Arc::clone(&store) as Arc<dyn crate::store::ConfigStore>,
            CountLimiter::shared(4),
            strata_core::Limits::for_testing(),
        ));
        (ns, store, cache)
    }

    #[tokio::test]
    async fn test_secondary_tick_refreshes_collections() {
        let (ns, _store, cache) = seeded_catalog();
        let role = Arc::new(SharedRole::new(MemberState::Secondary));
        let refresher = RoutingRefresh::new(
            Arc::clone(&cache) as Arc<dyn CatalogCache>,
            Arc::clone(&role) as Arc<dyn ReplicaRole>,
            strata_core::Limits::for_testing(),
        );
        refresher.force_due();

        assert!(cache.current(&ns).is_none());
        refresher.do_work().await;
        assert!(cache.current(&ns).is_some());
        // The next refresh is rescheduled into the future or now.
        assert!(refresher.next_refresh_at() > 0);
    }

    #[tokio::test]
    async fn test_primary_tick_skips() {
        let (ns, _store, cache) = seeded_catalog();
        let role = Arc::new(SharedRole::new(MemberState::Primary));
        let refresher = RoutingRefresh::new(
            Arc::clone(&cache) as Arc<dyn CatalogCache>,
            role as Arc<dyn ReplicaRole>,
            strata_core::Limits::for_testing(),
        );
        refresher.force_due();

        refresher.do_work().await;
        assert!(cache.current(&ns).is_none());
    }

    #[tokio::test]
    async fn test_tick_respects_schedule_gate() {
        let (ns, _store, cache) = seeded_catalog();
        let role = Arc::new(SharedRole::new(MemberState::Secondary));
        let mut limits = strata_core::Limits::for_testing();
        // A startup delay far in the future keeps every tick idle.
        limits.startup_jitter_min_secs = 100_000;
        limits.startup_jitter_max_secs = 100_000;
        let refresher = RoutingRefresh::new(
            Arc::clone(&cache) as Arc<dyn CatalogCache>,
            role as Arc<dyn ReplicaRole>,
            limits,
        );

        refresher.do_work().await;
        assert!(cache.current(&ns).is_none());
    }

    #[tokio::test]
    async fn test_failed_list_preserves_schedule_for_retry() {
        // Inject a catalogue whose list query always fails.
        struct FailingCatalog;
        #[async_trait]
        impl CatalogCache for FailingCatalog {
            async fn list_sharded_collections(&self) -> strata_core::Result<Vec<Namespace>> {
                Err(strata_core::Error::Timeout {
                    operation: "load_sharded_collections",
                    waited_ms: 1,
                })
            }
            async fn routing_info(
                &self,
                ns: &Namespace,
                _force_refresh: bool,
            ) -> strata_core::Result<RoutingInfo> {
                Err(strata_core::Error::NamespaceNotFound {
                    ns: ns.to_string(),
                })
            }
        }

        let role = Arc::new(SharedRole::new(MemberState::Secondary));
        let refresher = RoutingRefresh::new(
            Arc::new(FailingCatalog) as Arc<dyn CatalogCache>,
            role as Arc<dyn ReplicaRole>,
            strata_core::Limits::for_testing(),
        );
        refresher.force_due();
        refresher.do_work().await;
        // The schedule did not advance: the next tick retries.
        assert_eq!(refresher.next_refresh_at(), 0);
    }

    #[test]
    fn test_jitter_within_bounds() {
        for seed in 0..64 {
            let value = uniform_jitter(seed, 60, 240);
            assert!((60..=240).contains(&value));
        }
        assert_eq!(uniform_jitter(7, 5, 5), 5);
    }
}
