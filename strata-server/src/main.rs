//! Strata routing-tier server binary.
//!
//! Wires the catalogue cache, background refresher and admin command
//! registry together. The demo wiring seeds an in-memory catalogue so the
//! server has routing state to serve; production deployments plug a real
//! config-store client into the same boundaries.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use strata_catalog::{
    CatalogCache, ChunkDoc, CollectionCache, CollectionEntry, ConfigStore, MemberState,
    MemoryConfigStore, PeriodicRunner, RoutingRefresh, SharedRole,
};
use strata_core::{ChunkVersion, Epoch, Namespace, ShardId};
use strata_flow::CountLimiter;
use strata_routing::{KeyDocument, KeyValue, ShardKeyPattern};
use strata_server::{CommandContext, CommandRegistry, RouterConfig};

/// Strata routing-tier server.
#[derive(Parser, Debug)]
#[command(name = "strata-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Start as a replica secondary (secondaries run the auto-refresher).
    #[arg(long, default_value_t = true)]
    secondary: bool,
}

fn seed_catalog(store: &MemoryConfigStore) -> Namespace {
    let ns = Namespace::new("demo.orders");
    let epoch = Epoch::new(1);
    store.upsert_collection(CollectionEntry {
        ns: ns.clone(),
        shard_key: ShardKeyPattern::ascending("order_id"),
        default_collation: None,
        unique: false,
        epoch,
    });
    store.set_chunks(
        &ns,
        vec![
            ChunkDoc {
                ns: ns.clone(),
                min: KeyDocument::from_pairs([("order_id", KeyValue::MinKey)]),
                max: KeyDocument::from_pairs([("order_id", KeyValue::Int(1_000))]),
                shard: ShardId::new("shard-a"),
                version: ChunkVersion::new(1, 0, epoch),
            },
            ChunkDoc {
                ns: ns.clone(),
                min: KeyDocument::from_pairs([("order_id", KeyValue::Int(1_000))]),
                max: KeyDocument::from_pairs([("order_id", KeyValue::MaxKey)]),
                shard: ShardId::new("shard-b"),
                version: ChunkVersion::new(1, 1, epoch),
            },
        ],
    );
    ns
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RouterConfig::new();
    let store = Arc::new(MemoryConfigStore::new());
    let ns = seed_catalog(&store);

    let catalog: Arc<CollectionCache> = Arc::new(CollectionCache::new(
        Arc::clone(&store) as Arc<dyn ConfigStore>,
        CountLimiter::shared(config.limits.max_concurrent_refreshes),
        config.limits,
    ));

    let state = if args.secondary {
        MemberState::Secondary
    } else {
        MemberState::Primary
    };
    let role = Arc::new(SharedRole::new(state));
    let refresher = Arc::new(RoutingRefresh::new(
        Arc::clone(&catalog) as Arc<dyn CatalogCache>,
        role,
        config.limits,
    ));
    let runner = PeriodicRunner::spawn(
        refresher,
        Duration::from_secs(config.limits.scheduler_period_secs),
    );

    let registry = CommandRegistry::with_default_commands(&config);
    let ctx = CommandContext {
        catalog: Arc::clone(&catalog) as Arc<dyn CatalogCache>,
    };

    match registry
        .run(
            &ctx,
            "dumpChunks",
            json!({ "ns": ns.to_string(), "start": 0, "limit": 10 }),
        )
        .await
    {
        Ok(response) => info!(ns = %ns, %response, "routing view"),
        Err(err) => info!(ns = %ns, error = %err, "routing view unavailable"),
    }
    info!(counters = ?strata_stats::global().report(), "event counters");

    info!("strata-server running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    runner.shutdown().await;
    Ok(())
}
