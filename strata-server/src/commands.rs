//! Admin command surface.
//!
//! Commands run against the catalogue cache and answer JSON documents; the
//! registry dispatches by name, records per-command latency detail and
//! counts failures. Unknown names answer `CommandNotFound` so the dispatch
//! layer can reply without a lookup of its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use strata_catalog::CatalogCache;
use strata_core::{Error, Namespace, Result};
use strata_routing::{Collation, Filter};
use strata_stats::{DetailCounter, DetailRegistry, DetailReport};

use crate::config::RouterConfig;

/// Shared state every command runs against.
pub struct CommandContext {
    /// The catalogue cache serving routing snapshots.
    pub catalog: Arc<dyn CatalogCache>,
}

/// One admin command.
#[async_trait]
pub trait AdminCommand: Send + Sync {
    /// The command name clients invoke.
    fn name(&self) -> &'static str;

    /// One-line help text.
    fn help(&self) -> &'static str;

    /// Executes the command.
    async fn run(&self, ctx: &CommandContext, args: Value) -> Result<Value>;
}

/// Name-keyed command registry with per-command detail counters.
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn AdminCommand>>,
    details: DetailRegistry,
    slow_threshold_ms: u64,
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            commands: HashMap::new(),
            details: DetailRegistry::new(),
            slow_threshold_ms: config.slow_command_threshold_ms,
        }
    }

    /// Creates a registry with the built-in commands registered.
    #[must_use]
    pub fn with_default_commands(config: &RouterConfig) -> Self {
        let mut registry = Self::new(config);
        registry.register(Arc::new(DumpChunksCommand));
        registry.register(Arc::new(ShardInfoCommand));
        registry
    }

    /// Registers a command and its detail counter.
    pub fn register(&mut self, command: Arc<dyn AdminCommand>) {
        self.details
            .register(Arc::new(DetailCounter::new(command.name())));
        self.commands.insert(command.name(), command);
    }

    /// Dispatches `name` with `args`, recording latency and failures.
    ///
    /// # Errors
    ///
    /// `CommandNotFound` for unknown names; otherwise whatever the command
    /// returns.
    pub async fn run(&self, ctx: &CommandContext, name: &str, args: Value) -> Result<Value> {
        let Some(command) = self.commands.get(name) else {
            return Err(Error::CommandNotFound {
                name: name.to_string(),
            });
        };

        let started = Instant::now();
        let result = command.run(ctx, args).await;
        let elapsed = started.elapsed();

        if let Some(counter) = self.details.get(name) {
            let latency_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
            counter.record_latency(latency_us);
            if result.is_err() {
                counter.got_failure();
            }
        }
        if u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX) > self.slow_threshold_ms {
            strata_stats::global().got_command_slow();
        }
        result
    }

    /// Per-command latency and failure detail.
    #[must_use]
    pub fn detail_report(&self) -> Vec<DetailReport> {
        self.details.report()
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|err| Error::InvalidArgument {
        name: "args",
        reason: err.to_string(),
    })
}

// -----------------------------------------------------------------------------
// dumpChunks
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DumpChunksRequest {
    ns: String,
    #[serde(default)]
    start: usize,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    print: bool,
}

/// Streams a page of the in-memory chunk view plus the total chunk count,
/// to audit that routing agrees with the catalogue. A page starting at
/// offset zero forces a refresh first.
pub struct DumpChunksCommand;

#[async_trait]
impl AdminCommand for DumpChunksCommand {
    fn name(&self) -> &'static str {
        "dumpChunks"
    }

    fn help(&self) -> &'static str {
        "dump chunks of one collection from this router's memory"
    }

    async fn run(&self, ctx: &CommandContext, args: Value) -> Result<Value> {
        let request: DumpChunksRequest = parse_args(args)?;
        let ns = Namespace::new(request.ns);
        debug!(ns = %ns, start = request.start, limit = request.limit, "dumpChunks");

        // Audits start from offset zero; refresh so the page reflects the
        // catalogue. Later pages read the same published snapshot.
        let force_refresh = request.start == 0;
        let info = ctx.catalog.routing_info(&ns, force_refresh).await?;
        let table = info.table(&ns)?;

        if request.print {
            table.dump();
        }

        let cursor = table.iterator_chunks(request.start, request.limit);
        let chunks: Vec<Value> = cursor
            .chunks
            .iter()
            .map(|chunk| {
                json!({
                    "min": chunk.min.to_string(),
                    "max": chunk.max.to_string(),
                    "shard": chunk.shard.to_string(),
                })
            })
            .collect();
        Ok(json!({
            "chunks": chunks,
            "chunksSize": cursor.total,
        }))
    }
}

// -----------------------------------------------------------------------------
// getShardInfoWithQuery
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ShardInfoRequest {
    find: String,
    #[serde(default)]
    filter: Option<Filter>,
    #[serde(default)]
    collation: Option<Collation>,
    #[serde(default)]
    print: bool,
}

/// Answers the shard set a find-style query would target, without running
/// it. Unsharded namespaces answer their primary shard.
pub struct ShardInfoCommand;

#[async_trait]
impl AdminCommand for ShardInfoCommand {
    fn name(&self) -> &'static str {
        "getShardInfoWithQuery"
    }

    fn help(&self) -> &'static str {
        "report the shard set a query would target, without executing it"
    }

    async fn run(&self, ctx: &CommandContext, args: Value) -> Result<Value> {
        let request: ShardInfoRequest = parse_args(args)?;
        let ns = Namespace::new(request.find);
        if !ns.is_valid() {
            return Err(Error::InvalidArgument {
                name: "find",
                reason: format!("'{ns}' is not a qualified namespace"),
            });
        }

        let filter = request.filter.unwrap_or_else(|| Filter::And(Vec::new()));
        let info = ctx.catalog.routing_info(&ns, false).await?;

        let mut shards = std::collections::BTreeSet::new();
        if let Some(table) = &info.table {
            if request.print {
                info!(ns = %ns, version = %table.version(), "targeting against routing table");
            }
            table.shard_ids_for_query(&filter, request.collation.as_ref(), &mut shards)?;
        } else if let Some(primary) = &info.primary {
            if request.print {
                info!(ns = %ns, primary = %primary, "unsharded namespace");
            }
            shards.insert(primary.clone());
        }

        if shards.len() == 1 {
            strata_stats::global().got_read_single();
        } else {
            strata_stats::global().got_read_scatter();
        }

        let shard_docs: Vec<Value> = shards
            .iter()
            .filter(|shard| shard.is_valid())
            .map(|shard| json!({ "shardName": shard.to_string() }))
            .collect();
        Ok(json!({ "shards": shard_docs }))
    }
}
