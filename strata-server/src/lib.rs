//! Strata Server - the routing tier's operational surface.
//!
//! Wires the catalogue cache, refresher and counters together and exposes
//! the admin commands operators use to audit routing: dump the in-memory
//! chunk view, and ask which shards a query would target without running
//! it. The command-dispatch network layer lives outside this crate; the
//! registry here is its backend.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod config;

pub use commands::{
    AdminCommand, CommandContext, CommandRegistry, DumpChunksCommand, ShardInfoCommand,
};
pub use config::RouterConfig;
