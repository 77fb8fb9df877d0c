//! Sharded in-memory key-value server speaking a Redis-style protocol.
//!
//! Each module owns one concern:
//!
//! - [`protocol`] frames requests, replies and the persistence log.
//! - [`keyspace`] stores values in concurrent per-database maps.
//! - [`command`] maps command names to handlers and checks arity.
//! - [`database`] runs commands against numbered keyspaces and records
//!   writes through [`aof`].
//! - [`cluster`] routes keys across a fixed node set with a hash ring and
//!   relays over pooled [`client`] connections.
//! - [`server`] accepts TCP connections and drives one [`session`] each.
//! - [`config`] and [`cli`] assemble settings from a JSON file and flags.
//!
//! Integration tests in `tests/` run real servers on ephemeral ports.

pub mod aof;
pub mod cli;
pub mod client;
pub mod cluster;
pub mod command;
pub mod config;
pub mod database;
pub mod keyspace;
pub mod protocol;
pub mod server;
pub mod session;

use std::sync::Arc;

use anyhow::Result;

use crate::{
    cluster::ClusterDatabase,
    command::CommandRegistry,
    config::Config,
    database::{Database, StandaloneDatabase},
};

/// Builds the backend `config` asks for: a cluster node when both `self_id`
/// and `peers` are set, a standalone database otherwise.
pub async fn open_database(config: &Config) -> Result<Arc<dyn Database>> {
    let registry = Arc::new(CommandRegistry::with_builtins());
    if config.is_cluster() {
        Ok(Arc::new(ClusterDatabase::open(config, registry).await?))
    } else {
        Ok(Arc::new(StandaloneDatabase::open(config, registry).await?))
    }
}
