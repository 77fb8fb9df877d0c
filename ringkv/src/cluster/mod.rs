//! Sharded backend.
//!
//! Every node runs a [`ClusterDatabase`] over the same fixed node list. Keys
//! are assigned to nodes by a [`HashRing`]; commands for keys owned by
//! another node are relayed over a pooled [`Client`] connection and the
//! peer's reply is returned unchanged.

pub mod pool;
pub mod ring;
mod router;

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, future::join_all};
use tracing::{error, info, warn};

pub use pool::{Manager, Pool, PoolError, Pooled};
pub use ring::HashRing;

use crate::{
    client::Client,
    command::CommandRegistry,
    config::Config,
    database::{Database, StandaloneDatabase, panic_message},
    protocol::{CmdLine, Reply},
    session::Session,
};

/// Opens [`Client`] connections to one peer.
pub struct PeerManager {
    addr: String,
}

impl PeerManager {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Manager for PeerManager {
    type Conn = Client;

    async fn connect(&self) -> Result<Client> {
        let mut client = Client::connect(&self.addr).await?;
        let handshake = [Bytes::from_static(router::PEER_COMMAND.as_bytes())];
        match client.send(&handshake).await? {
            Reply::Error(message) => Err(anyhow::anyhow!(
                "{} refused the peer handshake: {message}",
                self.addr
            )),
            _ => Ok(client),
        }
    }

    fn is_broken(&self, conn: &Client) -> bool {
        conn.is_broken()
    }
}

pub struct ClusterDatabase {
    self_id: String,
    nodes: Vec<String>,
    ring: HashRing,
    peers: HashMap<String, Pool<PeerManager>>,
    local: Arc<StandaloneDatabase>,
}

impl ClusterDatabase {
    /// Opens the local backend (replaying its log if enabled) and builds the
    /// ring from `config.self_id` and `config.peers`.
    pub async fn open(config: &Config, registry: Arc<CommandRegistry>) -> Result<Self> {
        let local = StandaloneDatabase::open(config, registry).await?;
        Ok(Self::new(config, Arc::new(local)))
    }

    pub fn new(config: &Config, local: Arc<StandaloneDatabase>) -> Self {
        let mut nodes: Vec<String> = Vec::with_capacity(config.peers.len() + 1);
        for peer in &config.peers {
            if !peer.is_empty() && *peer != config.self_id && !nodes.contains(peer) {
                nodes.push(peer.clone());
            }
        }
        nodes.push(config.self_id.clone());

        let mut ring = HashRing::new();
        ring.add_nodes(nodes.iter().cloned());

        let peers = nodes
            .iter()
            .filter(|node| **node != config.self_id)
            .map(|node| {
                let pool = Pool::new(
                    PeerManager::new(node.clone()),
                    config.peer_pool_size,
                    config.peer_borrow_timeout(),
                );
                (node.clone(), pool)
            })
            .collect();

        info!(self_id = %config.self_id, nodes = ?nodes, "cluster ring built");
        Self {
            self_id: config.self_id.clone(),
            nodes,
            ring,
            peers,
            local,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Node that owns `key`.
    pub fn owner_of(&self, key: &[u8]) -> &str {
        self.ring.pick_node(key).unwrap_or(&self.self_id)
    }

    /// Executes `line` on `node`: locally when it is this node, otherwise
    /// over a pooled peer connection positioned at the session's database.
    async fn relay(&self, node: &str, session: &Session, line: CmdLine) -> Reply {
        if node == self.self_id {
            return self.local.execute(session, line).await;
        }
        match self.relay_remote(node, session, &line).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(peer = node, error = %format!("{err:#}"), "relay failed");
                Reply::error(format!("ERR relay failed: {err:#}"))
            }
        }
    }

    async fn relay_remote(&self, node: &str, session: &Session, line: &[Bytes]) -> Result<Reply> {
        let pool = self
            .peers
            .get(node)
            .ok_or_else(|| anyhow::anyhow!("no connection pool for {node}"))?;
        let mut client = pool.get().await?;

        let select = [
            Bytes::from_static(b"SELECT"),
            Bytes::from(session.db_index().to_string()),
        ];
        let selected = client.send(&select).await?;
        if selected.is_error() {
            return Ok(selected);
        }
        client.send(line).await
    }

    /// Sends `line` to every node concurrently. Replies come back in node
    /// order.
    async fn broadcast(&self, session: &Session, line: &CmdLine) -> Vec<(&str, Reply)> {
        let relays = self
            .nodes
            .iter()
            .map(|node| async move { (node.as_str(), self.relay(node, session, line.clone()).await) });
        join_all(relays).await
    }
}

#[async_trait]
impl Database for ClusterDatabase {
    async fn exec(&self, session: &Session, line: CmdLine) -> Reply {
        let command = line
            .first()
            .map(|name| String::from_utf8_lossy(name).to_ascii_lowercase())
            .unwrap_or_default();
        match AssertUnwindSafe(router::route(self, session, line))
            .catch_unwind()
            .await
        {
            Ok(reply) => reply,
            Err(panic) => {
                error!(
                    session = session.id(),
                    command = %command,
                    panic = %panic_message(panic.as_ref()),
                    "cluster command panicked"
                );
                Reply::unknown_error()
            }
        }
    }

    async fn after_client_close(&self, session: &Session) {
        self.local.after_client_close(session).await;
    }

    async fn close(&self) {
        for pool in self.peers.values() {
            pool.close();
        }
        self.local.close().await;
    }
}
