use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_DATABASES: usize = 16;

/// Server settings. Every field has a default, so a partial JSON file or no
/// file at all is valid.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub databases: usize,
    pub append_only: bool,
    pub append_filename: String,
    /// This node's address as it appears in `peers` of the other nodes.
    pub self_id: String,
    pub peers: Vec<String>,
    pub peer_pool_size: usize,
    pub peer_borrow_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub aof_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 6399,
            databases: DEFAULT_DATABASES,
            append_only: false,
            append_filename: "appendonly.aof".to_string(),
            self_id: String::new(),
            peers: Vec::new(),
            peer_pool_size: 8,
            peer_borrow_timeout_ms: 5_000,
            close_timeout_ms: 10_000,
            aof_queue_size: 1 << 16,
        }
    }
}

impl Config {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        Ok(config.normalized())
    }

    /// Replaces values that would make the server unusable.
    pub fn normalized(mut self) -> Self {
        if self.databases == 0 {
            self.databases = DEFAULT_DATABASES;
        }
        self.peer_pool_size = self.peer_pool_size.max(1);
        self.aof_queue_size = self.aof_queue_size.max(1);
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn is_cluster(&self) -> bool {
        !self.self_id.is_empty() && !self.peers.is_empty()
    }

    pub fn peer_borrow_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_borrow_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
