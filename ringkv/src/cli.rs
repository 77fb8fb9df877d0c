use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a node, standalone or as a cluster member.
    Serve(ServeArgs),
    /// Send one command to a node and print the reply.
    Call(CallArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// JSON configuration file. Flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind to.
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Number of databases.
    #[arg(long)]
    pub databases: Option<usize>,

    /// Record write commands to the append-only file and replay it on start.
    #[arg(long)]
    pub append_only: bool,

    /// Path of the append-only file.
    #[arg(long)]
    pub append_filename: Option<String>,

    /// This node's address as listed by its peers. Enables cluster mode
    /// together with --peer.
    #[arg(long = "self")]
    pub self_id: Option<String>,

    /// Address of another cluster node. Repeat for each peer.
    #[arg(long = "peer")]
    pub peers: Vec<String>,
}

impl ServeArgs {
    /// Defaults, then the config file, then flags.
    pub fn resolve(&self) -> Result<Config> {
        let base = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };
        Ok(self.apply(base))
    }

    fn apply(&self, mut config: Config) -> Config {
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(databases) = self.databases {
            config.databases = databases;
        }
        if self.append_only {
            config.append_only = true;
        }
        if let Some(filename) = &self.append_filename {
            config.append_filename = filename.clone();
        }
        if let Some(self_id) = &self.self_id {
            config.self_id = self_id.clone();
        }
        if !self.peers.is_empty() {
            config.peers = self.peers.clone();
        }
        config.normalized()
    }
}

#[derive(Args, Debug, Clone)]
pub struct CallArgs {
    /// Node to connect to.
    #[arg(long, default_value = "127.0.0.1:6399")]
    pub server: String,

    /// Database to select before sending the command.
    #[arg(long, short = 'n', default_value_t = 0)]
    pub db: usize,

    /// Command name followed by its arguments.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"port": 7000, "databases": 4, "peers": ["a:1"]}"#)
            .unwrap();

        let cli = Cli::parse_from([
            "ringkv",
            "serve",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "7100",
            "--self",
            "127.0.0.1:7100",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.port, 7100);
        assert_eq!(config.databases, 4);
        assert_eq!(config.peers, vec!["a:1".to_string()]);
        assert!(config.is_cluster());
    }

    #[test]
    fn call_collects_trailing_arguments() {
        let cli = Cli::parse_from(["ringkv", "call", "-n", "2", "set", "k", "-1"]);
        let Command::Call(args) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(args.db, 2);
        assert_eq!(args.command, vec!["set", "k", "-1"]);
    }
}
