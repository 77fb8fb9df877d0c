use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{Arc, OnceLock},
};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use tracing::{debug, error, info};

use crate::{
    aof::{self, AofHandler},
    command::CommandRegistry,
    config::Config,
    keyspace::Db,
    protocol::{CmdLine, Reply},
    session::Session,
};

/// Anything that can execute a command line on behalf of a client session.
///
/// Implemented by the single-node [`StandaloneDatabase`] and by the cluster
/// router, which owns a standalone instance for the keys it holds itself.
#[async_trait]
pub trait Database: Send + Sync {
    /// Executes one command. Never fails: problems are reported as error
    /// replies.
    async fn exec(&self, session: &Session, line: CmdLine) -> Reply;

    /// Called once after the connection behind `session` has gone away.
    async fn after_client_close(&self, session: &Session);

    /// Flushes and stops background work. Safe to call more than once.
    async fn close(&self);
}

/// A fixed set of numbered keyspaces sharing one command table.
pub struct StandaloneDatabase {
    dbs: Vec<Db>,
    registry: Arc<CommandRegistry>,
    aof: OnceLock<AofHandler>,
}

impl StandaloneDatabase {
    pub fn new(databases: usize, registry: Arc<CommandRegistry>) -> Self {
        let databases = databases.max(1);
        Self {
            dbs: (0..databases).map(Db::new).collect(),
            registry,
            aof: OnceLock::new(),
        }
    }

    /// Builds the keyspaces and, with `append_only` set, replays the log
    /// before any new record is accepted.
    pub async fn open(config: &Config, registry: Arc<CommandRegistry>) -> Result<Self> {
        let database = Self::new(config.databases, registry);
        if config.append_only {
            let path = std::path::Path::new(&config.append_filename);
            let stats = aof::load(&database, path).await?;
            let handler = AofHandler::open(path, config.aof_queue_size, stats.last_db).await?;
            database.enable_persistence(handler);
        }
        Ok(database)
    }

    /// Starts recording durable commands. Only the first handler is kept.
    pub fn enable_persistence(&self, handler: AofHandler) {
        if let Err(rejected) = self.aof.set(handler) {
            error!(
                path = %rejected.path().display(),
                "append-only log already enabled, ignoring second handler"
            );
        }
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    fn exec_select(&self, session: &Session, line: &[Bytes]) -> Reply {
        if line.len() != 2 {
            return Reply::arg_num_error("select");
        }
        let Some(index) = std::str::from_utf8(&line[1])
            .ok()
            .and_then(|text| text.parse::<i64>().ok())
        else {
            return Reply::error("ERR invalid DB index");
        };
        if index < 0 || index as usize >= self.dbs.len() {
            return Reply::error("ERR DB index out of range");
        }
        session.select_db(index as usize);
        Reply::ok()
    }

    /// Executes `line` without trapping handler panics; callers contain
    /// them. Handles `SELECT` itself and queues durable writes for the log.
    pub(crate) async fn execute(&self, session: &Session, line: CmdLine) -> Reply {
        if line
            .first()
            .is_some_and(|name| name.eq_ignore_ascii_case(b"select"))
        {
            return self.exec_select(session, &line);
        }

        let index = session.db_index();
        let Some(db) = self.dbs.get(index) else {
            return Reply::error("ERR DB index out of range");
        };

        let dispatched = self.registry.dispatch(db, &line);
        if dispatched.durable {
            if let Some(aof) = self.aof.get() {
                aof.append(index, line).await;
            }
        }
        dispatched.reply
    }
}

#[async_trait]
impl Database for StandaloneDatabase {
    async fn exec(&self, session: &Session, line: CmdLine) -> Reply {
        let command = line
            .first()
            .map(|name| String::from_utf8_lossy(name).to_ascii_lowercase())
            .unwrap_or_default();
        match AssertUnwindSafe(self.execute(session, line))
            .catch_unwind()
            .await
        {
            Ok(reply) => reply,
            Err(panic) => {
                error!(
                    session = session.id(),
                    command = %command,
                    panic = %panic_message(panic.as_ref()),
                    "command handler panicked"
                );
                Reply::unknown_error()
            }
        }
    }

    async fn after_client_close(&self, session: &Session) {
        debug!(session = session.id(), "client session released");
    }

    async fn close(&self) {
        if let Some(aof) = self.aof.get() {
            aof.close().await;
        }
        info!("database closed");
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
