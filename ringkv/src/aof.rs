//! Append-only persistence log.
//!
//! The log is a plain concatenation of request frames. A synthetic
//! `SELECT <index>` precedes every record whose database differs from the
//! one before it, so replaying the file through a single session rebuilds
//! every database.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncRead, AsyncWriteExt},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    database::Database,
    protocol::{CmdLine, Mode, ParseError, Parser, Reply, encode_array},
    session::Session,
};

struct AofRecord {
    db_index: usize,
    line: CmdLine,
}

/// Handle to the background writer task.
///
/// [`AofHandler::append`] only enqueues. Records reach the file in the order
/// they were enqueued; the bounded queue blocks producers when the writer
/// falls behind.
pub struct AofHandler {
    path: PathBuf,
    tx: mpsc::Sender<AofRecord>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AofHandler {
    /// Opens `path` for appending and starts the writer.
    ///
    /// `current_db` is the database the file is positioned in, as reported
    /// by [`load`]; the first record for any other database gets a `SELECT`.
    pub async fn open(path: impl AsRef<Path>, queue_size: usize, current_db: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open append-only file {}", path.display()))?;

        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let writer = AofWriter {
            file,
            current_db,
            path: path.clone(),
        };
        let handle = tokio::spawn(writer.run(rx, shutdown_rx));
        info!(path = %path.display(), "append-only log enabled");

        Ok(Self {
            path,
            tx,
            shutdown: Mutex::new(Some(shutdown_tx)),
            writer: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues one durable command. Waits while the queue is full.
    pub async fn append(&self, db_index: usize, line: CmdLine) {
        if self.tx.send(AofRecord { db_index, line }).await.is_err() {
            warn!(db_index, "append-only writer has stopped, record dropped");
        }
    }

    /// Drains every queued record to disk and stops the writer. Idempotent.
    pub async fn close(&self) {
        let signal = match self.shutdown.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(signal) = signal {
            let _ = signal.send(());
        }

        let handle = self.writer.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = ?err, "append-only writer task failed");
            }
        }
    }
}

struct AofWriter {
    file: File,
    current_db: usize,
    path: PathBuf,
}

impl AofWriter {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<AofRecord>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                record = rx.recv() => match record {
                    Some(record) => self.write_record(record).await,
                    None => break,
                },
                _ = &mut shutdown => {
                    rx.close();
                    while let Some(record) = rx.recv().await {
                        self.write_record(record).await;
                    }
                    break;
                }
            }
        }

        if let Err(err) = self.file.sync_all().await {
            warn!(path = %self.path.display(), error = ?err, "failed to sync append-only file");
        }
        info!(path = %self.path.display(), "append-only writer stopped");
    }

    async fn write_record(&mut self, record: AofRecord) {
        if record.db_index != self.current_db {
            let select = [
                Bytes::from_static(b"SELECT"),
                Bytes::from(record.db_index.to_string()),
            ];
            if let Err(err) = self.write_frame(&select).await {
                error!(db_index = record.db_index, error = ?err, "failed to write select record");
                return;
            }
            self.current_db = record.db_index;
        }
        if let Err(err) = self.write_frame(&record.line).await {
            error!(db_index = record.db_index, error = ?err, "failed to write append-only record");
        }
    }

    async fn write_frame(&mut self, args: &[Bytes]) -> std::io::Result<()> {
        let mut buf = BytesMut::new();
        encode_array(&mut buf, args);
        self.file.write_all(&buf).await?;
        self.file.flush().await
    }
}

/// Outcome of replaying a log file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records executed without an error reply.
    pub applied: usize,
    /// Records whose execution replied with an error.
    pub failed: usize,
    /// Malformed or non-array frames skipped over.
    pub skipped: usize,
    /// Bytes cut from an incomplete record at the end of the file.
    pub truncated: u64,
    /// Database selected when the last record had been applied.
    pub last_db: usize,
}

/// Replays `path` into `database` through one detached session.
///
/// A missing file is an empty log. Malformed frames are logged and skipped.
/// An incomplete record at the very end, left by a crash mid-write, is cut
/// off so later appends start on a frame boundary. A read failure aborts the
/// replay and leaves the file as it was.
pub async fn load(database: &dyn Database, path: &Path) -> Result<ReplayStats> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no append-only file to replay");
            return Ok(ReplayStats::default());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to open append-only file {}", path.display()));
        }
    };
    let file_len = file.metadata().await?.len();

    let mut stats = ReplayStats::default();
    let valid_len = replay(database, file, &mut stats)
        .await
        .with_context(|| format!("failed to read append-only file {}", path.display()))?;

    if valid_len < file_len {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .with_context(|| format!("failed to reopen {} for truncation", path.display()))?;
        file.set_len(valid_len).await?;
        stats.truncated = file_len - valid_len;
        warn!(
            path = %path.display(),
            bytes = stats.truncated,
            "cut incomplete record from the end of the append-only file"
        );
    }

    info!(
        path = %path.display(),
        applied = stats.applied,
        failed = stats.failed,
        skipped = stats.skipped,
        "append-only replay finished"
    );
    Ok(stats)
}

/// Executes every frame read from `reader` until it ends.
///
/// Returns the offset just past the last complete frame. Any stream failure
/// other than the end of input is returned as an error.
async fn replay<R>(
    database: &dyn Database,
    reader: R,
    stats: &mut ReplayStats,
) -> Result<u64, ParseError>
where
    R: AsyncRead + Unpin,
{
    let session = Session::detached();
    let mut parser = Parser::new(reader, Mode::Command);
    let mut valid_len = 0;

    while let Some(payload) = parser.next_payload().await {
        match payload {
            Ok(Reply::MultiBulk(line)) => {
                let reply = database.exec(&session, line).await;
                if let Reply::Error(message) = &reply {
                    stats.failed += 1;
                    warn!(%message, "replayed record failed");
                } else {
                    stats.applied += 1;
                }
            }
            Ok(Reply::EmptyMultiBulk) => {}
            Ok(other) => {
                stats.skipped += 1;
                warn!(?other, "append-only file holds a non-array frame");
            }
            Err(err) if err.is_eof() => break,
            Err(err) if err.is_terminal() => {
                error!(error = %err, applied = stats.applied, "append-only replay aborted");
                return Err(err);
            }
            Err(err) => {
                stats.skipped += 1;
                warn!(error = %err, "skipping malformed append-only record");
            }
        }
        valid_len = parser.consumed();
    }

    stats.last_db = session.db_index();
    Ok(valid_len)
}
