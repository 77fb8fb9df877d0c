use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::{Mutex, watch},
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    database::Database,
    protocol::{Mode, ParseError, Reply, parse_stream},
    session::Session,
};

/// TCP front end: one task per connection, all sharing one [`Database`].
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

struct ServerState {
    database: Arc<dyn Database>,
    close_timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn new(listener: TcpListener, database: Arc<dyn Database>, close_timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            listener,
            state: Arc::new(ServerState {
                database,
                close_timeout,
                shutdown,
            }),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves, then stops every
    /// connection and closes the database.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state, &mut connections);
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        handle_shutdown(&state, connections).await;
        Ok(())
    }

    /// Runs until Ctrl-C, or SIGTERM on unix.
    pub async fn run_until_signal(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn handle_shutdown(state: &ServerState, mut connections: JoinSet<()>) {
    info!(open = connections.len(), "server shutting down");
    state.shutdown.send_replace(true);

    let drained = timeout(state.close_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(remaining = connections.len(), "connections did not close in time, aborting");
        connections.shutdown().await;
    }

    state.database.close().await;
    info!("server stopped");
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
    connections: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => {
            let state = Arc::clone(state);
            connections.spawn(async move {
                handle_connection(stream, peer, state).await;
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

/// Write side of one client connection.
///
/// Writes are serialised by a lock, and closing first waits (bounded) for a
/// write already in progress so a reply is never cut short.
struct Connection {
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
}

impl Connection {
    async fn write(&self, reply: &Reply) -> std::io::Result<()> {
        let bytes = reply.to_bytes();
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await
    }

    async fn close(&self, close_timeout: Duration) {
        match timeout(close_timeout, self.writer.lock()).await {
            Ok(mut writer) => {
                if let Err(err) = writer.shutdown().await {
                    debug!(peer = %self.peer, error = ?err, "failed to shut down connection");
                }
            }
            Err(_) => warn!(peer = %self.peer, "write still in progress at close, forcing"),
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = ?err, "failed to set TCP_NODELAY");
    }
    let (reader, writer) = stream.into_split();
    let conn = Connection {
        peer,
        writer: Mutex::new(writer),
    };
    let session = Session::new();
    let mut shutdown = state.shutdown.subscribe();
    let mut payloads = parse_stream(reader, Mode::Command);
    info!(peer = %peer, session = session.id(), "client connected");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let payload = select! {
            _ = shutdown.changed() => break,
            payload = payloads.recv() => payload,
        };
        let Some(payload) = payload else {
            break;
        };

        let reply = match payload {
            Ok(unit) => match command_of(unit) {
                Ok(Some(line)) => state.database.exec(&session, line).await,
                Ok(None) => continue,
                Err(reply) => reply,
            },
            Err(err) => match protocol_failure(err, peer) {
                Some(reply) => reply,
                None => break,
            },
        };

        if let Err(err) = conn.write(&reply).await {
            warn!(peer = %peer, error = ?err, "failed to write reply");
            break;
        }
    }

    drop(payloads);
    state.database.after_client_close(&session).await;
    conn.close(state.close_timeout).await;
    info!(peer = %peer, session = session.id(), "client disconnected");
}

/// Turns a decoded unit into a command line, `None` for a unit that needs no
/// reply, or an error reply for input that is not a command.
fn command_of(unit: Reply) -> Result<Option<Vec<Bytes>>, Reply> {
    match unit {
        Reply::MultiBulk(line) => Ok(Some(line)),
        Reply::EmptyMultiBulk => Ok(None),
        Reply::Status(text) => {
            let words: Vec<Bytes> = text
                .split_whitespace()
                .map(|word| Bytes::copy_from_slice(word.as_bytes()))
                .collect();
            if words.is_empty() {
                Ok(None)
            } else {
                Ok(Some(words))
            }
        }
        Reply::Integer(_) => Err(Reply::error("ERR unexpected integer from client")),
        other => {
            debug!(?other, "unexpected unit from client");
            Err(Reply::error("ERR unexpected payload"))
        }
    }
}

/// Error reply for a recoverable decode error, or `None` when the stream is
/// finished.
fn protocol_failure(err: ParseError, peer: SocketAddr) -> Option<Reply> {
    match err {
        ParseError::Protocol(message) => {
            warn!(peer = %peer, %message, "protocol error");
            Some(Reply::protocol_error(&message))
        }
        err if err.is_eof() => None,
        err => {
            debug!(peer = %peer, error = %err, "connection read failed");
            None
        }
    }
}
