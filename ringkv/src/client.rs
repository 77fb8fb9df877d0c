use std::net::SocketAddr;

use anyhow::{Context, Result, anyhow};
use bytes::{Bytes, BytesMut};
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::debug;

use crate::protocol::{Mode, Parser, Reply, encode_array};

/// Request/response connection to one server.
///
/// Used for peer relays inside a cluster and by the `call` subcommand.
/// Replies are decoded in [`Mode::Reply`], so a bulk string read back is
/// re-encoded byte for byte.
pub struct Client {
    addr: String,
    parser: Parser<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    broken: bool,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        debug!(addr, "client connected");
        Ok(Self {
            addr: addr.to_string(),
            parser: Parser::new(reader, Mode::Reply),
            writer,
            broken: false,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.writer.local_addr()?)
    }

    /// True once a transport failure has left the stream unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sends one command and waits for its reply.
    pub async fn send(&mut self, line: &[Bytes]) -> Result<Reply> {
        if self.broken {
            return Err(anyhow!("connection to {} is broken", self.addr));
        }
        let result = self.round_trip(line).await;
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    async fn round_trip(&mut self, line: &[Bytes]) -> Result<Reply> {
        let mut buf = BytesMut::new();
        encode_array(&mut buf, line);
        self.writer
            .write_all(&buf)
            .await
            .with_context(|| format!("failed to write to {}", self.addr))?;

        match self.parser.next_payload().await {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(err)) => Err(err).with_context(|| format!("bad reply from {}", self.addr)),
            None => Err(anyhow!("connection to {} closed", self.addr)),
        }
    }

    pub async fn close(mut self) {
        if let Err(err) = self.writer.shutdown().await {
            debug!(addr = %self.addr, error = ?err, "failed to shut down client writer");
        }
    }
}

/// Renders a reply the way an interactive shell shows it.
pub fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Status(text) => text.clone(),
        Reply::Error(text) => format!("(error) {text}"),
        Reply::Integer(n) => format!("(integer) {n}"),
        Reply::Bulk(value) => format!("\"{}\"", String::from_utf8_lossy(value)),
        Reply::NullBulk => "(nil)".to_string(),
        Reply::MultiBulk(items) if items.is_empty() => "(empty array)".to_string(),
        Reply::MultiBulk(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}) \"{}\"", i + 1, String::from_utf8_lossy(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        Reply::EmptyMultiBulk => "(empty array)".to_string(),
    }
}
