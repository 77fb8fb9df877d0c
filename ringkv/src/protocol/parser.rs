use std::io;

use bytes::Bytes;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    sync::mpsc,
    task::AbortHandle,
};
use tracing::debug;

use super::reply::Reply;

/// Bulk strings larger than this are rejected instead of allocated.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Header and inline lines longer than this close the stream.
const MAX_LINE_LEN: usize = 64 * 1024;
/// Upper bound for the up-front allocation of an array's element list.
const MAX_PREALLOC_ARGS: usize = 1024;
/// Upper bound for the up-front allocation of a bulk body; larger bodies
/// grow as their bytes arrive.
const MAX_PREALLOC_BODY: usize = 64 * 1024;
/// Decoded units buffered between the reader task and its consumer.
const PAYLOAD_BUFFER: usize = 16;

/// Failure to decode one frame.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The underlying stream failed or ended. Terminal: no more units follow.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The frame was malformed. The parser has already resynchronised.
    #[error("{0}")]
    Protocol(String),
}

impl ParseError {
    fn protocol(msg: impl Into<String>) -> Self {
        ParseError::Protocol(msg.into())
    }

    fn end_of_stream() -> Self {
        ParseError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"))
    }

    fn line_too_long() -> Self {
        ParseError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {MAX_LINE_LEN} bytes"),
        ))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ParseError::Io(_))
    }

    /// True when the stream simply ended (including mid-frame).
    pub fn is_eof(&self) -> bool {
        matches!(self, ParseError::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// One unit produced per logical frame.
pub type Payload = Result<Reply, ParseError>;

/// How a top-level `$len` frame is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Requests and log replay: a lone bulk string becomes a one-element array,
    /// so every command arrives as [`Reply::MultiBulk`].
    #[default]
    Command,
    /// Replies read by a client: a lone bulk string stays [`Reply::Bulk`].
    Reply,
}

/// Streaming frame decoder over any async byte source.
///
/// Each call to [`Parser::next_payload`] starts in the initial state and reads
/// exactly one frame. A malformed frame yields a protocol error and the next
/// call starts over at the following line, so the stream resynchronises at
/// frame boundaries. An I/O failure is yielded once and closes the parser.
pub struct Parser<R> {
    reader: BufReader<R>,
    mode: Mode,
    closed: bool,
    consumed: u64,
}

impl<R> Parser<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, mode: Mode) -> Self {
        Self {
            reader: BufReader::new(reader),
            mode,
            closed: false,
            consumed: 0,
        }
    }

    /// Bytes of complete lines and bodies taken from the source so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Returns the next unit, or `None` once a terminal error has been yielded.
    pub async fn next_payload(&mut self) -> Option<Payload> {
        if self.closed {
            return None;
        }
        let payload = self.read_frame().await;
        if matches!(&payload, Err(err) if err.is_terminal()) {
            self.closed = true;
        }
        Some(payload)
    }

    async fn read_frame(&mut self) -> Payload {
        let line = self.read_line().await?;
        let Some((&kind, rest)) = line.split_first() else {
            return Err(ParseError::protocol("empty line"));
        };
        match kind {
            b'*' => {
                let count = parse_count(rest)?;
                if count == 0 {
                    return Ok(Reply::EmptyMultiBulk);
                }
                self.collect_array(count).await
            }
            b'$' => {
                let len = parse_len(rest)?;
                if len == -1 {
                    return Ok(Reply::NullBulk);
                }
                if len < 0 {
                    return Err(ParseError::Protocol(format!(
                        "invalid bulk length: {}",
                        String::from_utf8_lossy(rest)
                    )));
                }
                let body = self.read_body(len as usize).await?;
                match self.mode {
                    Mode::Command => Ok(Reply::MultiBulk(vec![body])),
                    Mode::Reply => Ok(Reply::Bulk(body)),
                }
            }
            b'+' => Ok(Reply::Status(String::from_utf8_lossy(rest).into_owned())),
            b'-' => Ok(Reply::Error(String::from_utf8_lossy(rest).into_owned())),
            b':' => {
                let text = std::str::from_utf8(rest)
                    .map_err(|_| ParseError::protocol("invalid integer reply"))?;
                let value = text.parse::<i64>().map_err(|_| {
                    ParseError::Protocol(format!("invalid integer reply: {text}"))
                })?;
                Ok(Reply::Integer(value))
            }
            other => Err(ParseError::Protocol(format!(
                "unexpected frame type '{}'",
                other as char
            ))),
        }
    }

    async fn collect_array(&mut self, count: usize) -> Payload {
        let mut args = Vec::with_capacity(count.min(MAX_PREALLOC_ARGS));
        while args.len() < count {
            let header = self.read_line().await?;
            let Some(rest) = header.strip_prefix(b"$") else {
                return Err(ParseError::Protocol(format!(
                    "expected bulk header, got '{}'",
                    String::from_utf8_lossy(&header)
                )));
            };
            let len = parse_len(rest)?;
            if len < 0 {
                args.push(Bytes::new());
                continue;
            }
            args.push(self.read_body(len as usize).await?);
        }
        Ok(Reply::MultiBulk(args))
    }

    /// Reads one CRLF-terminated line and strips the terminator.
    async fn read_line(&mut self) -> Result<Vec<u8>, ParseError> {
        let limit = MAX_LINE_LEN as u64 + 2;
        let mut line = Vec::new();
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut line)
            .await?;
        if line.last() == Some(&b'\n') {
            self.consumed += read as u64;
        } else if read as u64 == limit {
            return Err(ParseError::line_too_long());
        }
        if read == 0 || line.last() != Some(&b'\n') {
            return Err(ParseError::end_of_stream());
        }
        if !line.ends_with(b"\r\n") {
            return Err(ParseError::protocol("line must end with \\r\\n"));
        }
        line.truncate(line.len() - 2);
        Ok(line)
    }

    /// Reads exactly `len` payload bytes plus the trailing CRLF.
    async fn read_body(&mut self, len: usize) -> Result<Bytes, ParseError> {
        let want = len + 2;
        let mut body = Vec::with_capacity(want.min(MAX_PREALLOC_BODY));
        (&mut self.reader)
            .take(want as u64)
            .read_to_end(&mut body)
            .await?;
        if body.len() < want {
            return Err(ParseError::end_of_stream());
        }
        self.consumed += body.len() as u64;
        if !body.ends_with(b"\r\n") {
            return Err(ParseError::protocol("bulk body must end with \\r\\n"));
        }
        body.truncate(len);
        Ok(Bytes::from(body))
    }
}

fn parse_count(digits: &[u8]) -> Result<usize, ParseError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<u32>().ok())
        .map(|count| count as usize)
        .ok_or_else(|| {
            ParseError::Protocol(format!(
                "invalid array length: {}",
                String::from_utf8_lossy(digits)
            ))
        })
}

fn parse_len(digits: &[u8]) -> Result<i64, ParseError> {
    let len = std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| {
            ParseError::Protocol(format!(
                "invalid bulk length: {}",
                String::from_utf8_lossy(digits)
            ))
        })?;
    if len > MAX_BULK_LEN {
        return Err(ParseError::Protocol(format!("bulk length {len} too large")));
    }
    Ok(len)
}

/// Units decoded by a background task, one task per stream.
///
/// Dropping the stream stops the task even if it is parked on a read.
pub struct PayloadStream {
    rx: mpsc::Receiver<Payload>,
    task: AbortHandle,
}

impl PayloadStream {
    /// Waits for the next unit. `None` after the terminal unit was delivered.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }
}

impl Drop for PayloadStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns a decoder task for `reader` and returns the sequence of units it produces.
pub fn parse_stream<R>(reader: R, mode: Mode) -> PayloadStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(PAYLOAD_BUFFER);
    let task = tokio::spawn(async move {
        let mut parser = Parser::new(reader, mode);
        while let Some(payload) = parser.next_payload().await {
            if tx.send(payload).await.is_err() {
                debug!("payload consumer went away, stopping parser");
                break;
            }
        }
    });
    PayloadStream {
        rx,
        task: task.abort_handle(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reply::cmd_line;

    async fn parse_all(input: &'static [u8], mode: Mode) -> Vec<Payload> {
        let mut parser = Parser::new(input, mode);
        let mut out = Vec::new();
        while let Some(payload) = parser.next_payload().await {
            out.push(payload);
        }
        out
    }

    #[tokio::test]
    async fn parses_command_array() {
        let out = parse_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n", Mode::Command).await;
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].as_ref().unwrap(),
            &Reply::MultiBulk(cmd_line(["SET", "key", "value"]))
        );
        assert!(out[1].as_ref().unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn inline_replies() {
        let out = parse_all(b"+OK\r\n-ERR nope\r\n:12\r\n$-1\r\n*0\r\n", Mode::Command).await;
        let replies: Vec<_> = out.into_iter().filter_map(Result::ok).collect();
        assert_eq!(
            replies,
            vec![
                Reply::ok(),
                Reply::error("ERR nope"),
                Reply::Integer(12),
                Reply::NullBulk,
                Reply::EmptyMultiBulk,
            ]
        );
    }

    #[tokio::test]
    async fn lone_bulk_depends_on_mode() {
        let command = parse_all(b"$4\r\nPING\r\n", Mode::Command).await;
        assert_eq!(
            command[0].as_ref().unwrap(),
            &Reply::MultiBulk(cmd_line(["PING"]))
        );

        let reply = parse_all(b"$4\r\nPING\r\n", Mode::Reply).await;
        assert_eq!(reply[0].as_ref().unwrap(), &Reply::bulk("PING"));
    }

    #[tokio::test]
    async fn empty_and_negative_elements_inside_array() {
        let out = parse_all(b"*3\r\n$3\r\nSET\r\n$0\r\n\r\n$-1\r\n", Mode::Command).await;
        assert_eq!(
            out[0].as_ref().unwrap(),
            &Reply::MultiBulk(cmd_line(["SET", "", ""]))
        );
    }

    #[tokio::test]
    async fn malformed_frame_resynchronises() {
        let out = parse_all(b"*3\r\n$bad\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", Mode::Command).await;
        assert!(matches!(&out[0], Err(ParseError::Protocol(_))));
        assert_eq!(
            out[1].as_ref().unwrap(),
            &Reply::MultiBulk(cmd_line(["GET", "k"]))
        );
        assert!(out[2].as_ref().unwrap_err().is_terminal());
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn non_numeric_count_is_protocol_error() {
        let out = parse_all(b"*x\r\n:1\r\n", Mode::Command).await;
        assert!(matches!(&out[0], Err(ParseError::Protocol(_))));
        assert_eq!(out[1].as_ref().unwrap(), &Reply::Integer(1));
    }

    #[tokio::test]
    async fn missing_carriage_return_is_protocol_error() {
        let out = parse_all(b"+OK\n+PONG\r\n", Mode::Command).await;
        assert!(matches!(&out[0], Err(ParseError::Protocol(_))));
        assert_eq!(out[1].as_ref().unwrap(), &Reply::pong());
    }

    #[tokio::test]
    async fn truncated_body_is_terminal() {
        let out = parse_all(b"*2\r\n$3\r\nGET\r\n$5\r\nab", Mode::Command).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].as_ref().unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn huge_declared_body_waits_for_its_bytes() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut parser = Parser::new(server, Mode::Command);

        use tokio::io::AsyncWriteExt;
        client.write_all(b"$536870912\r\nabc").await.unwrap();
        drop(client);

        let err = parser.next_payload().await.unwrap().unwrap_err();
        assert!(err.is_eof());
        assert_eq!(parser.consumed(), 12);
    }

    #[tokio::test]
    async fn overlong_line_closes_the_parser() {
        let mut input = vec![b'+'; MAX_LINE_LEN + 16];
        input.extend_from_slice(b"\r\n");
        let mut parser = Parser::new(&input[..], Mode::Command);

        let err = parser.next_payload().await.unwrap().unwrap_err();
        assert!(err.is_terminal());
        assert!(!err.is_eof());
        assert!(parser.next_payload().await.is_none());
    }

    #[tokio::test]
    async fn consumed_tracks_complete_frames() {
        let mut parser = Parser::new(&b"+OK\r\n*1\r\n$4\r\nPI"[..], Mode::Command);
        parser.next_payload().await.unwrap().unwrap();
        assert_eq!(parser.consumed(), 5);
        assert!(parser.next_payload().await.unwrap().unwrap_err().is_eof());
        assert_eq!(parser.consumed(), 5 + 4 + 4);
    }

    #[tokio::test]
    async fn round_trips_reply_values() {
        let values = vec![
            Reply::MultiBulk(cmd_line(["a", "", "ccc"])),
            Reply::status("QUEUED"),
            Reply::error("ERR x"),
            Reply::Integer(-7),
            Reply::NullBulk,
            Reply::bulk("payload"),
            Reply::multi_bulk(vec![]),
        ];
        let mut encoded = bytes::BytesMut::new();
        for value in &values {
            value.encode(&mut encoded);
        }

        let mut parser = Parser::new(&encoded[..], Mode::Reply);
        for expected in &values {
            let decoded = parser.next_payload().await.unwrap().unwrap();
            assert_eq!(&decoded, expected);
        }
        assert!(parser.next_payload().await.unwrap().is_err());
        assert!(parser.next_payload().await.is_none());
    }

    #[tokio::test]
    async fn stream_task_delivers_units_in_order() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut stream = parse_stream(server, Mode::Command);

        use tokio::io::AsyncWriteExt;
        client.write_all(b"*1\r\n$4\r\nPING\r\n:3\r\n").await.unwrap();
        drop(client);

        assert_eq!(
            stream.recv().await.unwrap().unwrap(),
            Reply::MultiBulk(cmd_line(["PING"]))
        );
        assert_eq!(stream.recv().await.unwrap().unwrap(), Reply::Integer(3));
        assert!(stream.recv().await.unwrap().unwrap_err().is_eof());
        assert!(stream.recv().await.is_none());
    }
}
