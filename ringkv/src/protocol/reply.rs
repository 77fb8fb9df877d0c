use bytes::{BufMut, Bytes, BytesMut};

pub(crate) const CRLF: &[u8] = b"\r\n";

/// One decoded protocol unit, or a reply about to be encoded.
///
/// The same type flows in both directions: the parser produces it from a
/// byte stream and the session encodes it back with [`Reply::to_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+<text>\r\n`
    Status(String),
    /// `-<text>\r\n`
    Error(String),
    /// `:<n>\r\n`
    Integer(i64),
    /// `$<len>\r\n<bytes>\r\n`
    Bulk(Bytes),
    /// `$-1\r\n`
    NullBulk,
    /// `*<n>\r\n` followed by `n` bulk strings.
    MultiBulk(Vec<Bytes>),
    /// `*0\r\n`
    EmptyMultiBulk,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    pub fn status(text: impl Into<String>) -> Self {
        Reply::Status(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Reply::Error(text.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Reply::Bulk(value.into())
    }

    /// Array reply. An empty list becomes [`Reply::EmptyMultiBulk`], which
    /// is what `*0\r\n` decodes back to.
    pub fn multi_bulk(args: Vec<Bytes>) -> Self {
        if args.is_empty() {
            Reply::EmptyMultiBulk
        } else {
            Reply::MultiBulk(args)
        }
    }

    /// Generic failure used when a handler blows up.
    pub fn unknown_error() -> Self {
        Reply::error("ERR unknown")
    }

    pub fn unknown_command(name: &str) -> Self {
        Reply::Error(format!("ERR unknown command '{name}'"))
    }

    pub fn arg_num_error(name: &str) -> Self {
        Reply::Error(format!("ERR wrong number of arguments for '{name}' command"))
    }

    pub fn syntax_error() -> Self {
        Reply::error("ERR syntax error")
    }

    pub fn wrong_type() -> Self {
        Reply::error("WRONGTYPE Operation against a key holding the wrong kind of value")
    }

    pub fn protocol_error(msg: &str) -> Self {
        Reply::Error(format!("ERR Protocol error: '{msg}'"))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Encodes this reply into `buf` using the exact wire format.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Reply::Status(text) => encode_line(buf, b'+', text),
            Reply::Error(text) => encode_line(buf, b'-', text),
            Reply::Integer(n) => {
                buf.put_u8(b':');
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Bulk(value) => encode_bulk(buf, value),
            Reply::NullBulk => buf.put_slice(b"$-1\r\n"),
            Reply::MultiBulk(args) => encode_array(buf, args),
            Reply::EmptyMultiBulk => buf.put_slice(b"*0\r\n"),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Writes a single-line reply. Line breaks inside `text` become spaces so
/// one reply always stays one frame.
fn encode_line(buf: &mut BytesMut, prefix: u8, text: &str) {
    buf.put_u8(prefix);
    for &byte in text.as_bytes() {
        match byte {
            b'\r' | b'\n' => buf.put_u8(b' '),
            _ => buf.put_u8(byte),
        }
    }
    buf.put_slice(CRLF);
}

fn encode_bulk(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(value.len().to_string().as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(value);
    buf.put_slice(CRLF);
}

/// Encodes a command line (or any list of byte strings) as an array frame.
pub fn encode_array(buf: &mut BytesMut, args: &[Bytes]) {
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(CRLF);
    for arg in args {
        encode_bulk(buf, arg);
    }
}

/// Builds a command line from string-like parts, e.g. `cmd_line(["select", "2"])`.
pub fn cmd_line<I, S>(parts: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    parts
        .into_iter()
        .map(|part| Bytes::copy_from_slice(part.as_ref()))
        .collect()
}
