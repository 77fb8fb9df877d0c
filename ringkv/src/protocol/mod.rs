//! Wire protocol codec.
//!
//! The same codec frames client requests, peer replies and the on-disk
//! persistence log:
//!
//! - [`reply`] holds the [`Reply`] value type and its byte-exact encoder.
//! - [`parser`] turns an unbounded byte stream into one [`Payload`] per frame.

pub mod parser;
pub mod reply;

use bytes::Bytes;

pub use parser::{Mode, ParseError, Parser, Payload, PayloadStream, parse_stream};
pub use reply::{Reply, cmd_line, encode_array};

/// A command and its arguments; element 0 is the command name.
pub type CmdLine = Vec<Bytes>;
