use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
pub struct WrongType;

/// The value stored under one key.
///
/// Entities are replaced wholesale on update and never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEntity {
    Str(Bytes),
}

impl DataEntity {
    pub fn string(value: impl Into<Bytes>) -> Self {
        DataEntity::Str(value.into())
    }

    /// Borrows the string payload, failing for any other kind.
    pub fn as_bytes(&self) -> Result<&Bytes, WrongType> {
        match self {
            DataEntity::Str(value) => Ok(value),
        }
    }

    /// Name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataEntity::Str(_) => "string",
        }
    }
}
