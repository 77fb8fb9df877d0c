//! In-memory keyspace.
//!
//! One [`Db`] exists per logical database index. Databases never share a lock:
//! each owns its own [`Dict`].

use bytes::Bytes;

pub mod dict;
pub mod entity;

pub use dict::Dict;
pub use entity::{DataEntity, WrongType};

/// A single logical database, addressed by its index.
pub struct Db {
    index: usize,
    data: Dict,
}

impl Db {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            data: Dict::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data(&self) -> &Dict {
        &self.data
    }

    pub fn get_entity(&self, key: &[u8]) -> Option<DataEntity> {
        self.data.get(key)
    }

    pub fn put_entity(&self, key: Bytes, entity: DataEntity) -> usize {
        self.data.put(key, entity)
    }

    pub fn put_if_absent(&self, key: Bytes, entity: DataEntity) -> usize {
        self.data.put_if_absent(key, entity)
    }

    pub fn put_if_exists(&self, key: Bytes, entity: DataEntity) -> usize {
        self.data.put_if_exists(key, entity)
    }

    /// Removes every listed key and returns how many were present.
    pub fn removes<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        keys.into_iter()
            .filter(|key| self.data.remove(key).is_some())
            .count()
    }

    pub fn flush(&self) {
        self.data.clear();
    }
}
