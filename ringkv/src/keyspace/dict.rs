use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};

use super::entity::DataEntity;

/// Concurrent key to entity map backing one logical database.
///
/// Keys are raw bytes and compared byte for byte.
///
/// Every method is a single atomic map operation on one key. Anything that
/// reads a key and then writes it in a second call can interleave with a
/// concurrent writer of the same key.
#[derive(Default)]
pub struct Dict {
    data: DashMap<Bytes, DataEntity>,
}

impl Dict {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Clones the entity stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<DataEntity> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Upserts and returns 1 if the key was new, 0 if it was overwritten.
    pub fn put(&self, key: Bytes, entity: DataEntity) -> usize {
        match self.data.insert(key, entity) {
            Some(_) => 0,
            None => 1,
        }
    }

    /// Upserts and hands back the entity that was replaced.
    pub fn swap(&self, key: Bytes, entity: DataEntity) -> Option<DataEntity> {
        self.data.insert(key, entity)
    }

    /// Inserts only when the key is vacant. Returns 1 on insert.
    pub fn put_if_absent(&self, key: Bytes, entity: DataEntity) -> usize {
        match self.data.entry(key) {
            Entry::Occupied(_) => 0,
            Entry::Vacant(vacant) => {
                vacant.insert(entity);
                1
            }
        }
    }

    /// Overwrites only when the key already exists. Returns 1 on update.
    pub fn put_if_exists(&self, key: Bytes, entity: DataEntity) -> usize {
        match self.data.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(entity);
                1
            }
            Entry::Vacant(_) => 0,
        }
    }

    /// Removes the key and returns what it held.
    pub fn remove(&self, key: &[u8]) -> Option<DataEntity> {
        self.data.remove(key).map(|(_, entity)| entity)
    }

    /// Calls `consumer` for every entry until it returns `false`.
    pub fn for_each<F>(&self, mut consumer: F)
    where
        F: FnMut(&Bytes, &DataEntity) -> bool,
    {
        for entry in self.data.iter() {
            if !consumer(entry.key(), entry.value()) {
                break;
            }
        }
    }

    pub fn keys(&self) -> Vec<Bytes> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_reports_insert_versus_update() {
        let dict = Dict::new();
        assert_eq!(dict.put(Bytes::from_static(b"a"), DataEntity::string("1")), 1);
        assert_eq!(dict.put(Bytes::from_static(b"a"), DataEntity::string("2")), 0);
        assert_eq!(dict.get(b"a"), Some(DataEntity::string("2")));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn conditional_puts() {
        let dict = Dict::new();
        assert_eq!(dict.put_if_exists(Bytes::from_static(b"k"), DataEntity::string("x")), 0);
        assert!(dict.get(b"k").is_none());

        assert_eq!(dict.put_if_absent(Bytes::from_static(b"k"), DataEntity::string("v1")), 1);
        assert_eq!(dict.put_if_absent(Bytes::from_static(b"k"), DataEntity::string("v2")), 0);
        assert_eq!(dict.get(b"k"), Some(DataEntity::string("v1")));

        assert_eq!(dict.put_if_exists(Bytes::from_static(b"k"), DataEntity::string("v3")), 1);
        assert_eq!(dict.get(b"k"), Some(DataEntity::string("v3")));
    }

    #[test]
    fn swap_returns_previous() {
        let dict = Dict::new();
        assert!(dict.swap(Bytes::from_static(b"k"), DataEntity::string("a")).is_none());
        assert_eq!(
            dict.swap(Bytes::from_static(b"k"), DataEntity::string("b")),
            Some(DataEntity::string("a"))
        );
    }

    #[test]
    fn remove_and_clear() {
        let dict = Dict::new();
        dict.put(Bytes::from_static(b"a"), DataEntity::string("1"));
        dict.put(Bytes::from_static(b"b"), DataEntity::string("2"));
        assert!(dict.remove(b"a").is_some());
        assert!(dict.remove(b"a").is_none());
        dict.clear();
        assert!(dict.is_empty());
    }

    #[test]
    fn iteration_stops_when_consumer_declines() {
        let dict = Dict::new();
        for key in ["a", "b", "c"] {
            dict.put(Bytes::from(key), DataEntity::string(key));
        }
        let mut keys = dict.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let mut visited = 0;
        dict.for_each(|_, _| {
            visited += 1;
            visited < 2
        });
        assert_eq!(visited, 2);
    }
}
