use std::collections::HashMap;

pub type HashFn = fn(&[u8]) -> u32;

/// Consistent-hash ring over a fixed node set.
///
/// Each node sits at the hash of its identifier; a key belongs to the first
/// node at or after the key's own hash, wrapping to the lowest position.
/// There are no virtual nodes.
#[derive(Debug, Clone)]
pub struct HashRing {
    hash: HashFn,
    positions: Vec<u32>,
    owners: HashMap<u32, String>,
}

impl HashRing {
    /// Ring using CRC-32 (IEEE).
    pub fn new() -> Self {
        Self::with_hasher(crc32fast::hash)
    }

    pub fn with_hasher(hash: HashFn) -> Self {
        Self {
            hash,
            positions: Vec::new(),
            owners: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Adds nodes. Empty identifiers are skipped.
    pub fn add_nodes<I, S>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for node in nodes {
            let node = node.into();
            if node.is_empty() {
                continue;
            }
            let position = (self.hash)(node.as_bytes());
            if self.owners.insert(position, node).is_none() {
                self.positions.push(position);
            }
        }
        self.positions.sort_unstable();
    }

    /// Owner of `key`, or `None` on an empty ring. Keys are hashed as raw
    /// bytes.
    pub fn pick_node(&self, key: impl AsRef<[u8]>) -> Option<&str> {
        let first = *self.positions.first()?;
        let hash = (self.hash)(key.as_ref());
        let index = self.positions.partition_point(|&position| position < hash);
        let position = self.positions.get(index).copied().unwrap_or(first);
        self.owners.get(&position).map(String::as_str)
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}
