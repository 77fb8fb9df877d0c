use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Per-client state visible to the command backends.
///
/// The selected database index is written by `SELECT` and read by every
/// other command on the same client. A session opened by another cluster
/// node is marked as a peer link and never routed further.
#[derive(Debug)]
pub struct Session {
    id: String,
    selected_db: AtomicUsize,
    peer: AtomicBool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: nanoid::nanoid!(10),
            selected_db: AtomicUsize::new(0),
            peer: AtomicBool::new(false),
        }
    }

    /// A session with no transport behind it, used for log replay.
    pub fn detached() -> Self {
        Self {
            id: "replay".to_string(),
            selected_db: AtomicUsize::new(0),
            peer: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn db_index(&self) -> usize {
        self.selected_db.load(Ordering::Acquire)
    }

    pub fn select_db(&self, index: usize) {
        self.selected_db.store(index, Ordering::Release);
    }

    pub fn is_peer(&self) -> bool {
        self.peer.load(Ordering::Acquire)
    }

    pub fn mark_peer(&self) {
        self.peer.store(true, Ordering::Release);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
