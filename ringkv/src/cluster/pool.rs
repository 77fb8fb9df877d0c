use std::{
    ops::{Deref, DerefMut},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out waiting for a pooled connection")]
    Exhausted,
    #[error("failed to open connection: {0:#}")]
    Connect(anyhow::Error),
    #[error("pool is closed")]
    Closed,
}

/// Creates and vets the connections a [`Pool`] hands out.
#[async_trait]
pub trait Manager: Send + Sync {
    type Conn: Send;

    async fn connect(&self) -> anyhow::Result<Self::Conn>;

    /// Broken connections are dropped on return instead of reused.
    fn is_broken(&self, conn: &Self::Conn) -> bool;
}

/// Bounded pool of reusable connections.
///
/// At most `max_size` connections exist at once, idle or borrowed. A borrow
/// waits up to the configured timeout for a free slot, then reuses an idle
/// connection or opens a new one.
pub struct Pool<M: Manager> {
    manager: M,
    idle: Mutex<Vec<M::Conn>>,
    slots: Semaphore,
    borrow_timeout: Duration,
}

impl<M: Manager> Pool<M> {
    pub fn new(manager: M, max_size: usize, borrow_timeout: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            manager,
            idle: Mutex::new(Vec::with_capacity(max_size)),
            slots: Semaphore::new(max_size),
            borrow_timeout,
        }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn idle_count(&self) -> usize {
        self.idle().len()
    }

    pub async fn get(&self) -> Result<Pooled<'_, M>, PoolError> {
        let permit = match tokio::time::timeout(self.borrow_timeout, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => return Err(PoolError::Exhausted),
        };

        let reused = self.idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.manager.connect().await.map_err(PoolError::Connect)?,
        };

        Ok(Pooled {
            pool: self,
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// Rejects further borrows and drops idle connections. Borrowed ones are
    /// dropped when they come back.
    pub fn close(&self) {
        self.slots.close();
        let drained = std::mem::take(&mut *self.idle());
        debug!(dropped = drained.len(), "pool closed");
    }

    fn idle(&self) -> MutexGuard<'_, Vec<M::Conn>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recycle(&self, conn: M::Conn) {
        if self.slots.is_closed() || self.manager.is_broken(&conn) {
            return;
        }
        self.idle().push(conn);
    }
}

/// A borrowed connection. Goes back to the pool on drop.
pub struct Pooled<'a, M: Manager> {
    pool: &'a Pool<M>,
    conn: Option<M::Conn>,
    _permit: SemaphorePermit<'a>,
}

impl<M: Manager> Deref for Pooled<'_, M> {
    type Target = M::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<M: Manager> DerefMut for Pooled<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<M: Manager> Drop for Pooled<'_, M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.recycle(conn);
        }
    }
}
