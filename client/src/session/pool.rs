//! Insert-only pool of live virtual connections

use super::connection::VirtualConnection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection pool is full ({limit} connections)")]
pub struct PoolFull {
    pub limit: usize,
}

struct PoolInner {
    connections: Vec<Arc<VirtualConnection>>,
    limit: Option<usize>,
}

/// Concurrency-safe, append-only collection of [`VirtualConnection`]s.
///
/// Membership only grows. [`len`](Self::len) is a lock-free snapshot that
/// never decreases. When a limit is set, inserts past it are refused, so the
/// pool can never exceed the ramp ceiling.
pub struct ConnectionPool {
    inner: Mutex<PoolInner>,
    len: AtomicUsize,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                connections: Vec::new(),
                limit: None,
            }),
            len: AtomicUsize::new(0),
        }
    }

    pub fn with_limit(limit: usize) -> Self {
        let pool = Self::new();
        pool.set_limit(limit);
        pool
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_limit(&self, limit: usize) {
        self.lock().limit = Some(limit);
    }

    pub fn limit(&self) -> Option<usize> {
        self.lock().limit
    }

    /// Add a connection. Returns the new pool size.
    pub fn try_insert(&self, connection: Arc<VirtualConnection>) -> Result<usize, PoolFull> {
        let mut inner = self.lock();
        if let Some(limit) = inner.limit
            && inner.connections.len() >= limit
        {
            return Err(PoolFull { limit });
        }
        inner.connections.push(connection);
        let size = inner.connections.len();
        self.len.store(size, Ordering::Release);
        Ok(size)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current membership
    pub fn snapshot(&self) -> Vec<Arc<VirtualConnection>> {
        self.lock().connections.clone()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}
