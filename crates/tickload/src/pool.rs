//! Bounded connection pool with scoped leases
//!
//! A [`LeasePool`] hands out at most `size` live [`Lease`]s at a time. Each
//! lease owns a connection exclusively; dropping it returns the connection to
//! the idle list and frees a slot for the next waiter. Release therefore
//! happens on every exit path: success, `?` propagation, panic unwinding and
//! task cancellation.
//!
//! Connections are created lazily through a [`Connector`] when no idle one is
//! available. A lease whose connection is known to be broken can be
//! [`discard`](Lease::discard)ed instead of being returned.
//!
//! PostgreSQL connections are pooled by `sqlx::PgPool`, which provides the same
//! guarantees; this pool covers the dedup store.

use async_trait::async_trait;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Which external system a pooled connection talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Sink,
    Dedup,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Sink => f.write_str("sink"),
            ConnectionKind::Dedup => f.write_str("dedup"),
        }
    }
}

/// Opens new connections for a [`LeasePool`]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection>;
}

struct PoolInner<C: Connector> {
    kind: ConnectionKind,
    size: usize,
    connector: C,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<C::Connection>>,
}

impl<C: Connector> PoolInner<C> {
    fn take_idle(&self) -> Option<C::Connection> {
        match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        }
    }

    fn put_idle(&self, conn: C::Connection) {
        match self.idle.lock() {
            Ok(mut idle) => idle.push(conn),
            Err(poisoned) => poisoned.into_inner().push(conn),
        }
    }
}

/// Fixed-size pool of reusable connections
pub struct LeasePool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for LeasePool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> LeasePool<C> {
    pub fn new(kind: ConnectionKind, size: usize, connector: C) -> Result<Self> {
        if size == 0 {
            return Err(IngestError::PoolInit {
                kind: kind.to_string(),
                message: "pool size must be at least 1".to_string(),
            });
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                kind,
                size,
                connector,
                permits: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(Vec::with_capacity(size)),
            }),
        })
    }

    /// Eagerly open one connection so misconfiguration surfaces at startup.
    pub async fn warm_up(&self) -> Result<()> {
        let lease = self.acquire().await.map_err(|e| IngestError::PoolInit {
            kind: self.inner.kind.to_string(),
            message: e.to_string(),
        })?;
        lease.release();
        Ok(())
    }

    /// Lease a connection, waiting while all `size` leases are out.
    pub async fn acquire(&self) -> Result<Lease<C>> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IngestError::PoolInit {
                kind: self.inner.kind.to_string(),
                message: "pool closed".to_string(),
            })?;

        let conn = match self.inner.take_idle() {
            Some(conn) => conn,
            None => {
                debug!(kind = %self.inner.kind, "Opening new pooled connection");
                // The permit is dropped with this frame if connect fails.
                self.inner.connector.connect().await?
            },
        };

        Ok(Lease {
            conn: Some(conn),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn kind(&self) -> ConnectionKind {
        self.inner.kind
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Leases currently checked out.
    pub fn in_use(&self) -> usize {
        self.inner.size - self.inner.permits.available_permits()
    }

    /// Connections parked and ready for reuse.
    pub fn idle(&self) -> usize {
        match self.inner.idle.lock() {
            Ok(idle) => idle.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Exclusive, scoped handle to a pooled connection
pub struct Lease<C: Connector> {
    conn: Option<C::Connection>,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> Lease<C> {
    /// Return the connection to the pool. Equivalent to dropping the lease.
    pub fn release(self) {}

    /// Drop the connection instead of returning it, e.g. after an I/O error.
    /// The slot is still freed; the next acquire opens a fresh connection.
    pub fn discard(mut self) {
        if self.conn.take().is_some() {
            warn!(kind = %self.pool.kind, "Discarding pooled connection");
        }
    }
}

impl<C: Connector> Deref for Lease<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("lease connection is only taken on drop or discard"),
        }
    }
}

impl<C: Connector> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("lease connection is only taken on drop or discard"),
        }
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        // Push back before the permit field drops so a woken waiter finds it.
        if let Some(conn) = self.conn.take() {
            self.pool.put_idle(conn);
        }
    }
}
