use crate::errors::{JudgeError, JudgeResult};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type Connector<C> = Arc<dyn Fn() -> JudgeResult<C> + Send + Sync>;

/// Bounded pool of connections to one dataset.
///
/// The semaphore caps how many connections are checked out at once; the idle
/// list keeps opened connections for reuse. Connections are opened lazily.
pub struct ConnectionPool<C> {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<C>>>,
    connect: Connector<C>,
    acquire_timeout: Duration,
}

impl<C: Send + 'static> ConnectionPool<C> {
    pub fn new<F>(name: impl Into<String>, size: usize, acquire_timeout: Duration, connect: F) -> Self
    where
        F: Fn() -> JudgeResult<C> + Send + Sync + 'static,
    {
        let size = size.max(1);
        Self {
            name: name.into(),
            size,
            permits: Arc::new(Semaphore::new(size)),
            idle: Arc::new(Mutex::new(Vec::with_capacity(size))),
            connect: Arc::new(connect),
            acquire_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Waits at most `acquire_timeout` for a free slot.
    pub async fn acquire(&self) -> JudgeResult<PooledConnection<C>> {
        let permit =
            match tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return Err(JudgeError::internal(format!(
                        "connection pool for {} is shut down",
                        self.name
                    )))
                }
                Err(_) => {
                    tracing::warn!(
                        event = "pool_exhausted",
                        dataset = %self.name,
                        waited_ms = self.acquire_timeout.as_millis() as u64,
                    );
                    return Err(JudgeError::PoolExhausted {
                        dataset: self.name.clone(),
                        waited: self.acquire_timeout,
                    });
                }
            };

        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                tracing::debug!(event = "pool_connect", dataset = %self.name);
                (self.connect)()?
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Free slots right now. Equals `size()` when nothing is checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Rejects further acquisitions and drops idle connections. Checked-out
    /// connections are dropped when their guards are.
    pub fn close(&self) {
        self.permits.close();
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

/// A checked-out connection. Returned to the pool when dropped.
pub struct PooledConnection<C> {
    conn: Option<C>,
    idle: Arc<Mutex<Vec<C>>>,
    _permit: OwnedSemaphorePermit,
}

impl<C> PooledConnection<C> {
    /// Drops the connection instead of returning it; the slot is still freed.
    pub fn discard(mut self) {
        self.conn = None;
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only `discard` and `drop` take the connection, and both consume the guard.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("pooled connection already taken"))
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("pooled connection already taken"))
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        // Runs before `_permit` is released, so a waiter never finds an empty
        // idle list while this connection is on its way back.
        if let Some(conn) = self.conn.take() {
            self.idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(conn);
        }
    }
}
