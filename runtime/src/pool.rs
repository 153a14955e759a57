//! Bounded pool of store handles with a FIFO wait queue.
//!
//! At most `max_connections` callers hold a handle at once. Excess callers queue
//! in arrival order and are resumed one by one as handles come back. A waiter
//! that is not served within the acquire timeout is removed from the queue
//! before the timeout error is returned, so a later release can never hand a
//! slot to a caller that already gave up.
//!
//! ```text
//!  acquire() ──► active < max? ──yes──► active += 1 ──► PooledConnection
//!                     │no
//!                     ▼
//!             waiters.push_back(tx) ── wait (timeout) ──► granted by release()
//!
//!  release() ──► waiters.pop_front()? ──some──► tx.send(()) (active unchanged)
//!                     │none
//!                     ▼
//!              active = active.saturating_sub(1)
//! ```
//!
//! # Example
//!
//! ```rust
//! use charterbook_runtime::config::PoolConfig;
//! use charterbook_runtime::pool::ConnectionPool;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), charterbook_core::BookingError> {
//! let pool = ConnectionPool::new(Arc::new("store handle"), &PoolConfig::default())?;
//!
//! let conn = pool.acquire().await?;
//! assert_eq!(pool.stats().active, 1);
//! drop(conn);
//! assert_eq!(pool.stats().active, 0);
//! # Ok(())
//! # }
//! ```

use crate::config::PoolConfig;
use charterbook_core::BookingError;
use crate::metrics;
use ::metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Handles currently held
    pub active: u32,
    /// Callers queued for a handle
    pub waiting: usize,
    /// Upper bound on `active`
    pub max: u32,
    /// Configured minimum idle connections of the backing store
    pub min: u32,
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct PoolState {
    active: u32,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

struct PoolShared {
    max: u32,
    min: u32,
    acquire_timeout: Duration,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self, state: &PoolState) -> PoolStats {
        PoolStats {
            active: state.active,
            waiting: state.waiters.len(),
            max: self.max,
            min: self.min,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish(state: &PoolState) {
        gauge!(metrics::POOL_ACTIVE).set(f64::from(state.active));
        gauge!(metrics::POOL_WAITING).set(state.waiters.len() as f64);
    }

    /// Hand the freed slot to the oldest live waiter, or shrink `active`.
    fn release(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                tracing::trace!(waiter = waiter.id, "Handed pool slot to waiter");
                Self::publish(&state);
                return;
            }
            // Receiver already gone; its ticket is withdrawing concurrently.
        }
        state.active = state.active.saturating_sub(1);
        Self::publish(&state);
    }
}

/// A caller's place in the wait queue.
///
/// Dropping a ticket that was never settled withdraws it; if a slot had been
/// handed over in the meantime, the slot is passed on instead of leaking.
struct QueuedTicket {
    id: u64,
    rx: oneshot::Receiver<()>,
    shared: Arc<PoolShared>,
    settled: bool,
}

enum Withdrawal {
    Removed,
    Granted,
}

impl QueuedTicket {
    async fn wait(&mut self) -> Result<(), oneshot::error::RecvError> {
        (&mut self.rx).await
    }

    fn withdraw(&mut self) -> Withdrawal {
        {
            let mut state = self.shared.lock();
            if let Some(pos) = state.waiters.iter().position(|w| w.id == self.id) {
                state.waiters.remove(pos);
                PoolShared::publish(&state);
                return Withdrawal::Removed;
            }
        }
        // Not queued any more: release() already sent the grant under the lock.
        match self.rx.try_recv() {
            Ok(()) => Withdrawal::Granted,
            Err(_) => Withdrawal::Removed,
        }
    }
}

impl Drop for QueuedTicket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Withdrawal::Granted = self.withdraw() {
            self.shared.release();
        }
    }
}

/// Bounded pool of handles onto a shared store.
///
/// Cloning the pool is cheap; clones share the same limits and queue.
pub struct ConnectionPool<S: ?Sized> {
    handle: Arc<S>,
    shared: Arc<PoolShared>,
}

impl<S: ?Sized> Clone for ConnectionPool<S> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: ?Sized + Send + Sync> std::fmt::Debug for ConnectionPool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<S: ?Sized + Send + Sync> ConnectionPool<S> {
    /// Create a pool handing out `handle` to at most `config.max_connections` holders.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] if the configuration is invalid.
    pub fn new(handle: Arc<S>, config: &PoolConfig) -> Result<Self, BookingError> {
        config.validate()?;
        Ok(Self {
            handle,
            shared: Arc::new(PoolShared {
                max: config.max_connections,
                min: config.min_connections,
                acquire_timeout: config.acquire_timeout(),
                state: Mutex::new(PoolState::default()),
            }),
        })
    }

    /// Acquire a handle, waiting in FIFO order if the pool is saturated.
    ///
    /// Cancel-safe: dropping the returned future while queued removes the caller
    /// from the queue.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::PoolTimeout`] if no handle is granted within the
    /// acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection<S>, BookingError> {
        let started = Instant::now();

        let (id, rx) = {
            let mut state = self.shared.lock();
            if state.active < self.shared.max {
                state.active += 1;
                PoolShared::publish(&state);
                drop(state);
                return Ok(self.granted(started));
            }
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { id, grant: tx });
            PoolShared::publish(&state);
            (id, rx)
        };

        tracing::debug!(waiter = id, "Pool saturated, queueing for a handle");

        let mut ticket = QueuedTicket {
            id,
            rx,
            shared: Arc::clone(&self.shared),
            settled: false,
        };

        let outcome = tokio::time::timeout(self.shared.acquire_timeout, ticket.wait()).await;
        match outcome {
            Ok(Ok(())) => {
                ticket.settled = true;
                Ok(self.granted(started))
            }
            Ok(Err(_)) => {
                // The sender only disappears if release() found us unreachable.
                ticket.settled = true;
                Err(BookingError::Aborted("pool wait queue dropped".to_string()))
            }
            Err(_elapsed) => match ticket.withdraw() {
                Withdrawal::Granted => {
                    ticket.settled = true;
                    Ok(self.granted(started))
                }
                Withdrawal::Removed => {
                    ticket.settled = true;
                    let waited = started.elapsed();
                    counter!(metrics::POOL_TIMEOUTS_TOTAL).increment(1);
                    tracing::warn!(
                        waiter = id,
                        waited_ms = waited.as_millis(),
                        "Timed out waiting for a pool handle"
                    );
                    Err(BookingError::PoolTimeout { waited })
                }
            },
        }
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        self.shared.stats(&state)
    }

    fn granted(&self, started: Instant) -> PooledConnection<S> {
        histogram!(metrics::POOL_ACQUIRE_DURATION)
            .record(started.elapsed().as_secs_f64());
        PooledConnection {
            handle: Arc::clone(&self.handle),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Exclusive use of a pool slot. Dropping it releases the slot.
pub struct PooledConnection<S: ?Sized> {
    handle: Arc<S>,
    shared: Arc<PoolShared>,
}

impl<S: ?Sized> std::fmt::Debug for PooledConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl<S: ?Sized> Deref for PooledConnection<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.handle
    }
}

impl<S: ?Sized> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        self.shared.release();
    }
}
