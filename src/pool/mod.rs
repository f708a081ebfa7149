//! Bounded connection pool with fair FIFO waiter queueing.
//!
//! One `std::sync` mutex guards the pool state; it is never held across an
//! await. Waiters are oneshot senders served strictly in arrival order; a
//! released connection is handed to the head waiter directly, never routed
//! through the idle stack.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::config::PgConfig;
use crate::driver::{ConnStatus, TxStatus, WireConnection, WireDriver};
use crate::error::PgValetError;
use crate::executor;

/// A connection borrowed from the pool.
///
/// Only the pool constructs these, and [`Pool::release`] consumes them, so
/// a connection can neither be returned twice nor injected from outside.
pub struct PooledConn<C> {
    id: u64,
    conn: C,
}

impl<C> PooledConn<C> {
    /// Pool-assigned identifier, for diagnostics.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<C> std::fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn").field("id", &self.id).finish()
    }
}

impl<C> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

/// Point-in-time snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_size: usize,
    /// Connections currently handed out.
    pub active: usize,
    /// Connections parked in the idle stack.
    pub idle: usize,
    /// Acquire calls queued for a connection.
    pub waiting: usize,
    pub closed: bool,
    /// Id of the most recently acquired connection, if any.
    pub last_used: Option<u64>,
}

type Waiter<C> = oneshot::Sender<Result<PooledConn<C>, PgValetError>>;

struct PoolState<C> {
    /// LIFO: the most recently released connection is reused first.
    idle: Vec<PooledConn<C>>,
    active_count: usize,
    waiters: VecDeque<Waiter<C>>,
    last_used: Option<u64>,
    closed: bool,
}

/// Bounded pool of wire connections over a single database.
pub struct Pool<D: WireDriver> {
    driver: D,
    config: PgConfig,
    max_size: usize,
    state: Mutex<PoolState<D::Conn>>,
    next_conn_id: AtomicU64,
}

enum Acquisition<C> {
    Ready(PooledConn<C>),
    Open,
    Wait(oneshot::Receiver<Result<PooledConn<C>, PgValetError>>),
}

impl<D: WireDriver> Pool<D> {
    /// Create a pool that opens at most `max_size` concurrent connections.
    ///
    /// # Errors
    /// Returns `PgValetError::Configuration` if `max_size` is zero.
    pub fn new(driver: D, config: PgConfig, max_size: usize) -> Result<Self, PgValetError> {
        if max_size == 0 {
            return Err(PgValetError::Configuration(
                "pool max_size must be positive".to_string(),
            ));
        }
        Ok(Pool {
            driver,
            config,
            max_size,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                active_count: 0,
                waiters: VecDeque::new(),
                last_used: None,
                closed: false,
            }),
            next_conn_id: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<D::Conn>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow a healthy connection, opening one if the pool has spare
    /// capacity, or queueing behind earlier callers otherwise.
    ///
    /// # Errors
    /// `PoolClosed` once [`Pool::close`] has run; `ConnectionOpenFailed`
    /// when a fresh connection could not be established.
    pub async fn acquire(&self) -> Result<PooledConn<D::Conn>, PgValetError> {
        loop {
            let step = {
                let mut state = self.lock();
                if state.closed {
                    return Err(PgValetError::PoolClosed);
                }
                if let Some(conn) = state.idle.pop() {
                    state.active_count += 1;
                    Acquisition::Ready(conn)
                } else if state.active_count < self.max_size {
                    state.active_count += 1;
                    Acquisition::Open
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Acquisition::Wait(rx)
                }
            };

            match step {
                Acquisition::Ready(mut conn) => {
                    if conn.status() == ConnStatus::Ok {
                        self.mark_used(conn.id);
                        return Ok(conn);
                    }
                    tracing::debug!(conn_id = conn.id, "discarding dead idle connection");
                    conn.conn.close();
                    self.lock().active_count -= 1;
                }
                Acquisition::Open => match self.open_connection().await {
                    Ok(conn) => {
                        self.mark_used(conn.id);
                        return Ok(conn);
                    }
                    Err(e) => {
                        self.lock().active_count -= 1;
                        return Err(e);
                    }
                },
                Acquisition::Wait(rx) => {
                    return match rx.await {
                        Ok(handed) => handed.inspect(|conn| self.mark_used(conn.id)),
                        // the pool dropped the sender without resolving it
                        Err(_) => Err(PgValetError::PoolClosed),
                    };
                }
            }
        }
    }

    /// Return a borrowed connection.
    ///
    /// Dead connections are discarded (and replaced for a queued waiter);
    /// a session left inside a transaction block is rolled back before the
    /// connection becomes reusable. Never fails: problems downgrade to a
    /// discard.
    pub async fn release(&self, mut conn: PooledConn<D::Conn>) {
        if conn.status() != ConnStatus::Ok {
            self.discard(conn).await;
            return;
        }

        if conn.transaction_status() != TxStatus::Idle {
            tracing::debug!(conn_id = conn.id, "rolling back stale transaction on release");
            let rolled_back = executor::run_command(&mut *conn, "ROLLBACK").await.is_ok();
            if !rolled_back || conn.status() != ConnStatus::Ok {
                self.discard(conn).await;
                return;
            }
        }

        self.hand_back(conn);
    }

    /// Close the pool: reject every queued waiter, close idle connections.
    ///
    /// Connections still handed out are discarded as they come back.
    /// Idempotent; performs no suspension.
    pub fn close(&self) {
        let (waiters, idle) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.waiters),
                std::mem::take(&mut state.idle),
            )
        };
        for waiter in waiters {
            let _ = waiter.send(Err(PgValetError::PoolClosed));
        }
        for mut conn in idle {
            conn.conn.close();
        }
        tracing::debug!("pool closed");
    }

    /// Snapshot of the current occupancy. Diagnostic only.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            max_size: self.max_size,
            active: state.active_count,
            idle: state.idle.len(),
            waiting: state.waiters.len(),
            closed: state.closed,
            last_used: state.last_used,
        }
    }

    fn mark_used(&self, id: u64) {
        self.lock().last_used = Some(id);
    }

    async fn open_connection(&self) -> Result<PooledConn<D::Conn>, PgValetError> {
        let conn = match self.driver.connect(&self.config).await {
            Ok(conn) => conn,
            Err(PgValetError::ConnectionOpenFailed(msg)) => {
                return Err(PgValetError::ConnectionOpenFailed(msg));
            }
            Err(other) => return Err(PgValetError::ConnectionOpenFailed(other.to_string())),
        };
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(conn_id = id, "opened new connection");
        Ok(PooledConn { id, conn })
    }

    /// Park a healthy connection, preferring a direct hand-off to the head
    /// waiter so fairness is preserved and no priority inversion occurs.
    fn hand_back(&self, mut conn: PooledConn<D::Conn>) {
        let mut state = self.lock();
        if state.closed {
            state.active_count -= 1;
            drop(state);
            conn.conn.close();
            return;
        }
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(Ok(conn)) {
                Ok(()) => return,
                // waiter cancelled; its slot goes to the next in line
                Err(Ok(returned)) => conn = returned,
                Err(Err(_)) => return,
            }
        }
        state.active_count -= 1;
        state.idle.push(conn);
    }

    /// Drop a broken connection and, if someone is waiting on the freed
    /// slot, try to open a replacement for the head waiter.
    async fn discard(&self, mut conn: PooledConn<D::Conn>) {
        tracing::debug!(conn_id = conn.id, "discarding connection");
        conn.conn.close();

        let reopen = {
            let mut state = self.lock();
            state.active_count -= 1;
            if !state.closed && !state.waiters.is_empty() && state.active_count < self.max_size
            {
                state.active_count += 1;
                true
            } else {
                false
            }
        };
        if !reopen {
            return;
        }

        match self.open_connection().await {
            Ok(fresh) => self.hand_back(fresh),
            Err(e) => {
                let waiter = {
                    let mut state = self.lock();
                    state.active_count -= 1;
                    state.waiters.pop_front()
                };
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(e));
                }
            }
        }
    }
}
