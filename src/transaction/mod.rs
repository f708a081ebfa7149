//! Scoped transaction handle and the retrying transaction orchestrator.

mod manager;

pub use manager::run_transaction;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::driver::WireDriver;
use crate::error::PgValetError;
use crate::executor;
use crate::pool::PooledConn;
use crate::results::Row;
use crate::types::SqlValue;

pub(crate) type TxCallback = Box<dyn FnOnce() -> Result<(), PgValetError> + Send>;

#[derive(Default)]
struct CallbackQueues {
    on_commit: Vec<TxCallback>,
    on_rollback: Vec<TxCallback>,
}

struct TxInner<D: WireDriver> {
    conn: tokio::sync::Mutex<Option<PooledConn<D::Conn>>>,
    callbacks: Mutex<CallbackQueues>,
    open: AtomicBool,
}

/// Handle bound to one connection and one in-flight transaction.
///
/// The orchestrator hands a clone into the user callback; every statement
/// issued through it runs on the transaction's connection. The handle is
/// closed when the attempt finishes, so a clone stashed beyond the callback
/// fails with `NotInTransaction` instead of touching a recycled connection.
pub struct Transaction<D: WireDriver> {
    inner: Arc<TxInner<D>>,
}

impl<D: WireDriver> Clone for Transaction<D> {
    fn clone(&self) -> Self {
        Transaction {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: WireDriver> Transaction<D> {
    pub(crate) fn new(conn: PooledConn<D::Conn>) -> Self {
        Transaction {
            inner: Arc::new(TxInner {
                conn: tokio::sync::Mutex::new(Some(conn)),
                callbacks: Mutex::new(CallbackQueues::default()),
                open: AtomicBool::new(true),
            }),
        }
    }

    fn callbacks(&self) -> MutexGuard<'_, CallbackQueues> {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute a SELECT on the transaction's connection, returning all rows.
    ///
    /// # Errors
    /// `NotInTransaction` if the handle has outlived its attempt; otherwise
    /// see [`executor::execute`].
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(PgValetError::NotInTransaction)?;
        executor::query_rows(&mut **conn, sql, params).await
    }

    /// First row of a SELECT, if any.
    ///
    /// # Errors
    /// See [`Transaction::query`].
    pub async fn fetch_one(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Row>, PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(PgValetError::NotInTransaction)?;
        executor::fetch_one(&mut **conn, sql, params).await
    }

    /// First column of the first row, if any.
    ///
    /// # Errors
    /// See [`Transaction::query`].
    pub async fn fetch_value(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<SqlValue>, PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(PgValetError::NotInTransaction)?;
        executor::fetch_value(&mut **conn, sql, params).await
    }

    /// Execute a DML statement, returning the rows-affected count.
    ///
    /// # Errors
    /// See [`Transaction::query`].
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(PgValetError::NotInTransaction)?;
        executor::execute_dml(&mut **conn, sql, params).await
    }

    /// Escape hatch: run a closure against the raw wire connection.
    ///
    /// # Errors
    /// `NotInTransaction` if the handle has outlived its attempt.
    pub async fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut D::Conn) -> R,
    ) -> Result<R, PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(PgValetError::NotInTransaction)?;
        Ok(f(&mut **conn))
    }

    /// Register a callback to run after COMMIT succeeds, in insertion order.
    ///
    /// # Errors
    /// `NotInTransaction` if the handle has outlived its attempt.
    pub fn on_commit<F>(&self, callback: F) -> Result<(), PgValetError>
    where
        F: FnOnce() -> Result<(), PgValetError> + Send + 'static,
    {
        if !self.inner.open.load(Ordering::Acquire) {
            return Err(PgValetError::NotInTransaction);
        }
        self.callbacks().on_commit.push(Box::new(callback));
        Ok(())
    }

    /// Register a callback to run after the transaction rolls back.
    ///
    /// # Errors
    /// `NotInTransaction` if the handle has outlived its attempt.
    pub fn on_rollback<F>(&self, callback: F) -> Result<(), PgValetError>
    where
        F: FnOnce() -> Result<(), PgValetError> + Send + 'static,
    {
        if !self.inner.open.load(Ordering::Acquire) {
            return Err(PgValetError::NotInTransaction);
        }
        self.callbacks().on_rollback.push(Box::new(callback));
        Ok(())
    }

    pub(crate) async fn run_control(&self, sql: &str) -> Result<(), PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(PgValetError::NotInTransaction)?;
        executor::run_command(&mut **conn, sql).await
    }

    pub(crate) fn close_handle(&self) {
        self.inner.open.store(false, Ordering::Release);
    }

    pub(crate) async fn take_conn(&self) -> Option<PooledConn<D::Conn>> {
        self.inner.conn.lock().await.take()
    }

    pub(crate) fn drain_commit_callbacks(&self) -> Vec<TxCallback> {
        std::mem::take(&mut self.callbacks().on_commit)
    }

    pub(crate) fn drain_rollback_callbacks(&self) -> Vec<TxCallback> {
        std::mem::take(&mut self.callbacks().on_rollback)
    }
}
