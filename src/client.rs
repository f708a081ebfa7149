//! Thin client surface over the pool, executor, and transaction manager.

use std::future::Future;
use std::sync::Arc;

use crate::config::PgConfig;
use crate::driver::WireDriver;
use crate::error::PgValetError;
use crate::executor;
use crate::pool::{Pool, PoolStats, PooledConn};
use crate::results::Row;
use crate::transaction::{Transaction, run_transaction};
use crate::types::{IsolationLevel, SqlValue};

#[cfg(feature = "postgres")]
use crate::driver::postgres::TokioPgDriver;

/// Pool and retry settings for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Maximum concurrent connections.
    pub max_size: usize,
    /// Default transaction attempts for [`PgClient::transaction`].
    pub attempts: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            max_size: 4,
            attempts: 1,
        }
    }
}

impl ClientOptions {
    #[must_use]
    pub fn new() -> Self {
        ClientOptions::default()
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Asynchronous PostgreSQL client: pooled connections, shaped queries,
/// retried transactions.
///
/// Cloning is cheap and shares the underlying pool.
pub struct PgClient<D: WireDriver> {
    pool: Arc<Pool<D>>,
    attempts: u32,
}

impl<D: WireDriver> Clone for PgClient<D> {
    fn clone(&self) -> Self {
        PgClient {
            pool: Arc::clone(&self.pool),
            attempts: self.attempts,
        }
    }
}

impl<D: WireDriver> std::fmt::Debug for PgClient<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgClient")
            .field("attempts", &self.attempts)
            .finish()
    }
}

#[cfg(feature = "postgres")]
impl PgClient<TokioPgDriver> {
    /// Client over the default tokio-postgres driver.
    ///
    /// # Errors
    /// `PgValetError::Configuration` / `BadArgument` for invalid options.
    pub fn new(config: PgConfig, options: ClientOptions) -> Result<Self, PgValetError> {
        Self::with_driver(TokioPgDriver::new(), config, options)
    }

    /// Client from a space-delimited `key=value` connection string.
    ///
    /// # Errors
    /// `PgValetError::Configuration` for malformed connection strings.
    pub fn from_conninfo(conninfo: &str, options: ClientOptions) -> Result<Self, PgValetError> {
        Self::new(PgConfig::parse(conninfo)?, options)
    }
}

impl<D: WireDriver> PgClient<D> {
    /// Client over a caller-supplied wire driver.
    ///
    /// # Errors
    /// `Configuration` if `max_size` is zero; `BadArgument` if the default
    /// `attempts` is zero.
    pub fn with_driver(
        driver: D,
        config: PgConfig,
        options: ClientOptions,
    ) -> Result<Self, PgValetError> {
        if options.attempts == 0 {
            return Err(PgValetError::BadArgument(
                "default transaction attempts must be at least 1".to_string(),
            ));
        }
        Ok(PgClient {
            pool: Arc::new(Pool::new(driver, config, options.max_size)?),
            attempts: options.attempts,
        })
    }

    /// Run a SELECT and return every row.
    ///
    /// # Errors
    /// Pool errors (`PoolClosed`, `ConnectionOpenFailed`) or executor errors
    /// (`BadPlaceholders`, `QueryError`).
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, PgValetError> {
        let mut conn = self.pool.acquire().await?;
        let result = executor::query_rows(&mut *conn, sql, params).await;
        self.pool.release(conn).await;
        result
    }

    /// First row of a SELECT, if any.
    ///
    /// # Errors
    /// See [`PgClient::query`].
    pub async fn fetch_one(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Row>, PgValetError> {
        let mut conn = self.pool.acquire().await?;
        let result = executor::fetch_one(&mut *conn, sql, params).await;
        self.pool.release(conn).await;
        result
    }

    /// First column of the first row, if any.
    ///
    /// # Errors
    /// See [`PgClient::query`].
    pub async fn fetch_value(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<SqlValue>, PgValetError> {
        let mut conn = self.pool.acquire().await?;
        let result = executor::fetch_value(&mut *conn, sql, params).await;
        self.pool.release(conn).await;
        result
    }

    /// Run a DML statement and return the rows-affected count.
    ///
    /// # Errors
    /// See [`PgClient::query`].
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, PgValetError> {
        let mut conn = self.pool.acquire().await?;
        let result = executor::execute_dml(&mut *conn, sql, params).await;
        self.pool.release(conn).await;
        result
    }

    /// Borrow one connection for the duration of the closure.
    ///
    /// The closure receives a [`Session`] bound to that connection; every
    /// statement issued through it reuses the same session. The connection
    /// goes back to the pool when the closure finishes, whatever the
    /// outcome.
    ///
    /// # Errors
    /// Pool errors, plus whatever the closure returns.
    pub async fn run<T, F, Fut>(&self, f: F) -> Result<T, PgValetError>
    where
        F: FnOnce(Session<D>) -> Fut,
        Fut: Future<Output = Result<T, PgValetError>>,
    {
        let conn = self.pool.acquire().await?;
        let session = Session::new(conn);
        let result = f(session.clone()).await;
        if let Some(conn) = session.take_conn().await {
            self.pool.release(conn).await;
        }
        result
    }

    /// Run the callback in a transaction with the client's default attempt
    /// count and the server's default isolation.
    ///
    /// # Errors
    /// See [`run_transaction`].
    pub async fn transaction<T, F, Fut>(&self, f: F) -> Result<T, PgValetError>
    where
        F: Fn(Transaction<D>) -> Fut,
        Fut: Future<Output = Result<T, PgValetError>>,
    {
        run_transaction(&self.pool, self.attempts, None, f).await
    }

    /// Run the callback in a transaction with explicit attempts and
    /// isolation level.
    ///
    /// # Errors
    /// See [`run_transaction`].
    pub async fn transaction_with<T, F, Fut>(
        &self,
        attempts: u32,
        isolation: Option<IsolationLevel>,
        f: F,
    ) -> Result<T, PgValetError>
    where
        F: Fn(Transaction<D>) -> Fut,
        Fut: Future<Output = Result<T, PgValetError>>,
    {
        run_transaction(&self.pool, attempts, isolation, f).await
    }

    /// Pool occupancy snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close the pool. Idempotent; queued waiters are rejected.
    pub fn close(&self) {
        self.pool.close();
    }

    /// The shared pool, for direct acquire/release.
    #[must_use]
    pub fn pool(&self) -> &Arc<Pool<D>> {
        &self.pool
    }
}

struct SessionInner<D: WireDriver> {
    conn: tokio::sync::Mutex<Option<PooledConn<D::Conn>>>,
}

/// Handle to one borrowed connection inside [`PgClient::run`].
///
/// Unlike [`Transaction`], a session carries no transaction semantics: each
/// statement runs in autocommit mode on the same connection.
pub struct Session<D: WireDriver> {
    inner: Arc<SessionInner<D>>,
}

impl<D: WireDriver> Clone for Session<D> {
    fn clone(&self) -> Self {
        Session {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: WireDriver> Session<D> {
    fn new(conn: PooledConn<D::Conn>) -> Self {
        Session {
            inner: Arc::new(SessionInner {
                conn: tokio::sync::Mutex::new(Some(conn)),
            }),
        }
    }

    fn stale() -> PgValetError {
        PgValetError::BadArgument("session used outside its run scope".to_string())
    }

    /// Run a SELECT on the session's connection, returning all rows.
    ///
    /// # Errors
    /// `BadArgument` if the session has outlived its `run` scope; otherwise
    /// executor errors.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(Self::stale)?;
        executor::query_rows(&mut **conn, sql, params).await
    }

    /// First row of a SELECT, if any.
    ///
    /// # Errors
    /// See [`Session::query`].
    pub async fn fetch_one(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Row>, PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(Self::stale)?;
        executor::fetch_one(&mut **conn, sql, params).await
    }

    /// First column of the first row, if any.
    ///
    /// # Errors
    /// See [`Session::query`].
    pub async fn fetch_value(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<SqlValue>, PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(Self::stale)?;
        executor::fetch_value(&mut **conn, sql, params).await
    }

    /// Run a DML statement, returning the rows-affected count.
    ///
    /// # Errors
    /// See [`Session::query`].
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, PgValetError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(Self::stale)?;
        executor::execute_dml(&mut **conn, sql, params).await
    }

    async fn take_conn(&self) -> Option<PooledConn<D::Conn>> {
        self.inner.conn.lock().await.take()
    }
}
