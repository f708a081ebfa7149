//! The wire-protocol seam the pool and executor are written against.
//!
//! The crate never talks to a socket itself: everything below the executor
//! goes through [`WireDriver`] / [`WireConnection`]. The default
//! implementation is the tokio-postgres adapter in [`postgres`]; tests run
//! against the scripted driver in `test_utils`.

use async_trait::async_trait;

use crate::config::PgConfig;
use crate::error::PgValetError;
use crate::types::SqlValue;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Wire-level connection health indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// The connection is usable.
    Ok,
    /// Client-side closed, server-reset, or server-terminated.
    Bad,
}

/// Server-session transaction state as reported by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// No transaction open.
    Idle,
    /// A command is in flight outside an explicit transaction.
    Active,
    /// Inside an open, healthy transaction block.
    InTransaction,
    /// Inside a transaction block that has already failed.
    InError,
    Unknown,
}

/// Completion status of one wire result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// Command completed, no row data (INSERT, BEGIN, ...).
    CommandOk,
    /// Query completed with zero or more rows.
    TuplesOk,
    /// The statement was empty.
    EmptyQuery,
    NonFatalError,
    FatalError,
    /// The server response could not be understood.
    BadResponse,
}

impl ResultStatus {
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ResultStatus::NonFatalError | ResultStatus::FatalError | ResultStatus::BadResponse
        )
    }
}

/// One completed result fetched from the wire.
#[derive(Debug, Clone)]
pub struct WireResult {
    pub status: ResultStatus,
    /// Column names, empty for row-less results.
    pub columns: Vec<String>,
    /// Row data, one value per column.
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows-affected count from the command tag; 0 when the tag carries none.
    pub rows_affected: u64,
    /// Server error text for failure statuses.
    pub error: Option<String>,
}

impl WireResult {
    /// A row-less successful command result.
    #[must_use]
    pub fn command_ok(rows_affected: u64) -> Self {
        WireResult {
            status: ResultStatus::CommandOk,
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected,
            error: None,
        }
    }

    /// A successful row-bearing result.
    #[must_use]
    pub fn tuples(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        let rows_affected = rows.len() as u64;
        WireResult {
            status: ResultStatus::TuplesOk,
            columns,
            rows,
            rows_affected,
            error: None,
        }
    }

    /// A failed result with the server's error text.
    #[must_use]
    pub fn failure(status: ResultStatus, message: impl Into<String>) -> Self {
        WireResult {
            status,
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
            error: Some(message.into()),
        }
    }
}

/// An established connection in asynchronous operation mode.
///
/// The contract mirrors the wire protocol's async API: a send starts a
/// command, `is_busy` reports whether the result is still in flight, and
/// `get_result` fetches the completed result. The executor owns the
/// poll-to-completion loop; implementations only report state.
#[async_trait]
pub trait WireConnection: Send + 'static {
    /// Start a parameterless command.
    ///
    /// # Errors
    /// Fails if the connection cannot accept a command (closed, or one is
    /// already in flight).
    fn send_query(&mut self, sql: &str) -> Result<(), PgValetError>;

    /// Start a parameterized command with driver-side binding.
    ///
    /// # Errors
    /// Same conditions as [`WireConnection::send_query`].
    fn send_query_params(&mut self, sql: &str, params: &[SqlValue])
    -> Result<(), PgValetError>;

    /// Whether the in-flight command has not yet completed.
    fn is_busy(&self) -> bool;

    /// Fetch the completed result, or `None` if nothing is pending.
    async fn get_result(&mut self) -> Option<WireResult>;

    /// Most recent error text reported by the wire.
    fn last_error(&self) -> String;

    fn status(&self) -> ConnStatus;

    fn transaction_status(&self) -> TxStatus;

    /// Tear the connection down. Idempotent.
    fn close(&mut self);
}

/// Factory for wire connections.
#[async_trait]
pub trait WireDriver: Send + Sync + 'static {
    type Conn: WireConnection;

    /// Establish a new connection.
    ///
    /// # Errors
    /// Returns `PgValetError::ConnectionOpenFailed` when the session could
    /// not be established.
    async fn connect(&self, config: &PgConfig) -> Result<Self::Conn, PgValetError>;
}
