/*!
 * pg-valet - Asynchronous PostgreSQL pooling and transactions
 *
 * This crate couples a bounded connection pool to a transaction
 * orchestrator: at most N concurrent connections to one database, fair
 * FIFO queueing when the pool is saturated, retryable transactions with
 * configurable isolation levels, deferred commit/rollback callbacks, and a
 * non-blocking send/poll/fetch query pipeline over the wire protocol's
 * asynchronous operation mode.
 *
 * # Features
 *
 * - Bounded pool with strict FIFO waiter hand-off and health validation
 * - Placeholder normalization: `?` markers become `$1`, `$2`, ... outside
 *   string literals, so both dialects work against the same API
 * - Shaped results: all rows, first row, first value, or rows affected
 * - Transactions with retry, isolation levels, and ordered
 *   commit/rollback callbacks
 *
 * # Example
 *
 * ```rust,no_run
 * use pg_valet::prelude::*;
 *
 * async fn demo() -> Result<(), PgValetError> {
 *     let client = PgClient::from_conninfo(
 *         "host=localhost user=app dbname=appdb",
 *         ClientOptions::new().with_max_size(8),
 *     )?;
 *
 *     client
 *         .execute("INSERT INTO events (name) VALUES (?)", &[SqlValue::Text("boot".into())])
 *         .await?;
 *
 *     let moved = client
 *         .transaction_with(3, Some(IsolationLevel::Serializable), |trx| async move {
 *             trx.execute("UPDATE accounts SET balance = balance - $1 WHERE id = $2",
 *                 &[SqlValue::Int(100), SqlValue::Int(1)]).await?;
 *             trx.execute("UPDATE accounts SET balance = balance + $1 WHERE id = $2",
 *                 &[SqlValue::Int(100), SqlValue::Int(2)]).await?;
 *             trx.on_commit(|| {
 *                 println!("transfer done");
 *                 Ok(())
 *             })?;
 *             Ok(100)
 *         })
 *         .await?;
 *     assert_eq!(moved, 100);
 *
 *     client.close();
 *     Ok(())
 * }
 * ```
 */

#![forbid(unsafe_code)]

// Core modules
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod placeholders;
pub mod pool;
pub mod results;
pub mod transaction;
pub mod types;

// Scripted driver - only compiled with the test-utils feature
#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-export everything that should be part of the public API
pub mod prelude {
    //! Convenient imports for common functionality.

    pub use crate::client::{ClientOptions, PgClient, Session};
    pub use crate::config::{PgConfig, PgConfigBuilder, SslMode};
    pub use crate::error::{AttemptError, PgValetError};
    pub use crate::results::{Row, Shape, Shaped};
    pub use crate::transaction::Transaction;
    pub use crate::types::{IsolationLevel, SqlValue};
    pub use crate::driver::WireResult;

    #[cfg(feature = "postgres")]
    pub use crate::driver::postgres::TokioPgDriver;
}

// Direct exports of frequently used types for simplicity
pub use client::{ClientOptions, PgClient, Session};
pub use config::{PgConfig, PgConfigBuilder, SslMode};
pub use driver::{ConnStatus, ResultStatus, TxStatus, WireConnection, WireDriver, WireResult};
pub use error::{AttemptError, PgValetError};
pub use placeholders::normalize_placeholders;
pub use pool::{Pool, PoolStats, PooledConn};
pub use results::{Row, Shape, Shaped};
pub use transaction::{Transaction, run_transaction};
pub use types::{IsolationLevel, SqlValue};

#[cfg(feature = "postgres")]
pub use driver::postgres::TokioPgDriver;
