use std::time::Duration;

use thiserror::Error;

use crate::types::SqlValue;

/// One failed attempt recorded by the transaction retry loop.
#[derive(Debug, Clone)]
pub struct AttemptError {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Rendered error message for the attempt.
    pub error: String,
    /// Wall-clock time the attempt took, acquire through release.
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum PgValetError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("pool is closed")]
    PoolClosed,

    #[error("failed to open connection: {0}")]
    ConnectionOpenFailed(String),

    #[error("bad placeholders: {0}")]
    BadPlaceholders(String),

    #[error("query failed: {message}; sql: {sql}")]
    Query {
        /// The SQL as the caller supplied it, before placeholder normalization.
        sql: String,
        params: Vec<SqlValue>,
        message: String,
    },

    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<PgValetError>>,
    },

    #[error("transaction failed after {attempts} attempt(s)")]
    TransactionFailed {
        attempts: u32,
        /// Per-attempt failure records, in attempt order.
        history: Vec<AttemptError>,
        #[source]
        source: Box<PgValetError>,
    },

    #[error("not inside a transaction")]
    NotInTransaction,

    #[error("bad argument: {0}")]
    BadArgument(String),
}

impl PgValetError {
    /// Wrap an underlying failure as a transaction-phase error.
    #[must_use]
    pub fn transaction(message: impl Into<String>, source: PgValetError) -> Self {
        PgValetError::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn query(sql: &str, params: &[SqlValue], message: impl Into<String>) -> Self {
        PgValetError::Query {
            sql: sql.to_string(),
            params: params.to_vec(),
            message: message.into(),
        }
    }
}
