//! Non-blocking query execution over a wire connection.
//!
//! The executor is stateless: it borrows a connection, drives one command
//! to completion, and shapes the result. It never acquires, releases, or
//! closes connections.

use std::time::Duration;

use crate::driver::{WireConnection, WireResult};
use crate::error::PgValetError;
use crate::placeholders::normalize_placeholders;
use crate::results::{Row, Shape, Shaped};
use crate::types::SqlValue;

/// First poll pause after sending a command.
const POLL_INITIAL: Duration = Duration::from_micros(100);
/// Upper bound on the poll pause.
const POLL_CAP: Duration = Duration::from_micros(1000);
/// Growth factor per poll iteration.
const POLL_GROWTH: f64 = 1.2;

/// Execute one statement and shape the result as requested.
///
/// # Errors
/// `BadPlaceholders` for malformed placeholder usage, `QueryError` when the
/// wire reports a failing result (carrying the original SQL, the parameters,
/// and the server's error text).
pub async fn execute<C: WireConnection>(
    conn: &mut C,
    sql: &str,
    params: &[SqlValue],
    shape: Shape,
) -> Result<Shaped, PgValetError> {
    let result = run_query(conn, sql, params).await?;
    Ok(match shape {
        Shape::Rows => Shaped::Rows(rows_from(result)),
        Shape::FirstRow => Shaped::FirstRow(first_row_from(result)),
        Shape::FirstValue => Shaped::FirstValue(first_value_from(result)),
        Shape::Affected => Shaped::Affected(result.rows_affected),
    })
}

/// Execute a SELECT and return every row.
///
/// # Errors
/// See [`execute`].
pub async fn query_rows<C: WireConnection>(
    conn: &mut C,
    sql: &str,
    params: &[SqlValue],
) -> Result<Vec<Row>, PgValetError> {
    Ok(rows_from(run_query(conn, sql, params).await?))
}

/// Execute a SELECT and return the first row, if any.
///
/// # Errors
/// See [`execute`].
pub async fn fetch_one<C: WireConnection>(
    conn: &mut C,
    sql: &str,
    params: &[SqlValue],
) -> Result<Option<Row>, PgValetError> {
    Ok(first_row_from(run_query(conn, sql, params).await?))
}

/// Execute a SELECT and return the first column of the first row, if any.
///
/// # Errors
/// See [`execute`].
pub async fn fetch_value<C: WireConnection>(
    conn: &mut C,
    sql: &str,
    params: &[SqlValue],
) -> Result<Option<SqlValue>, PgValetError> {
    Ok(first_value_from(run_query(conn, sql, params).await?))
}

/// Execute a DML statement and return the rows-affected count.
///
/// Non-DML statements report 0.
///
/// # Errors
/// See [`execute`].
pub async fn execute_dml<C: WireConnection>(
    conn: &mut C,
    sql: &str,
    params: &[SqlValue],
) -> Result<u64, PgValetError> {
    Ok(run_query(conn, sql, params).await?.rows_affected)
}

/// Run a parameterless control statement (BEGIN/COMMIT/ROLLBACK).
pub(crate) async fn run_command<C: WireConnection>(
    conn: &mut C,
    sql: &str,
) -> Result<(), PgValetError> {
    run_query(conn, sql, &[]).await.map(|_| ())
}

async fn run_query<C: WireConnection>(
    conn: &mut C,
    sql: &str,
    params: &[SqlValue],
) -> Result<WireResult, PgValetError> {
    let normalized = normalize_placeholders(sql)?;
    if params.is_empty() {
        conn.send_query(&normalized)?;
    } else {
        conn.send_query_params(&normalized, params)?;
    }

    let mut pause = POLL_INITIAL;
    while conn.is_busy() {
        tokio::time::sleep(pause).await;
        pause = pause.mul_f64(POLL_GROWTH).min(POLL_CAP);
    }

    let Some(result) = conn.get_result().await else {
        return Err(PgValetError::query(sql, params, conn.last_error()));
    };
    if result.status.is_failure() {
        let message = result
            .error
            .clone()
            .unwrap_or_else(|| conn.last_error());
        return Err(PgValetError::query(sql, params, message));
    }
    Ok(result)
}

fn rows_from(result: WireResult) -> Vec<Row> {
    let columns = std::sync::Arc::new(result.columns);
    let index = Row::column_index(&columns);
    result
        .rows
        .into_iter()
        .map(|values| Row::new(std::sync::Arc::clone(&columns), std::sync::Arc::clone(&index), values))
        .collect()
}

fn first_row_from(result: WireResult) -> Option<Row> {
    rows_from(result).into_iter().next()
}

fn first_value_from(result: WireResult) -> Option<SqlValue> {
    result
        .rows
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
}
