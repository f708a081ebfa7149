//! Default wire driver backed by tokio-postgres.
//!
//! tokio-postgres multiplexes on the runtime's readiness notifications, so
//! each command runs as a spawned task; `is_busy` reports whether that task
//! is still in flight and `get_result` collects its output. The executor's
//! poll loop stays the portable contract on top.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures_util::{TryStreamExt, pin_mut};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, NoTls};
use tokio_util::bytes;

use crate::config::{PgConfig, SslMode};
use crate::driver::{ConnStatus, ResultStatus, TxStatus, WireConnection, WireDriver, WireResult};
use crate::error::PgValetError;
use crate::types::SqlValue;

/// Driver factory for tokio-postgres connections without TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPgDriver;

impl TokioPgDriver {
    #[must_use]
    pub fn new() -> Self {
        TokioPgDriver
    }
}

#[async_trait]
impl WireDriver for TokioPgDriver {
    type Conn = PgWireConn;

    async fn connect(&self, config: &PgConfig) -> Result<PgWireConn, PgValetError> {
        let pg_config = to_pg_config(config)?;
        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| PgValetError::ConnectionOpenFailed(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection task ended with error");
            }
        });
        Ok(PgWireConn {
            client: Arc::new(client),
            pending: None,
            tx_status: TxStatus::Idle,
            last_error: String::new(),
            closed: false,
        })
    }
}

fn to_pg_config(config: &PgConfig) -> Result<tokio_postgres::Config, PgValetError> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .user(&config.user)
        .dbname(&config.dbname);
    if let Some(password) = &config.password {
        pg.password(password);
    }
    if let Some(port) = config.port {
        pg.port(port);
    }
    if let Some(seconds) = config.connect_timeout {
        pg.connect_timeout(Duration::from_secs(seconds.into()));
    }
    match config.sslmode {
        None => {}
        Some(SslMode::Disable) => {
            pg.ssl_mode(tokio_postgres::config::SslMode::Disable);
        }
        Some(SslMode::Allow | SslMode::Prefer) => {
            pg.ssl_mode(tokio_postgres::config::SslMode::Prefer);
        }
        Some(mode) => {
            return Err(PgValetError::ConnectionOpenFailed(format!(
                "sslmode={mode} requires a TLS stack; this driver is built without one"
            )));
        }
    }
    Ok(pg)
}

#[derive(Debug, Clone, Copy)]
enum StatementKind {
    Begin,
    Commit,
    Rollback,
    Other,
}

fn classify(sql: &str) -> StatementKind {
    let first = sql.trim_start().split_whitespace().next().unwrap_or("");
    if first.eq_ignore_ascii_case("BEGIN") || first.eq_ignore_ascii_case("START") {
        StatementKind::Begin
    } else if first.eq_ignore_ascii_case("COMMIT") || first.eq_ignore_ascii_case("END") {
        StatementKind::Commit
    } else if first.eq_ignore_ascii_case("ROLLBACK") || first.eq_ignore_ascii_case("ABORT") {
        StatementKind::Rollback
    } else {
        StatementKind::Other
    }
}

/// One tokio-postgres session in asynchronous operation mode.
///
/// The wire protocol does not report transaction state through the client
/// API, so the connection tracks it from the transaction-control statements
/// it executes and from failing results inside a transaction block.
pub struct PgWireConn {
    client: Arc<Client>,
    pending: Option<(StatementKind, JoinHandle<WireResult>)>,
    tx_status: TxStatus,
    last_error: String,
    closed: bool,
}

impl PgWireConn {
    fn start(&mut self, sql: &str, params: Vec<SqlValue>) -> Result<(), PgValetError> {
        if self.closed || self.client.is_closed() {
            return Err(PgValetError::query(sql, &params, "connection is closed"));
        }
        if self.pending.is_some() {
            return Err(PgValetError::query(
                sql,
                &params,
                "another command is already in flight",
            ));
        }
        let kind = classify(sql);
        let client = Arc::clone(&self.client);
        let sql = sql.to_string();
        let handle = tokio::spawn(async move { run_statement(&client, &sql, &params).await });
        self.pending = Some((kind, handle));
        Ok(())
    }

    fn observe(&mut self, kind: StatementKind, result: &WireResult) {
        if result.status.is_failure() {
            if let Some(message) = &result.error {
                self.last_error = message.clone();
            }
            if matches!(self.tx_status, TxStatus::InTransaction | TxStatus::Active) {
                self.tx_status = TxStatus::InError;
            }
            return;
        }
        match kind {
            StatementKind::Begin => self.tx_status = TxStatus::InTransaction,
            StatementKind::Commit | StatementKind::Rollback => self.tx_status = TxStatus::Idle,
            StatementKind::Other => {}
        }
    }
}

#[async_trait]
impl WireConnection for PgWireConn {
    fn send_query(&mut self, sql: &str) -> Result<(), PgValetError> {
        self.start(sql, Vec::new())
    }

    fn send_query_params(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<(), PgValetError> {
        self.start(sql, params.to_vec())
    }

    fn is_busy(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    async fn get_result(&mut self) -> Option<WireResult> {
        let (kind, handle) = self.pending.take()?;
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                WireResult::failure(ResultStatus::BadResponse, format!("query task failed: {e}"))
            }
        };
        self.observe(kind, &result);
        Some(result)
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }

    fn status(&self) -> ConnStatus {
        if self.closed || self.client.is_closed() {
            ConnStatus::Bad
        } else {
            ConnStatus::Ok
        }
    }

    fn transaction_status(&self) -> TxStatus {
        self.tx_status
    }

    fn close(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
        self.closed = true;
    }
}

async fn run_statement(client: &Client, sql: &str, params: &[SqlValue]) -> WireResult {
    let stmt = match client.prepare(sql).await {
        Ok(stmt) => stmt,
        Err(e) => return wire_failure(&e),
    };
    let columns: Vec<String> = stmt
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();

    let stream = match client
        .query_raw(&stmt, params.iter().map(|p| p as &dyn ToSql))
        .await
    {
        Ok(stream) => stream,
        Err(e) => return wire_failure(&e),
    };
    pin_mut!(stream);

    let mut rows: Vec<Vec<SqlValue>> = Vec::new();
    loop {
        match stream.try_next().await {
            Ok(Some(row)) => {
                let mut values = Vec::with_capacity(columns.len());
                for idx in 0..columns.len() {
                    match extract_value(&row, idx) {
                        Ok(value) => values.push(value),
                        Err(e) => return wire_failure(&e),
                    }
                }
                rows.push(values);
            }
            Ok(None) => break,
            Err(e) => return wire_failure(&e),
        }
    }
    let affected = stream.rows_affected().unwrap_or(0);

    if columns.is_empty() {
        WireResult::command_ok(affected)
    } else {
        let mut result = WireResult::tuples(columns, rows);
        result.rows_affected = affected;
        result
    }
}

fn wire_failure(e: &tokio_postgres::Error) -> WireResult {
    match e.as_db_error() {
        Some(db) => WireResult::failure(ResultStatus::FatalError, db.message()),
        None => WireResult::failure(ResultStatus::BadResponse, e.to_string()),
    }
}

/// Extract one cell into a [`SqlValue`] based on the column's type name.
fn extract_value(
    row: &tokio_postgres::Row,
    idx: usize,
) -> Result<SqlValue, tokio_postgres::Error> {
    let type_name = row.columns()[idx].type_().name();
    match type_name {
        "int2" => {
            let v: Option<i16> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, |v| SqlValue::Int(v.into())))
        }
        "int4" => {
            let v: Option<i32> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, |v| SqlValue::Int(v.into())))
        }
        "int8" => {
            let v: Option<i64> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, SqlValue::Int))
        }
        "float4" => {
            let v: Option<f32> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, |v| SqlValue::Float(v.into())))
        }
        "float8" => {
            let v: Option<f64> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, SqlValue::Float))
        }
        "bool" => {
            let v: Option<bool> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, SqlValue::Bool))
        }
        "timestamp" => {
            let v: Option<NaiveDateTime> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, SqlValue::Timestamp))
        }
        "timestamptz" => {
            let v: Option<chrono::DateTime<chrono::Utc>> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, |v| SqlValue::Timestamp(v.naive_utc())))
        }
        "json" | "jsonb" => {
            let v: Option<JsonValue> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, SqlValue::Json))
        }
        "bytea" => {
            let v: Option<Vec<u8>> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, SqlValue::Bytes))
        }
        _ => {
            // text family and anything else the server renders as text
            let v: Option<String> = row.try_get(idx)?;
            Ok(v.map_or(SqlValue::Null, SqlValue::Text))
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            SqlValue::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            SqlValue::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            SqlValue::Text(s) => s.to_sql(ty, out),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            SqlValue::Timestamp(dt) => match *ty {
                Type::TIMESTAMPTZ => {
                    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(*dt, chrono::Utc)
                        .to_sql(ty, out)
                }
                _ => dt.to_sql(ty, out),
            },
            SqlValue::Json(json) => json.to_sql(ty, out),
            SqlValue::Bytes(bytes) => bytes.to_sql(ty, out),
            SqlValue::Null => Ok(IsNull::Yes),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::CHAR
                | Type::NAME
                | Type::BOOL
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::DATE
                | Type::JSON
                | Type::JSONB
                | Type::BYTEA
        )
    }

    to_sql_checked!();
}
