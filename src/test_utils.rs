//! Scripted wire driver for tests and benchmarks.
//!
//! `FakeDriver` implements the full wire seam in memory: transaction
//! control is tracked per connection (statements buffer between BEGIN and
//! COMMIT and vanish on ROLLBACK), responses can be canned per statement
//! pattern, and failures can be injected at connect or statement level.
//! Tests inspect the statement log and the applied-statement journal
//! instead of a live server.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::config::PgConfig;
use crate::driver::{ConnStatus, ResultStatus, TxStatus, WireConnection, WireDriver, WireResult};
use crate::error::PgValetError;
use crate::types::SqlValue;

/// One statement the driver received, post-normalization.
#[derive(Debug, Clone)]
pub struct SentStatement {
    pub conn_id: u64,
    pub sql: String,
    pub params: Vec<SqlValue>,
}

struct FailRule {
    pattern: String,
    message: String,
    /// None fails forever; Some(n) fails the next n matches.
    remaining: Option<u32>,
}

#[derive(Default)]
struct DriverState {
    next_conn_id: u64,
    connect_failures: u32,
    busy_polls: u32,
    canned: Vec<(String, WireResult)>,
    failing: Vec<FailRule>,
    killed: HashSet<u64>,
    sent: Vec<SentStatement>,
    applied: Vec<String>,
    open_now: usize,
    peak_open: usize,
    total_opened: usize,
}

/// In-memory wire driver with scriptable behavior.
#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<DriverState>>,
}

/// A config that passes validation; the fake driver never reads it.
#[must_use]
pub fn test_config() -> PgConfig {
    PgConfig::builder()
        .host("localhost")
        .user("tester")
        .dbname("testdb")
        .finish()
        .expect("static test config is valid")
}

impl FakeDriver {
    #[must_use]
    pub fn new() -> Self {
        FakeDriver::default()
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    /// Report busy for `n` polls after each send, exercising the poll loop.
    pub fn set_busy_polls(&self, n: u32) {
        self.lock().busy_polls = n;
    }

    /// Answer statements containing `pattern` with a canned result.
    pub fn respond(&self, pattern: impl Into<String>, result: WireResult) {
        self.lock().canned.push((pattern.into(), result));
    }

    /// Convenience: canned row-bearing response.
    pub fn respond_rows(
        &self,
        pattern: impl Into<String>,
        columns: &[&str],
        rows: Vec<Vec<SqlValue>>,
    ) {
        let columns = columns.iter().map(|c| (*c).to_string()).collect();
        self.respond(pattern, WireResult::tuples(columns, rows));
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_matching(&self, pattern: impl Into<String>, message: impl Into<String>) {
        self.lock().failing.push(FailRule {
            pattern: pattern.into(),
            message: message.into(),
            remaining: None,
        });
    }

    /// Fail the next `times` statements containing `pattern`.
    pub fn fail_times(&self, pattern: impl Into<String>, message: impl Into<String>, times: u32) {
        self.lock().failing.push(FailRule {
            pattern: pattern.into(),
            message: message.into(),
            remaining: Some(times),
        });
    }

    /// Flip a connection to dead; its next health probe reports Bad.
    pub fn kill(&self, conn_id: u64) {
        self.lock().killed.insert(conn_id);
    }

    /// Every statement sent, in order, across all connections.
    #[must_use]
    pub fn sent(&self) -> Vec<SentStatement> {
        self.lock().sent.clone()
    }

    /// Statements that took effect: autocommit statements plus buffered
    /// transaction statements whose COMMIT succeeded.
    #[must_use]
    pub fn applied(&self) -> Vec<String> {
        self.lock().applied.clone()
    }

    /// Count of applied statements containing `pattern`.
    #[must_use]
    pub fn applied_matching(&self, pattern: &str) -> usize {
        self.lock()
            .applied
            .iter()
            .filter(|sql| sql.contains(pattern))
            .count()
    }

    #[must_use]
    pub fn open_now(&self) -> usize {
        self.lock().open_now
    }

    /// High-water mark of simultaneously open connections.
    #[must_use]
    pub fn peak_open(&self) -> usize {
        self.lock().peak_open
    }

    #[must_use]
    pub fn total_opened(&self) -> usize {
        self.lock().total_opened
    }
}

#[async_trait]
impl WireDriver for FakeDriver {
    type Conn = FakeConn;

    async fn connect(&self, _config: &PgConfig) -> Result<FakeConn, PgValetError> {
        let mut state = self.lock();
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(PgValetError::ConnectionOpenFailed(
                "injected connect failure".to_string(),
            ));
        }
        state.next_conn_id += 1;
        state.total_opened += 1;
        state.open_now += 1;
        state.peak_open = state.peak_open.max(state.open_now);
        Ok(FakeConn {
            id: state.next_conn_id,
            state: Arc::clone(&self.state),
            closed: false,
            tx_status: TxStatus::Idle,
            tx_buffer: Vec::new(),
            pending: None,
            busy_left: AtomicU32::new(0),
            last_error: String::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Begin,
    Commit,
    Rollback,
    Other,
}

fn classify(sql: &str) -> Kind {
    let first = sql.trim_start().split_whitespace().next().unwrap_or("");
    if first.eq_ignore_ascii_case("BEGIN") {
        Kind::Begin
    } else if first.eq_ignore_ascii_case("COMMIT") {
        Kind::Commit
    } else if first.eq_ignore_ascii_case("ROLLBACK") {
        Kind::Rollback
    } else {
        Kind::Other
    }
}

fn is_dml(sql: &str) -> bool {
    let first = sql.trim_start().split_whitespace().next().unwrap_or("");
    first.eq_ignore_ascii_case("INSERT")
        || first.eq_ignore_ascii_case("UPDATE")
        || first.eq_ignore_ascii_case("DELETE")
}

/// One scripted connection.
pub struct FakeConn {
    id: u64,
    state: Arc<Mutex<DriverState>>,
    closed: bool,
    tx_status: TxStatus,
    tx_buffer: Vec<String>,
    pending: Option<(Kind, WireResult, String)>,
    busy_left: AtomicU32,
    last_error: String,
}

impl FakeConn {
    /// Driver-side connection id, for `FakeDriver::kill`.
    #[must_use]
    pub fn wire_id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&mut self, sql: &str, params: &[SqlValue]) -> Result<(), PgValetError> {
        if self.closed || self.lock().killed.contains(&self.id) {
            return Err(PgValetError::query(sql, params, "connection is closed"));
        }
        if self.pending.is_some() {
            return Err(PgValetError::query(
                sql,
                params,
                "another command is already in flight",
            ));
        }

        let kind = classify(sql);
        let in_error = self.tx_status == TxStatus::InError;
        let (busy_polls, result) = {
            let mut state = self.lock();
            state.sent.push(SentStatement {
                conn_id: self.id,
                sql: sql.to_string(),
                params: params.to_vec(),
            });

            let injected = state
                .failing
                .iter_mut()
                .find(|rule| sql.contains(&rule.pattern) && rule.remaining != Some(0))
                .map(|rule| {
                    if let Some(n) = rule.remaining.as_mut() {
                        *n -= 1;
                    }
                    rule.message.clone()
                });

            let result = if let Some(message) = injected {
                WireResult::failure(ResultStatus::FatalError, message)
            } else if in_error && kind == Kind::Other {
                WireResult::failure(
                    ResultStatus::FatalError,
                    "current transaction is aborted, commands ignored until end of transaction block",
                )
            } else {
                match kind {
                    Kind::Begin | Kind::Commit | Kind::Rollback => WireResult::command_ok(0),
                    Kind::Other => {
                        if let Some((_, canned)) = state
                            .canned
                            .iter()
                            .find(|(pattern, _)| sql.contains(pattern))
                        {
                            canned.clone()
                        } else if is_dml(sql) {
                            WireResult::command_ok(1)
                        } else {
                            WireResult::tuples(Vec::new(), Vec::new())
                        }
                    }
                }
            };
            (state.busy_polls, result)
        };

        self.busy_left.store(busy_polls, Ordering::Relaxed);
        self.pending = Some((kind, result, sql.to_string()));
        Ok(())
    }
}

#[async_trait]
impl WireConnection for FakeConn {
    fn send_query(&mut self, sql: &str) -> Result<(), PgValetError> {
        self.start(sql, &[])
    }

    fn send_query_params(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<(), PgValetError> {
        self.start(sql, params)
    }

    fn is_busy(&self) -> bool {
        self.busy_left
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn get_result(&mut self) -> Option<WireResult> {
        let (kind, result, sql) = self.pending.take()?;

        if result.status.is_failure() {
            self.last_error = result.error.clone().unwrap_or_default();
            if matches!(self.tx_status, TxStatus::InTransaction | TxStatus::Active) {
                self.tx_status = TxStatus::InError;
            }
            return Some(result);
        }

        match kind {
            Kind::Begin => self.tx_status = TxStatus::InTransaction,
            Kind::Commit => {
                if self.tx_status == TxStatus::InError {
                    self.tx_buffer.clear();
                } else {
                    let mut buffered = std::mem::take(&mut self.tx_buffer);
                    self.lock().applied.append(&mut buffered);
                }
                self.tx_status = TxStatus::Idle;
            }
            Kind::Rollback => {
                self.tx_buffer.clear();
                self.tx_status = TxStatus::Idle;
            }
            Kind::Other => {
                if self.tx_status == TxStatus::InTransaction {
                    self.tx_buffer.push(sql);
                } else {
                    self.lock().applied.push(sql);
                }
            }
        }
        Some(result)
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }

    fn status(&self) -> ConnStatus {
        if self.closed || self.lock().killed.contains(&self.id) {
            ConnStatus::Bad
        } else {
            ConnStatus::Ok
        }
    }

    fn transaction_status(&self) -> TxStatus {
        self.tx_status
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.lock().open_now -= 1;
        }
    }
}

impl Drop for FakeConn {
    fn drop(&mut self) {
        self.close();
    }
}
