use std::future::Future;
use std::time::Instant;

use crate::driver::WireDriver;
use crate::error::{AttemptError, PgValetError};
use crate::pool::Pool;
use crate::transaction::{Transaction, TxCallback};
use crate::types::IsolationLevel;

/// Run a user callback inside a retried transaction.
///
/// Each attempt acquires its own connection, opens a transaction (with the
/// isolation level folded into BEGIN when supplied), invokes the callback
/// with a [`Transaction`] handle, and commits. Any failure rolls back,
/// fires the rollback callbacks, and retries on a fresh connection until
/// `attempts` is exhausted.
///
/// # Errors
/// `BadArgument` when `attempts` is zero. Otherwise the terminal error is
/// `TransactionFailed`, carrying the per-attempt history and the last
/// underlying failure as its source.
pub async fn run_transaction<D, T, F, Fut>(
    pool: &Pool<D>,
    attempts: u32,
    isolation: Option<IsolationLevel>,
    f: F,
) -> Result<T, PgValetError>
where
    D: WireDriver,
    F: Fn(Transaction<D>) -> Fut,
    Fut: Future<Output = Result<T, PgValetError>>,
{
    if attempts == 0 {
        return Err(PgValetError::BadArgument(
            "transaction attempts must be at least 1".to_string(),
        ));
    }

    let mut history = Vec::new();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let started = Instant::now();
        match run_attempt(pool, isolation, &f).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "transaction attempt failed");
                history.push(AttemptError {
                    attempt,
                    error: e.to_string(),
                    elapsed: started.elapsed(),
                });
                if attempt >= attempts {
                    return Err(PgValetError::TransactionFailed {
                        attempts,
                        history,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}

async fn run_attempt<D, T, F, Fut>(
    pool: &Pool<D>,
    isolation: Option<IsolationLevel>,
    f: &F,
) -> Result<T, PgValetError>
where
    D: WireDriver,
    F: Fn(Transaction<D>) -> Fut,
    Fut: Future<Output = Result<T, PgValetError>>,
{
    let conn = pool.acquire().await?;
    let tx = Transaction::new(conn);

    let begin = match isolation {
        Some(level) => format!("BEGIN ISOLATION LEVEL {}", level.as_sql()),
        None => "BEGIN".to_string(),
    };
    if let Err(e) = tx.run_control(&begin).await {
        teardown(pool, &tx).await;
        return Err(PgValetError::transaction("BEGIN failed", e));
    }

    match f(tx.clone()).await {
        Ok(value) => match tx.run_control("COMMIT").await {
            Ok(()) => {
                let callbacks = fire_callbacks(tx.drain_commit_callbacks(), "commit");
                teardown(pool, &tx).await;
                callbacks.map(|()| value)
            }
            Err(e) => {
                let error = PgValetError::transaction("COMMIT failed", e);
                Err(abort_attempt(pool, &tx, error).await)
            }
        },
        Err(user_error) => Err(abort_attempt(pool, &tx, user_error).await),
    }
}

/// Roll back a failed attempt, fire rollback callbacks, and tear down.
///
/// The rollback itself is best-effort: if it fails, the pool discards the
/// still-dirty session at release. A failing rollback callback supersedes
/// the attempt error, mirroring the commit-side policy.
async fn abort_attempt<D: WireDriver>(
    pool: &Pool<D>,
    tx: &Transaction<D>,
    error: PgValetError,
) -> PgValetError {
    if let Err(e) = tx.run_control("ROLLBACK").await {
        tracing::debug!(error = %e, "rollback failed after aborted attempt");
    }
    let callbacks = fire_callbacks(tx.drain_rollback_callbacks(), "rollback");
    teardown(pool, tx).await;
    match callbacks {
        Ok(()) => error,
        Err(callback_error) => {
            tracing::warn!(original = %error, "rollback callback failure supersedes attempt error");
            callback_error
        }
    }
}

async fn teardown<D: WireDriver>(pool: &Pool<D>, tx: &Transaction<D>) {
    tx.close_handle();
    if let Some(conn) = tx.take_conn().await {
        pool.release(conn).await;
    }
}

/// Invoke callbacks in insertion order; every callback runs even if an
/// earlier one failed, and the first failure becomes the result.
fn fire_callbacks(callbacks: Vec<TxCallback>, phase: &str) -> Result<(), PgValetError> {
    let mut first_failure = None;
    for callback in callbacks {
        if let Err(e) = callback() {
            tracing::warn!(phase, error = %e, "transaction callback failed");
            if first_failure.is_none() {
                first_failure = Some(e);
            }
        }
    }
    match first_failure {
        Some(e) => Err(PgValetError::transaction(
            format!("{phase} callback failed"),
            e,
        )),
        None => Ok(()),
    }
}
