use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use pg_valet::prelude::*;
use pg_valet::test_utils::{FakeDriver, test_config};

fn client_with(driver: &FakeDriver) -> PgClient<FakeDriver> {
    PgClient::with_driver(driver.clone(), test_config(), ClientOptions::new()).unwrap()
}

fn sent_sql(driver: &FakeDriver) -> Vec<String> {
    driver.sent().into_iter().map(|s| s.sql).collect()
}

#[tokio::test]
async fn successful_transaction_commits_and_fires_commit_callbacks_in_order() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);
    let fired = Arc::new(Mutex::new(Vec::new()));
    let rolled_back = Arc::new(AtomicBool::new(false));

    let fired_in = fired.clone();
    let rolled_back_in = rolled_back.clone();
    let out = client
        .transaction(move |trx| {
            let fired = fired_in.clone();
            let rolled_back = rolled_back_in.clone();
            async move {
                trx.execute("INSERT INTO audit (v) VALUES (?)", &[SqlValue::Int(1)])
                    .await?;
                for n in [1, 2, 3] {
                    let fired = fired.clone();
                    trx.on_commit(move || {
                        fired.lock().unwrap().push(n);
                        Ok(())
                    })?;
                }
                trx.on_rollback(move || {
                    rolled_back.store(true, Ordering::SeqCst);
                    Ok(())
                })?;
                Ok(42)
            }
        })
        .await
        .unwrap();

    assert_eq!(out, 42);
    assert_eq!(*fired.lock().unwrap(), vec![1, 2, 3]);
    assert!(!rolled_back.load(Ordering::SeqCst));
    assert_eq!(driver.applied_matching("INSERT INTO audit"), 1);

    let sql = sent_sql(&driver);
    assert_eq!(sql.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(sql.last().map(String::as_str), Some("COMMIT"));
}

#[tokio::test]
async fn user_error_rolls_back_fires_rollback_callbacks_and_surfaces_failure() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);
    let flag = Arc::new(AtomicBool::new(false));

    let flag_in = flag.clone();
    let err = client
        .transaction(move |trx| {
            let flag = flag_in.clone();
            async move {
                trx.execute("INSERT INTO t (v) VALUES (?)", &[SqlValue::Int(7)])
                    .await?;
                trx.on_rollback(move || {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                })?;
                Err::<(), _>(PgValetError::BadArgument("user bailed out".into()))
            }
        })
        .await
        .unwrap_err();

    assert!(flag.load(Ordering::SeqCst));
    assert_eq!(driver.applied_matching("INSERT"), 0);
    match err {
        PgValetError::TransactionFailed {
            attempts, history, ..
        } => {
            assert_eq!(attempts, 1);
            assert_eq!(history.len(), 1);
            assert!(history[0].error.contains("user bailed out"));
        }
        other => panic!("expected TransactionFailed, got {other:?}"),
    }
    assert!(sent_sql(&driver).contains(&"ROLLBACK".to_string()));
}

#[tokio::test]
async fn retry_succeeds_after_transient_user_failures() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);
    let counter = Arc::new(AtomicU32::new(0));

    let counter_in = counter.clone();
    client
        .transaction_with(3, None, move |trx| {
            let counter = counter_in.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    return Err(PgValetError::BadArgument("nope".into()));
                }
                trx.execute(
                    "INSERT INTO people (name) VALUES (?)",
                    &[SqlValue::Text("David".into())],
                )
                .await?;
                Ok(())
            }
        })
        .await
        .unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(driver.applied_matching("INSERT INTO people"), 1);
}

#[tokio::test]
async fn exhausted_retries_carry_full_attempt_history() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);

    let err = client
        .transaction_with(3, None, |_trx| async move {
            Err::<(), _>(PgValetError::BadArgument("always fails".into()))
        })
        .await
        .unwrap_err();

    match err {
        PgValetError::TransactionFailed {
            attempts,
            history,
            source,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(history.len(), 3);
            for (i, record) in history.iter().enumerate() {
                assert_eq!(record.attempt as usize, i + 1);
                assert!(record.error.contains("always fails"));
            }
            assert!(matches!(*source, PgValetError::BadArgument(_)));
        }
        other => panic!("expected TransactionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn zero_attempts_is_rejected_up_front() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);

    let err = client
        .transaction_with(0, None, |_trx| async move { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, PgValetError::BadArgument(_)));
    assert!(driver.sent().is_empty());
}

#[tokio::test]
async fn isolation_level_is_folded_into_begin() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);

    client
        .transaction_with(1, Some(IsolationLevel::RepeatableRead), |trx| async move {
            trx.execute("INSERT INTO t (v) VALUES (1)", &[]).await?;
            Ok(())
        })
        .await
        .unwrap();

    let sql = sent_sql(&driver);
    assert_eq!(
        sql.first().map(String::as_str),
        Some("BEGIN ISOLATION LEVEL REPEATABLE READ")
    );
    // no separate SET TRANSACTION statement
    assert!(!sql.iter().any(|s| s.contains("SET TRANSACTION")));
}

#[tokio::test]
async fn begin_failure_is_retried_on_a_fresh_attempt() {
    let driver = FakeDriver::new();
    driver.fail_times("BEGIN", "injected begin failure", 1);
    let client = client_with(&driver);

    client
        .transaction_with(2, None, |trx| async move {
            trx.execute("INSERT INTO t (v) VALUES (1)", &[]).await?;
            Ok(())
        })
        .await
        .unwrap();

    let begins = sent_sql(&driver)
        .iter()
        .filter(|s| s.starts_with("BEGIN"))
        .count();
    assert_eq!(begins, 2);
    assert_eq!(driver.applied_matching("INSERT"), 1);
}

#[tokio::test]
async fn commit_failure_rolls_back_and_counts_as_attempt_failure() {
    let driver = FakeDriver::new();
    driver.fail_times("COMMIT", "injected commit failure", 1);
    let client = client_with(&driver);
    let rolled_back = Arc::new(AtomicBool::new(false));

    let rolled_back_in = rolled_back.clone();
    let err = client
        .transaction(move |trx| {
            let rolled_back = rolled_back_in.clone();
            async move {
                trx.execute("INSERT INTO t (v) VALUES (1)", &[]).await?;
                trx.on_rollback(move || {
                    rolled_back.store(true, Ordering::SeqCst);
                    Ok(())
                })?;
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert!(rolled_back.load(Ordering::SeqCst));
    assert_eq!(driver.applied_matching("INSERT"), 0);
    match err {
        PgValetError::TransactionFailed { history, .. } => {
            assert!(history[0].error.contains("COMMIT failed"));
        }
        other => panic!("expected TransactionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_commit_callback_surfaces_as_transaction_error() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);
    let second_ran = Arc::new(AtomicBool::new(false));

    let second_ran_in = second_ran.clone();
    let err = client
        .transaction(move |trx| {
            let second_ran = second_ran_in.clone();
            async move {
                trx.on_commit(|| Err(PgValetError::BadArgument("callback boom".into())))?;
                trx.on_commit(move || {
                    second_ran.store(true, Ordering::SeqCst);
                    Ok(())
                })?;
                Ok(())
            }
        })
        .await
        .unwrap_err();

    // every callback still runs; the first failure wins
    assert!(second_ran.load(Ordering::SeqCst));
    match err {
        PgValetError::TransactionFailed { history, .. } => {
            assert!(history[0].error.contains("commit callback failed"));
        }
        other => panic!("expected TransactionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn pool_errors_inside_the_loop_are_retryable() {
    let driver = FakeDriver::new();
    driver.fail_next_connects(1);
    let client = client_with(&driver);

    client
        .transaction_with(2, None, |trx| async move {
            trx.execute("INSERT INTO t (v) VALUES (1)", &[]).await?;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(driver.applied_matching("INSERT"), 1);
}

#[tokio::test]
async fn handle_stashed_beyond_the_callback_is_refused() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);
    let stash: Arc<Mutex<Option<Transaction<FakeDriver>>>> = Arc::new(Mutex::new(None));

    let stash_in = stash.clone();
    client
        .transaction(move |trx| {
            let stash = stash_in.clone();
            async move {
                *stash.lock().unwrap() = Some(trx.clone());
                Ok(())
            }
        })
        .await
        .unwrap();

    let stale = stash.lock().unwrap().take().unwrap();
    assert!(matches!(
        stale.on_commit(|| Ok(())),
        Err(PgValetError::NotInTransaction)
    ));
    assert!(matches!(
        stale.query("SELECT 1", &[]).await,
        Err(PgValetError::NotInTransaction)
    ));
}

#[tokio::test]
async fn transaction_connection_returns_to_the_pool() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);

    client
        .transaction(|trx| async move {
            trx.execute("INSERT INTO t (v) VALUES (1)", &[]).await?;
            Ok(())
        })
        .await
        .unwrap();

    let stats = client.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 1);

    // the pooled connection left the transaction cleanly and is reusable
    client.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(driver.total_opened(), 1);
}

#[tokio::test]
async fn statements_inside_the_callback_share_one_connection() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);

    client
        .transaction(|trx| async move {
            trx.execute("INSERT INTO t (v) VALUES (1)", &[]).await?;
            let rows = trx.query("SELECT * FROM t", &[]).await?;
            let _ = trx.fetch_value("SELECT count(*) FROM t", &[]).await?;
            assert!(rows.is_empty());
            Ok(())
        })
        .await
        .unwrap();

    let conn_ids: std::collections::HashSet<u64> =
        driver.sent().into_iter().map(|s| s.conn_id).collect();
    assert_eq!(conn_ids.len(), 1);
}
