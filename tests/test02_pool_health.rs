use pg_valet::prelude::*;
use pg_valet::test_utils::{FakeDriver, test_config};
use pg_valet::{executor, pool::Pool};
use std::sync::Arc;

fn pool_with(driver: &FakeDriver, max_size: usize) -> Arc<Pool<FakeDriver>> {
    Arc::new(Pool::new(driver.clone(), test_config(), max_size).unwrap())
}

#[tokio::test]
async fn dead_idle_connection_is_discarded_on_acquire() {
    let driver = FakeDriver::new();
    let pool = pool_with(&driver, 2);

    let conn = pool.acquire().await.unwrap();
    let wire_id = conn.wire_id();
    pool.release(conn).await;
    assert_eq!(pool.stats().idle, 1);

    driver.kill(wire_id);

    // the dead idle connection must never reach a caller
    let replacement = pool.acquire().await.unwrap();
    assert_ne!(replacement.wire_id(), wire_id);
    assert_eq!(driver.total_opened(), 2);
    pool.release(replacement).await;
}

#[tokio::test]
async fn dead_connection_at_release_is_replaced_for_head_waiter() {
    let driver = FakeDriver::new();
    let pool = pool_with(&driver, 1);

    let held = pool.acquire().await.unwrap();
    let held_id = held.wire_id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let conn = pool.acquire().await.unwrap();
            let id = conn.wire_id();
            pool.release(conn).await;
            id
        })
    };
    while pool.stats().waiting < 1 {
        tokio::task::yield_now().await;
    }

    driver.kill(held_id);
    pool.release(held).await;

    let served_id = waiter.await.unwrap();
    assert_ne!(served_id, held_id);
    assert_eq!(driver.total_opened(), 2);
}

#[tokio::test]
async fn waiter_is_rejected_when_replacement_cannot_open() {
    let driver = FakeDriver::new();
    let pool = pool_with(&driver, 1);

    let held = pool.acquire().await.unwrap();
    let held_id = held.wire_id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    while pool.stats().waiting < 1 {
        tokio::task::yield_now().await;
    }

    driver.kill(held_id);
    driver.fail_next_connects(1);
    pool.release(held).await;

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PgValetError::ConnectionOpenFailed(_)));
    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 0);
}

#[tokio::test]
async fn stale_transaction_is_rolled_back_on_release() {
    let driver = FakeDriver::new();
    let pool = pool_with(&driver, 1);

    let mut conn = pool.acquire().await.unwrap();
    executor::execute_dml(&mut *conn, "BEGIN", &[]).await.unwrap();
    executor::execute_dml(&mut *conn, "INSERT INTO t (v) VALUES (1)", &[])
        .await
        .unwrap();
    pool.release(conn).await;

    // the session was returned mid-transaction: a ROLLBACK cleans it up
    let sent: Vec<String> = driver.sent().into_iter().map(|s| s.sql).collect();
    assert_eq!(sent.last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(driver.applied_matching("INSERT"), 0);

    // and the connection survives to be reused
    assert_eq!(pool.stats().idle, 1);
    let again = pool.acquire().await.unwrap();
    pool.release(again).await;
    assert_eq!(driver.total_opened(), 1);
}

#[tokio::test]
async fn failed_transaction_block_is_also_rolled_back_on_release() {
    let driver = FakeDriver::new();
    let pool = pool_with(&driver, 1);
    driver.fail_matching("SELECT doomed", "synthetic failure");

    let mut conn = pool.acquire().await.unwrap();
    executor::execute_dml(&mut *conn, "BEGIN", &[]).await.unwrap();
    assert!(
        executor::query_rows(&mut *conn, "SELECT doomed", &[])
            .await
            .is_err()
    );
    pool.release(conn).await;

    let sent: Vec<String> = driver.sent().into_iter().map(|s| s.sql).collect();
    assert_eq!(sent.last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn close_rejects_queued_waiters_and_subsequent_acquires() {
    let driver = FakeDriver::new();
    let pool = pool_with(&driver, 1);

    let held = pool.acquire().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    while pool.stats().waiting < 1 {
        tokio::task::yield_now().await;
    }

    pool.close();
    assert!(matches!(
        waiter.await.unwrap().unwrap_err(),
        PgValetError::PoolClosed
    ));

    let stats = pool.stats();
    assert!(stats.closed);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.waiting, 0);

    assert!(matches!(
        pool.acquire().await.unwrap_err(),
        PgValetError::PoolClosed
    ));

    // a straggler released after close is discarded, not pooled
    pool.release(held).await;
    assert_eq!(pool.stats().idle, 0);
    assert_eq!(driver.open_now(), 0);

    // close is idempotent
    pool.close();
}

#[tokio::test]
async fn close_tears_down_idle_connections() {
    let driver = FakeDriver::new();
    let pool = pool_with(&driver, 2);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    pool.release(a).await;
    pool.release(b).await;
    assert_eq!(driver.open_now(), 2);

    pool.close();
    assert_eq!(driver.open_now(), 0);
    assert_eq!(pool.stats().idle, 0);
}
