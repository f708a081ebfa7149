use pg_valet::prelude::*;
use pg_valet::test_utils::{FakeDriver, test_config};

fn client_with(driver: &FakeDriver) -> PgClient<FakeDriver> {
    PgClient::with_driver(driver.clone(), test_config(), ClientOptions::new()).unwrap()
}

#[tokio::test]
async fn run_pins_every_statement_to_one_connection() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);

    client
        .run(|session| async move {
            session
                .execute("INSERT INTO log (v) VALUES (?)", &[SqlValue::Int(1)])
                .await?;
            session
                .execute("INSERT INTO log (v) VALUES (?)", &[SqlValue::Int(2)])
                .await?;
            session.query("SELECT * FROM log", &[]).await?;
            Ok(())
        })
        .await
        .unwrap();

    let conn_ids: std::collections::HashSet<u64> =
        driver.sent().into_iter().map(|s| s.conn_id).collect();
    assert_eq!(conn_ids.len(), 1);

    let stats = client.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 1);
}

#[tokio::test]
async fn run_returns_the_connection_even_when_the_closure_fails() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);

    let err = client
        .run(|_session| async move {
            Err::<(), _>(PgValetError::BadArgument("user gave up".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PgValetError::BadArgument(_)));
    assert_eq!(client.stats().active, 0);
    assert_eq!(client.stats().idle, 1);
}

#[tokio::test]
async fn session_stashed_beyond_run_is_refused() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);
    let stash: std::sync::Arc<std::sync::Mutex<Option<Session<FakeDriver>>>> =
        std::sync::Arc::new(std::sync::Mutex::new(None));

    let stash_in = stash.clone();
    client
        .run(move |session| {
            let stash = stash_in.clone();
            async move {
                *stash.lock().unwrap() = Some(session.clone());
                Ok(())
            }
        })
        .await
        .unwrap();

    let stale = stash.lock().unwrap().take().unwrap();
    assert!(stale.query("SELECT 1", &[]).await.is_err());
}

#[tokio::test]
async fn sequential_calls_reuse_the_pooled_connection() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);

    client.execute("INSERT INTO t (v) VALUES (1)", &[]).await.unwrap();
    client.query("SELECT * FROM t", &[]).await.unwrap();
    client.fetch_value("SELECT count(*) FROM t", &[]).await.unwrap();

    assert_eq!(driver.total_opened(), 1);
}

#[tokio::test]
async fn connect_failure_surfaces_and_leaves_the_pool_consistent() {
    let driver = FakeDriver::new();
    driver.fail_next_connects(1);
    let client = client_with(&driver);

    let err = client.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, PgValetError::ConnectionOpenFailed(_)));
    assert_eq!(client.stats().active, 0);

    // the next call opens normally
    client.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(driver.total_opened(), 1);
}

#[tokio::test]
async fn closed_client_rejects_every_operation() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);
    client.query("SELECT 1", &[]).await.unwrap();

    client.close();
    assert!(client.stats().closed);
    assert!(matches!(
        client.query("SELECT 1", &[]).await.unwrap_err(),
        PgValetError::PoolClosed
    ));
    assert!(matches!(
        client.execute("INSERT INTO t (v) VALUES (1)", &[]).await.unwrap_err(),
        PgValetError::PoolClosed
    ));
    let err = client
        .transaction(|_trx| async move { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, PgValetError::TransactionFailed { .. }));

    // close is idempotent at the facade too
    client.close();
}

#[tokio::test]
async fn client_from_conninfo_validates_configuration() {
    assert!(
        PgClient::from_conninfo("host=h user=u dbname=d", ClientOptions::new()).is_ok()
    );
    let err = PgClient::from_conninfo("host=h user=u dbname=d nope=1", ClientOptions::new())
        .unwrap_err();
    assert!(matches!(err, PgValetError::Configuration(_)));
}

#[tokio::test]
async fn zero_sized_pool_is_rejected() {
    let driver = FakeDriver::new();
    let err = PgClient::with_driver(
        driver,
        test_config(),
        ClientOptions::new().with_max_size(0),
    )
    .unwrap_err();
    assert!(matches!(err, PgValetError::Configuration(_)));
}

#[tokio::test]
async fn clones_share_the_pool() {
    let driver = FakeDriver::new();
    let client = client_with(&driver);
    let other = client.clone();

    client.query("SELECT 1", &[]).await.unwrap();
    other.query("SELECT 2", &[]).await.unwrap();
    assert_eq!(driver.total_opened(), 1);

    client.close();
    assert!(matches!(
        other.query("SELECT 3", &[]).await.unwrap_err(),
        PgValetError::PoolClosed
    ));
}
