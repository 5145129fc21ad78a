use sqljudge_core::config::parse_config;
use sqljudge_core::executor::ExecutionLimits;
use sqljudge_core::model::Side;
use sqljudge_core::{ErrorKind, JudgeEngine, JudgeRequest, VerdictStatus};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::tempdir;

const ENDLESS: &str =
    "WITH RECURSIVE r(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM r) SELECT count(*) AS n FROM r";

fn engine(dir: &Path, pool_size: usize) -> anyhow::Result<JudgeEngine> {
    engine_with(dir, pool_size, 100)
}

fn engine_with(dir: &Path, pool_size: usize, acquire_ms: u64) -> anyhow::Result<JudgeEngine> {
    rusqlite::Connection::open(dir.join("tiny.db"))?
        .execute_batch("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2);")?;
    let yaml = format!(
        "engine:\n  pool_size: {pool_size}\n  acquire_timeout_ms: {acquire_ms}\n  timeout_ms: 30000\n  \
         reference_policy: fresh\ndatasets:\n  - key: ds_tiny\n    target: tiny.db\n"
    );
    let cfg = parse_config(&yaml, &dir.join("judge.yaml"), true)?;
    JudgeEngine::from_config(&cfg)
}

async fn wait_for_idle(engine: &JudgeEngine, key: &str, expected: usize) -> anyhow::Result<()> {
    let backend = engine.backend(key)?;
    let deadline = Instant::now() + Duration::from_secs(5);
    while backend.available_connections() != expected {
        anyhow::ensure!(
            Instant::now() < deadline,
            "pool did not drain: {} of {} free",
            backend.available_connections(),
            expected
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_interrupts_and_releases_the_connection() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path(), 2)?;

    let started = Instant::now();
    let v = engine
        .judge(&JudgeRequest::new("ds_tiny", "SELECT 1 AS n", ENDLESS).with_timeout_ms(200))
        .await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(v.status, VerdictStatus::Error);
    assert_eq!(v.reason, Some(ErrorKind::ExecutionTimeout));
    assert_eq!(v.failed_side, Some(Side::Candidate));
    assert!(v.message.contains("200ms"));

    wait_for_idle(&engine, "ds_tiny", 2).await?;

    let v = engine
        .judge(&JudgeRequest::new("ds_tiny", "SELECT n FROM t", "SELECT n FROM t ORDER BY n DESC"))
        .await;
    assert!(v.is_pass(), "{}", v.message);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn saturated_pool_fails_fast() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path(), 1)?;
    let backend = engine.backend("ds_tiny")?.clone();

    let limits = ExecutionLimits {
        timeout: Duration::from_millis(1_000),
        max_rows: 10,
    };
    let holder = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.execute(ENDLESS, &limits).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = backend.execute("SELECT 1", &limits).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert!(err.to_string().contains("ds_tiny"));

    let held = holder.await?.unwrap_err();
    assert_eq!(held.kind(), ErrorKind::ExecutionTimeout);
    wait_for_idle(&engine, "ds_tiny", 1).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_interrupts_running_statements() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path(), 1)?;
    let backend = engine.backend("ds_tiny")?.clone();

    let limits = ExecutionLimits {
        timeout: Duration::from_secs(30),
        max_rows: 10,
    };
    let started = Instant::now();
    let running = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.execute(ENDLESS, &limits).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    engine.shutdown();

    let err = running.await?.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(err.kind(), ErrorKind::InternalFault);

    let v = engine
        .judge(&JudgeRequest::new("ds_tiny", "SELECT 1", "SELECT 1"))
        .await;
    assert_eq!(v.reason, Some(ErrorKind::InternalFault));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn elapsed_excludes_waiting_for_the_reference() -> anyhow::Result<()> {
    let dir = tempdir()?;
    // One connection: the candidate has to wait for the reference to finish.
    let engine = engine_with(dir.path(), 1, 30_000)?;
    let slow = "WITH RECURSIVE r(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM r WHERE n < 3000000) \
                SELECT count(*) AS c FROM r";

    let started = Instant::now();
    let v = engine
        .judge(&JudgeRequest::new("ds_tiny", slow, "SELECT 1 AS c"))
        .await;
    let total = started.elapsed();

    assert_eq!(v.status, VerdictStatus::Fail, "{}", v.message);
    assert!(total >= Duration::from_millis(100), "reference finished in {total:?}");
    assert!(
        u128::from(v.elapsed_ms) * 2 < total.as_millis(),
        "candidate charged {}ms of a {}ms judgment",
        v.elapsed_ms,
        total.as_millis()
    );
    Ok(())
}
