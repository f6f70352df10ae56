use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use testresult::TestResult;

use crate::shared::*;
use kiq::{JobOptions, JobStore, Manager, WorkerRegistry};

#[tokio::test]
async fn test_backup_recovery_delivers_exactly_once() -> TestResult {
    setup();
    let ns = random_string();
    let host = random_string();
    let store = JobStore::new(&config(&ns))?;

    // Dequeue without completing: the job is stranded on the backup list,
    // as after a crash mid-process.
    store.enqueue("queue", "PerformWorker", vec![], &JobOptions::default()).await?;
    let stranded = store.dequeue_one(&host, "queue").await?;
    assert!(stranded.is_some());
    assert_eq!(store.queue_len("queue").await?, 0);

    let counter = Arc::new(AtomicUsize::new(0));
    let mut registry = WorkerRegistry::new();
    registry.register("PerformWorker", CountWorker { counter: Arc::clone(&counter) });

    let manager =
        Manager::start(config(&ns).queue("queue").node_id(&host), registry).await?;

    assert!(
        wait_for(Duration::from_secs(1), || counter.load(Ordering::SeqCst) == 1).await,
        "stranded job must be recovered and delivered"
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1, "job must be delivered exactly once");

    // The backup list is empty now; a second drain moves nothing.
    assert_eq!(store.re_enqueue_backup(&host, "queue").await?, 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_dequeue_leaves_no_gap() -> TestResult {
    setup();
    let ns = random_string();
    let host = random_string();
    let store = JobStore::new(&config(&ns))?;

    store.enqueue("q", "Worker", vec![], &JobOptions::default()).await?;

    // Before dequeue: ready queue holds it, backup does not.
    assert_eq!(store.queue_len("q").await?, 1);
    assert_eq!(store.backup_len(&host, "q").await?, 0);

    let payload = store.dequeue_one(&host, "q").await?.unwrap();

    // After dequeue: the atomic move put it on the backup list.
    assert_eq!(store.queue_len("q").await?, 0);
    assert_eq!(store.backup_len(&host, "q").await?, 1);

    store.remove_job_from_backup(&host, "q", &payload).await?;
    assert_eq!(store.backup_len(&host, "q").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_recovery_runs_per_host() -> TestResult {
    setup();
    let ns = random_string();
    let store = JobStore::new(&config(&ns))?;

    store.enqueue("q", "Worker", vec![], &JobOptions::default()).await?;
    store.enqueue("q", "Worker", vec![], &JobOptions::default()).await?;
    store.dequeue_one("node-a", "q").await?.unwrap();
    store.dequeue_one("node-b", "q").await?.unwrap();

    // Draining node-a must not touch node-b's in-flight job.
    assert_eq!(store.re_enqueue_backup("node-a", "q").await?, 1);
    assert_eq!(store.queue_len("q").await?, 1);
    assert_eq!(store.backup_len("node-b", "q").await?, 1);

    Ok(())
}
