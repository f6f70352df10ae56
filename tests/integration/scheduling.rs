use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use testresult::TestResult;

use crate::shared::*;
use kiq::{Enqueuer, Manager, WorkerRegistry};

#[tokio::test]
async fn test_zero_delay_delivers_through_scheduler() -> TestResult {
    setup();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkerRegistry::new();
    registry.register("PerformWorker", CountWorker { counter: Arc::clone(&counter) });

    let manager = Manager::start(
        config(&random_string()).queue("default").scheduler_enable(true),
        registry,
    )
    .await?;

    manager
        .enqueue_in("default", Duration::ZERO, "PerformWorker", vec![])
        .await?;

    assert!(
        wait_for(Duration::from_millis(500), || counter.load(Ordering::SeqCst) == 1).await,
        "zero-delay job must be promoted and run within 500ms"
    );

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_enqueue_at_in_the_past_is_due_immediately() -> TestResult {
    setup();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkerRegistry::new();
    registry.register("PerformWorker", CountWorker { counter: Arc::clone(&counter) });

    let manager = Manager::start(
        config(&random_string()).queue("default").scheduler_enable(true),
        registry,
    )
    .await?;

    manager
        .enqueue_at(
            "default",
            chrono::Utc::now() - chrono::Duration::seconds(5),
            "PerformWorker",
            vec![],
        )
        .await?;

    assert!(
        wait_for(Duration::from_secs(1), || counter.load(Ordering::SeqCst) == 1).await,
        "past-dated job must be delivered within one scheduler+pool poll"
    );

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_future_jobs_stay_scheduled() -> TestResult {
    setup();
    let ns = random_string();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkerRegistry::new();
    registry.register("PerformWorker", CountWorker { counter: Arc::clone(&counter) });

    let manager = Manager::start(
        config(&ns).queue("default").scheduler_enable(true),
        registry,
    )
    .await?;
    let api = manager.api();

    manager
        .enqueue_in("default", Duration::from_secs(3600), "PerformWorker", vec![])
        .await?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(api.schedule_len().await?, 1);
    assert_eq!(api.queue_len("default").await?, 0);

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_standalone_enqueuer_feeds_a_manager() -> TestResult {
    setup();
    let ns = random_string();
    let counter = Arc::new(AtomicUsize::new(0));

    // The producer shares nothing with the consumer but Redis.
    let enqueuer = Enqueuer::new(&config(&ns))?;

    let mut registry = WorkerRegistry::new();
    registry.register("PerformWorker", CountWorker { counter: Arc::clone(&counter) });
    let manager = Manager::start(
        config(&ns).queue("default").scheduler_enable(true),
        registry,
    )
    .await?;

    enqueuer.enqueue("default", "PerformWorker", vec![]).await?;
    enqueuer
        .enqueue_in("default", Duration::ZERO, "PerformWorker", vec![])
        .await?;

    assert!(
        wait_for(Duration::from_secs(1), || counter.load(Ordering::SeqCst) == 2).await,
        "both immediate and scheduled jobs must arrive"
    );

    manager.shutdown().await?;
    Ok(())
}
