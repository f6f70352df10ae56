use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use testresult::TestResult;

use crate::shared::*;
use kiq::{Manager, WorkerRegistry};

#[tokio::test]
async fn test_basic_processing() -> TestResult {
    setup();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkerRegistry::new();
    registry.register("PerformWorker", CountWorker { counter: Arc::clone(&counter) });

    let manager = Manager::start(config(&random_string()).queue("default"), registry).await?;
    manager.enqueue("default", "PerformWorker", vec![]).await?;

    assert!(
        wait_for(Duration::from_secs(1), || counter.load(Ordering::SeqCst) == 1).await,
        "job was not processed within 1s"
    );

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_per_queue_concurrency() -> TestResult {
    setup();
    let slow_done = Arc::new(AtomicUsize::new(0));
    let fast_done = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkerRegistry::new();
    registry.register("SlowWorker", SleepWorker { completed: Arc::clone(&slow_done) });
    registry.register("FastWorker", SleepWorker { completed: Arc::clone(&fast_done) });

    let manager = Manager::start(
        config(&random_string())
            .queue_with_concurrency("q1", 1)
            .queue_with_concurrency("q2", 20)
            .poll_timeout(Duration::from_millis(5)),
        registry,
    )
    .await?;

    // Three 80ms sleepers run serially under concurrency 1; four 100ms
    // sleepers run in parallel under concurrency 20.
    for _ in 0..3 {
        manager.enqueue("q1", "SlowWorker", vec![serde_json::json!(80)]).await?;
    }
    for _ in 0..4 {
        manager.enqueue("q2", "FastWorker", vec![serde_json::json!(100)]).await?;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(slow_done.load(Ordering::SeqCst), 2, "q1 must run serially");
    assert_eq!(fast_done.load(Ordering::SeqCst), 4, "q2 must run in parallel");

    manager.shutdown().await?;
    assert_eq!(slow_done.load(Ordering::SeqCst), 3, "shutdown drains in-flight jobs");
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_stops_consumption() -> TestResult {
    setup();
    let ns = random_string();
    let kept = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkerRegistry::new();
    registry.register("KeptWorker", CountWorker { counter: Arc::clone(&kept) });
    registry.register("RemovedWorker", CountWorker { counter: Arc::clone(&removed) });

    let manager = Manager::start(config(&ns).queue("q1"), registry).await?;
    manager.subscribe("to_remove", 10).await?;
    manager.unsubscribe("to_remove").await?;

    manager.enqueue("q1", "KeptWorker", vec![]).await?;
    manager.enqueue("to_remove", "RemovedWorker", vec![]).await?;

    assert!(
        wait_for(Duration::from_secs(1), || kept.load(Ordering::SeqCst) == 1).await,
        "subscribed queue must keep running"
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(removed.load(Ordering::SeqCst), 0, "unsubscribed queue must not be consumed");

    // the job stays in Redis for a future subscriber
    assert_eq!(manager.api().queue_len("to_remove").await?, 1);

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_subscribe_at_runtime() -> TestResult {
    setup();
    let counter = Arc::new(AtomicUsize::new(0));

    let mut registry = WorkerRegistry::new();
    registry.register("LateWorker", CountWorker { counter: Arc::clone(&counter) });

    let manager = Manager::start(config(&random_string()), registry).await?;
    manager.enqueue("late", "LateWorker", vec![]).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    manager.subscribe("late", 5).await?;
    assert!(
        wait_for(Duration::from_secs(1), || counter.load(Ordering::SeqCst) == 1).await,
        "job must run once the queue is subscribed"
    );

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_method_selector_reaches_worker() -> TestResult {
    setup();
    let methods: Arc<std::sync::Mutex<Vec<Option<String>>>> = Arc::default();

    struct RecordingWorker {
        methods: Arc<std::sync::Mutex<Vec<Option<String>>>>,
    }

    #[async_trait::async_trait]
    impl kiq::Worker for RecordingWorker {
        async fn perform(&self, ctx: &kiq::JobContext) -> Result<(), kiq::WorkerError> {
            self.methods.lock().unwrap().push(ctx.method.clone());
            Ok(())
        }
    }

    let mut registry = WorkerRegistry::new();
    registry.register("Reports.Builder", RecordingWorker { methods: Arc::clone(&methods) });

    let manager = Manager::start(config(&random_string()).queue("default"), registry).await?;
    manager.enqueue("default", "Reports.Builder/weekly", vec![]).await?;
    manager.enqueue("default", "Reports.Builder", vec![]).await?;

    assert!(
        wait_for(Duration::from_secs(1), || methods.lock().unwrap().len() == 2).await,
        "both jobs must be dispatched"
    );
    let seen = methods.lock().unwrap().clone();
    assert!(seen.contains(&Some("weekly".to_string())));
    assert!(seen.contains(&None));

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_two_managers_coexist() -> TestResult {
    setup();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let mut registry_a = WorkerRegistry::new();
    registry_a.register("Worker", CountWorker { counter: Arc::clone(&first) });
    let mut registry_b = WorkerRegistry::new();
    registry_b.register("Worker", CountWorker { counter: Arc::clone(&second) });

    let ns_a = random_string();
    let ns_b = random_string();
    let manager_a = Manager::start(config(&ns_a).name("a").queue("default"), registry_a).await?;
    let manager_b = Manager::start(config(&ns_b).name("b").queue("default"), registry_b).await?;

    manager_a.enqueue("default", "Worker", vec![]).await?;

    assert!(wait_for(Duration::from_secs(1), || first.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(second.load(Ordering::SeqCst), 0, "namespaces must be isolated");

    manager_a.shutdown().await?;
    manager_b.shutdown().await?;
    Ok(())
}
