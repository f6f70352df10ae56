use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::distr::{Alphanumeric, SampleString};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use kiq::{Config, JobContext, WorkerError};

#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("worker blew up: {0}")]
    Boom(String),
}

/// Counts every invocation.
#[derive(Clone, Default)]
pub struct CountWorker {
    pub counter: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl kiq::Worker for CountWorker {
    async fn perform(&self, _: &JobContext) -> Result<(), WorkerError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sleeps for `args[0]` milliseconds, then counts the completion.
#[derive(Clone, Default)]
pub struct SleepWorker {
    pub completed: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl kiq::Worker for SleepWorker {
    async fn perform(&self, ctx: &JobContext) -> Result<(), WorkerError> {
        let millis = ctx.args().first().and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails.
pub struct FailWorker;

#[async_trait::async_trait]
impl kiq::Worker for FailWorker {
    async fn perform(&self, _: &JobContext) -> Result<(), WorkerError> {
        Err(TestError::Boom("nope".to_string()).into())
    }
}

/// Always panics.
pub struct PanicWorker;

#[async_trait::async_trait]
impl kiq::Worker for PanicWorker {
    async fn perform(&self, _: &JobContext) -> Result<(), WorkerError> {
        panic!("worker panicked on purpose");
    }
}

pub fn setup() {
    dotenvy::from_filename(".env.test").ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

pub fn random_string() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 16)
}

/// Config pointed at the test Redis under a fresh namespace, with tight
/// timings so tests settle quickly.
pub fn config(namespace: &str) -> Config {
    Config::new()
        .url(redis_url())
        .namespace(namespace)
        .poll_timeout(Duration::from_millis(10))
        .scheduler_poll_timeout(Duration::from_millis(50))
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Async variant of [`wait_for`] for Redis-backed conditions.
pub async fn wait_for_async<F, Fut>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}
