use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::{
    config::Config,
    error::KiqError,
    job::JobOptions,
    store::JobStore,
};

/// Standalone enqueue surface for producers that share only Redis with the
/// processing side. Identical semantics to the [`Manager`](crate::Manager)
/// enqueue methods.
///
/// # Examples
///
/// ```rust,no_run
/// use kiq::{Config, Enqueuer};
///
/// # async fn example() -> Result<(), kiq::KiqError> {
/// let enqueuer = Enqueuer::new(&Config::new().url("redis://127.0.0.1:6379"))?;
/// let jid = enqueuer
///     .enqueue("default", "MailWorker", vec![serde_json::json!("hi")])
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Enqueuer {
    store: JobStore,
}

impl Enqueuer {
    pub fn new(config: &Config) -> Result<Self, KiqError> {
        Ok(Self {
            store: JobStore::new(config)?,
        })
    }

    /// Enqueues for immediate processing; returns the jid. Fails with
    /// [`KiqError::Redis`]/[`KiqError::Pool`] when Redis is unreachable.
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<String, KiqError> {
        self.store.enqueue(queue, class, args, &JobOptions::default()).await
    }

    pub async fn enqueue_with(
        &self,
        queue: &str,
        class: &str,
        args: Vec<serde_json::Value>,
        opts: &JobOptions,
    ) -> Result<String, KiqError> {
        self.store.enqueue(queue, class, args, opts).await
    }

    /// Schedules a job `delay` from now. A zero delay still goes through the
    /// scheduled set, so a scheduler-enabled consumer must be running.
    pub async fn enqueue_in(
        &self,
        queue: &str,
        delay: Duration,
        class: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<String, KiqError> {
        self.store
            .enqueue_in(queue, delay, class, args, &JobOptions::default())
            .await
    }

    /// Schedules a job at an absolute wall-clock time.
    pub async fn enqueue_at(
        &self,
        queue: &str,
        at: DateTime<Utc>,
        class: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<String, KiqError> {
        self.store
            .enqueue_at(queue, at, class, args, &JobOptions::default())
            .await
    }
}
