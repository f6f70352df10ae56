use chrono::NaiveDate;

use crate::{
    config::Config,
    error::KiqError,
    job::Job,
    stats::{Process, Stats},
    store::JobStore,
};

/// Read-only queries over a namespace, plus failed-set maintenance. Used by
/// tooling and tests; can be built standalone or borrowed from a running
/// [`Manager`](crate::Manager) via [`Manager::api`](crate::Manager::api).
#[derive(Clone)]
pub struct Api {
    store: JobStore,
    stats: Stats,
}

impl Api {
    pub fn new(config: &Config) -> Result<Self, KiqError> {
        let pool = config.build_pool()?;
        Ok(Self::with_parts(
            JobStore::with_pool(pool.clone(), &config.namespace, config.max_retries),
            Stats::new(pool, &config.namespace),
        ))
    }

    pub(crate) fn with_parts(store: JobStore, stats: Stats) -> Self {
        Self { store, stats }
    }

    /// All currently registered in-flight processes.
    pub async fn processes(&self) -> Result<Vec<Process>, KiqError> {
        self.stats.processes().await
    }

    /// Finds a terminally failed job by jid (linear scan of the dead set).
    pub async fn find_failed(&self, jid: &str) -> Result<Option<Job>, KiqError> {
        self.store.find_failed(jid).await
    }

    pub async fn remove_failed(&self, jid: &str) -> Result<bool, KiqError> {
        self.store.remove_failed(jid).await
    }

    pub async fn clear_failed(&self) -> Result<(), KiqError> {
        self.store.clear_failed().await
    }

    /// Re-enqueues a dead job onto its original queue with the error
    /// metadata cleared.
    pub async fn retry_failed(&self, jid: &str) -> Result<bool, KiqError> {
        self.store.retry_failed(jid).await
    }

    pub async fn processed_count(&self) -> Result<u64, KiqError> {
        self.stats.processed_count().await
    }

    pub async fn failed_count(&self) -> Result<u64, KiqError> {
        self.stats.failed_count().await
    }

    pub async fn processed_count_for(&self, queue: &str) -> Result<u64, KiqError> {
        self.stats.processed_count_for(queue).await
    }

    pub async fn failed_count_for(&self, queue: &str) -> Result<u64, KiqError> {
        self.stats.failed_count_for(queue).await
    }

    pub async fn processed_count_on(&self, date: NaiveDate) -> Result<u64, KiqError> {
        self.stats.processed_count_on(date).await
    }

    pub async fn failed_count_on(&self, date: NaiveDate) -> Result<u64, KiqError> {
        self.stats.failed_count_on(date).await
    }

    /// Every queue name ever enqueued to or subscribed, sorted.
    pub async fn queues(&self) -> Result<Vec<String>, KiqError> {
        self.store.known_queues().await
    }

    pub async fn queue_len(&self, queue: &str) -> Result<usize, KiqError> {
        self.store.queue_len(queue).await
    }

    pub async fn schedule_len(&self) -> Result<usize, KiqError> {
        self.store.schedule_len().await
    }

    pub async fn retry_len(&self) -> Result<usize, KiqError> {
        self.store.retry_len().await
    }

    pub async fn failed_len(&self) -> Result<usize, KiqError> {
        self.store.dead_len().await
    }
}
