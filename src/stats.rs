//! Counters and the in-flight process registry.
//!
//! Everything here is best-effort observability: callers log and swallow
//! write failures so a statistics outage never aborts job execution.

use chrono::{NaiveDate, Utc};
use deadpool_redis::redis::{self, AsyncCommands};
use serde::{Deserialize, Serialize};

use crate::{error::KiqError, job::Job, keys::Keys};

/// JSON record of one in-flight job, registered at dispatch and deleted on
/// terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub process_id: String,
    /// The hostname (or configured node id) working the job.
    pub host: String,
    pub pid: u32,
    pub queue: String,
    /// Floating seconds since the epoch.
    pub started_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Job>,
}

impl Process {
    pub(crate) fn new(host: &str, queue: &str, job: &Job) -> Self {
        Self {
            process_id: crate::job::new_jid(),
            host: host.to_string(),
            pid: std::process::id(),
            queue: queue.to_string(),
            started_at: crate::job::epoch_now(),
            payload: Some(job.clone()),
        }
    }
}

/// Statistics backend shared by the worker pools and the inspection API.
#[derive(Clone)]
pub struct Stats {
    pool: deadpool_redis::Pool,
    keys: Keys,
}

impl Stats {
    pub(crate) fn new(pool: deadpool_redis::Pool, namespace: &str) -> Self {
        Self {
            pool,
            keys: Keys::new(namespace),
        }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, KiqError> {
        self.pool.get().await.map_err(KiqError::Pool)
    }

    /// Increments the global, daily and per-queue processed counters.
    pub async fn record_processed(&self, queue: &str) -> Result<(), KiqError> {
        let date = Utc::now().date_naive();
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .incr(&self.keys.stat_processed, 1)
            .incr(self.keys.stat_processed_date(date), 1)
            .incr(self.keys.stat_processed_queue(queue), 1)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Increments the global, daily and per-queue failed counters.
    pub async fn record_failed(&self, queue: &str) -> Result<(), KiqError> {
        let date = Utc::now().date_naive();
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .incr(&self.keys.stat_failed, 1)
            .incr(self.keys.stat_failed_date(date), 1)
            .incr(self.keys.stat_failed_queue(queue), 1)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn add_process(&self, process: &Process) -> Result<(), KiqError> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .sadd(&self.keys.processes, &process.process_id)
            .set(
                self.keys.process(&process.process_id),
                serde_json::to_string(process)?,
            )
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn remove_process(&self, process_id: &str) -> Result<(), KiqError> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .srem(&self.keys.processes, process_id)
            .del(self.keys.process(process_id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// All registered in-flight processes. Entries whose record is missing
    /// or unreadable are skipped.
    pub async fn processes(&self) -> Result<Vec<Process>, KiqError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(&self.keys.processes).await?;

        let mut processes = vec![];
        for id in ids {
            let record: Option<String> = conn.get(self.keys.process(&id)).await?;
            if let Some(record) = record
                && let Ok(process) = serde_json::from_str::<Process>(&record)
            {
                processes.push(process);
            }
        }
        Ok(processes)
    }

    pub async fn processed_count(&self) -> Result<u64, KiqError> {
        self.read_counter(self.keys.stat_processed.clone()).await
    }

    pub async fn failed_count(&self) -> Result<u64, KiqError> {
        self.read_counter(self.keys.stat_failed.clone()).await
    }

    pub async fn processed_count_for(&self, queue: &str) -> Result<u64, KiqError> {
        self.read_counter(self.keys.stat_processed_queue(queue)).await
    }

    pub async fn failed_count_for(&self, queue: &str) -> Result<u64, KiqError> {
        self.read_counter(self.keys.stat_failed_queue(queue)).await
    }

    pub async fn processed_count_on(&self, date: NaiveDate) -> Result<u64, KiqError> {
        self.read_counter(self.keys.stat_processed_date(date)).await
    }

    pub async fn failed_count_on(&self, date: NaiveDate) -> Result<u64, KiqError> {
        self.read_counter(self.keys.stat_failed_date(date)).await
    }

    async fn read_counter(&self, key: String) -> Result<u64, KiqError> {
        let mut conn = self.connection().await?;
        let count: Option<u64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }
}
