use chrono::{DateTime, Utc};
use deadpool_redis::redis::{self, AsyncCommands};
use rand::Rng;
use std::time::Duration;

use crate::{
    config::Config,
    error::KiqError,
    job::{self, Job, JobOptions},
    keys::Keys,
};

/// Terminally failed jobs kept in the dead set; oldest evicted beyond this.
const DEAD_JOBS_LIMIT: isize = 10_000;

/// The Redis data plane: key layout plus the atomic enqueue/dequeue/backup
/// protocol shared by every component.
///
/// Queue lists are LPUSHed at the head and consumed from the tail, so the
/// dequeue-to-backup move is a single `LMOVE RIGHT LEFT` (the `RPOPLPUSH`
/// equivalent). There is no observable state in which a job exists in neither
/// the ready queue nor a backup list.
#[derive(Clone)]
pub struct JobStore {
    pool: deadpool_redis::Pool,
    keys: Keys,
    max_retries: u32,
}

impl JobStore {
    /// Builds a store with its own connection pool.
    pub fn new(config: &Config) -> Result<Self, KiqError> {
        Ok(Self::with_pool(
            config.build_pool()?,
            &config.namespace,
            config.max_retries,
        ))
    }

    pub(crate) fn with_pool(pool: deadpool_redis::Pool, namespace: &str, max_retries: u32) -> Self {
        Self {
            pool,
            keys: Keys::new(namespace),
            max_retries,
        }
    }

    pub(crate) async fn connection(&self) -> Result<deadpool_redis::Connection, KiqError> {
        self.pool.get().await.map_err(KiqError::Pool)
    }

    /// Pushes a job for immediate processing and returns its jid.
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: Vec<serde_json::Value>,
        opts: &JobOptions,
    ) -> Result<String, KiqError> {
        let job = Job::build(queue, class, args, opts);
        tracing::trace!(jid = job.jid, queue, class, "Enqueuing job");
        self.push_job(&job).await?;
        Ok(job.jid)
    }

    async fn push_job(&self, job: &Job) -> Result<(), KiqError> {
        let payload = job.encode()?;
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .sadd(&self.keys.queues, &job.queue)
            .lpush(self.keys.queue(&job.queue), &payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Schedules a job to become ready at an absolute wall-clock time.
    pub async fn enqueue_at(
        &self,
        queue: &str,
        at: DateTime<Utc>,
        class: &str,
        args: Vec<serde_json::Value>,
        opts: &JobOptions,
    ) -> Result<String, KiqError> {
        let job = Job::build(queue, class, args, opts);
        tracing::trace!(jid = job.jid, queue, class, at = %at, "Scheduling job");

        let score = at.timestamp_micros() as f64 / 1_000_000.0;
        let payload = job.encode()?;
        let mut conn = self.connection().await?;
        let _: () = conn.zadd(&self.keys.schedule, &payload, score).await?;
        Ok(job.jid)
    }

    /// Schedules a job `delay` from now. A zero delay still passes through
    /// the scheduled set so promotion happens on the scheduler's clock.
    pub async fn enqueue_in(
        &self,
        queue: &str,
        delay: Duration,
        class: &str,
        args: Vec<serde_json::Value>,
        opts: &JobOptions,
    ) -> Result<String, KiqError> {
        let at = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| KiqError::Config(format!("delay out of range: {e}")))?;
        self.enqueue_at(queue, at, class, args, opts).await
    }

    /// Pops at most one job from each named queue, in caller order, moving
    /// each popped payload onto the `(host, queue)` backup list in the same
    /// atomic step. Returns the `(queue, payload)` pairs that yielded a job.
    pub async fn dequeue(
        &self,
        host: &str,
        queues: &[String],
    ) -> Result<Vec<(String, String)>, KiqError> {
        let mut jobs = vec![];
        for queue in queues {
            if let Some(payload) = self.dequeue_one(host, queue).await? {
                jobs.push((queue.clone(), payload));
            }
        }
        Ok(jobs)
    }

    pub async fn dequeue_one(&self, host: &str, queue: &str) -> Result<Option<String>, KiqError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .lmove(
                self.keys.queue(queue),
                self.keys.backup(host, queue),
                redis::Direction::Right,
                redis::Direction::Left,
            )
            .await?;
        Ok(payload)
    }

    /// Deletes exactly one matching payload from the backup list, called on
    /// terminal outcome (success or failure) of the in-flight job.
    pub async fn remove_job_from_backup(
        &self,
        host: &str,
        queue: &str,
        payload: &str,
    ) -> Result<(), KiqError> {
        let mut conn = self.connection().await?;
        let _: () = conn.lrem(self.keys.backup(host, queue), -1, payload).await?;
        Ok(())
    }

    /// Drains the `(host, queue)` backup list back onto the ready queue,
    /// tail-to-tail, restoring the pre-crash FIFO order. Returns the number
    /// of jobs moved.
    pub async fn re_enqueue_backup(&self, host: &str, queue: &str) -> Result<usize, KiqError> {
        let backup = self.keys.backup(host, queue);
        let queue_key = self.keys.queue(queue);
        let mut conn = self.connection().await?;
        let mut moved = 0;

        loop {
            let payload: Option<String> = conn
                .lmove(
                    &backup,
                    &queue_key,
                    redis::Direction::Right,
                    redis::Direction::Left,
                )
                .await?;
            if payload.is_none() {
                break;
            }
            moved += 1;
        }

        Ok(moved)
    }

    /// Promotes every due entry of the `schedule` and `retry` sets onto its
    /// target queue. Safe against racing schedulers: `ZREM` claims each entry
    /// and only the winner pushes. Returns the number promoted.
    pub async fn scheduler_dequeue(&self, now: DateTime<Utc>) -> Result<usize, KiqError> {
        let sets = [self.keys.schedule.clone(), self.keys.retry.clone()];
        let mut promoted = 0;
        for set in &sets {
            promoted += self.promote_due(set, now).await?;
        }
        Ok(promoted)
    }

    async fn promote_due(&self, set_key: &str, now: DateTime<Utc>) -> Result<usize, KiqError> {
        let max = now.timestamp_micros() as f64 / 1_000_000.0;
        let mut conn = self.connection().await?;

        // ZRANGEBYSCORE returns ascending scores: older due jobs first.
        let due: Vec<String> = conn.zrangebyscore(set_key, "-inf", max).await?;
        let mut promoted = 0;

        for payload in due {
            let removed: i64 = conn.zrem(set_key, &payload).await?;
            if removed == 0 {
                continue; // another scheduler claimed it
            }

            match Job::decode(&payload) {
                Ok(job) => {
                    let _: () = redis::pipe()
                        .atomic()
                        .sadd(&self.keys.queues, &job.queue)
                        .lpush(self.keys.queue(&job.queue), &payload)
                        .query_async(&mut conn)
                        .await?;
                    promoted += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Moving malformed scheduled entry to the dead set");
                    let _: () = redis::pipe()
                        .atomic()
                        .zadd(&self.keys.dead, &payload, max)
                        .zremrangebyrank(&self.keys.dead, 0, -(DEAD_JOBS_LIMIT + 1))
                        .query_async(&mut conn)
                        .await?;
                }
            }
        }

        Ok(promoted)
    }

    /// Books a failed attempt: within the job's retry budget the job goes to
    /// the `retry` set at a backed-off due time, otherwise to the dead set.
    pub async fn retry_or_fail_job(
        &self,
        job: &Job,
        error_class: &str,
        error_message: &str,
    ) -> Result<(), KiqError> {
        let retry_count = job.retry_count.unwrap_or(0) + 1;

        let mut updated = job.clone();
        updated.retry_count = Some(retry_count);
        updated.failed_at = Some(job::epoch_now());
        updated.error_class = Some(error_class.to_string());
        updated.error_message = Some(error_message.to_string());

        if retry_count <= job.retry.budget(self.max_retries) {
            let delay = backoff_secs(retry_count);
            let due = job::epoch_now() + delay as f64;
            tracing::debug!(
                jid = updated.jid,
                queue = updated.queue,
                retry_count,
                delay,
                "Scheduling job retry"
            );
            let mut conn = self.connection().await?;
            let _: () = conn.zadd(&self.keys.retry, updated.encode()?, due).await?;
            Ok(())
        } else {
            tracing::warn!(
                jid = updated.jid,
                queue = updated.queue,
                retry_count,
                error_class,
                "Retries exhausted, moving job to the dead set"
            );
            self.fail_job(&updated).await
        }
    }

    /// Writes a terminally failed job into the capped dead set.
    pub async fn fail_job(&self, job: &Job) -> Result<(), KiqError> {
        let score = job.failed_at.unwrap_or_else(job::epoch_now);
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .zadd(&self.keys.dead, job.encode()?, score)
            .zremrangebyrank(&self.keys.dead, 0, -(DEAD_JOBS_LIMIT + 1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Discards a payload that failed to decode. When the payload is at
    /// least a JSON object the error metadata is stamped onto it so the dead
    /// set entry carries the failure class; otherwise it is kept verbatim.
    pub(crate) async fn fail_raw(
        &self,
        payload: &str,
        error_class: &str,
        error_message: &str,
    ) -> Result<(), KiqError> {
        let now = job::epoch_now();
        let entry = match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.insert("failed_at".to_string(), serde_json::json!(now));
                map.insert("error_class".to_string(), serde_json::json!(error_class));
                map.insert("error_message".to_string(), serde_json::json!(error_message));
                serde_json::Value::Object(map).to_string()
            }
            _ => payload.to_string(),
        };

        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .zadd(&self.keys.dead, entry, now)
            .zremrangebyrank(&self.keys.dead, 0, -(DEAD_JOBS_LIMIT + 1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Linear scan of the dead set for a job with the given jid.
    pub async fn find_failed(&self, jid: &str) -> Result<Option<Job>, KiqError> {
        let mut conn = self.connection().await?;
        let payloads: Vec<String> = conn.zrange(&self.keys.dead, 0, -1).await?;
        for payload in payloads {
            if let Ok(job) = Job::decode(&payload)
                && job.jid == jid
            {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Removes a dead job by jid. Returns whether an entry was removed.
    pub async fn remove_failed(&self, jid: &str) -> Result<bool, KiqError> {
        let mut conn = self.connection().await?;
        let payloads: Vec<String> = conn.zrange(&self.keys.dead, 0, -1).await?;
        for payload in payloads {
            if let Ok(job) = Job::decode(&payload)
                && job.jid == jid
            {
                let removed: i64 = conn.zrem(&self.keys.dead, &payload).await?;
                return Ok(removed > 0);
            }
        }
        Ok(false)
    }

    pub async fn clear_failed(&self) -> Result<(), KiqError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(&self.keys.dead).await?;
        Ok(())
    }

    /// Moves a dead job back onto its queue with the error metadata cleared.
    /// Returns whether a job was re-enqueued.
    pub async fn retry_failed(&self, jid: &str) -> Result<bool, KiqError> {
        let mut conn = self.connection().await?;
        let payloads: Vec<String> = conn.zrange(&self.keys.dead, 0, -1).await?;
        for payload in payloads {
            if let Ok(job) = Job::decode(&payload)
                && job.jid == jid
            {
                let removed: i64 = conn.zrem(&self.keys.dead, &payload).await?;
                if removed == 0 {
                    return Ok(false); // claimed by a concurrent caller
                }

                let mut revived = job;
                revived.failed_at = None;
                revived.error_class = None;
                revived.error_message = None;
                self.push_job(&revived).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(crate) async fn add_known_queue(&self, queue: &str) -> Result<(), KiqError> {
        let mut conn = self.connection().await?;
        let _: () = conn.sadd(&self.keys.queues, queue).await?;
        Ok(())
    }

    /// Every queue name ever enqueued to or subscribed.
    pub async fn known_queues(&self) -> Result<Vec<String>, KiqError> {
        let mut conn = self.connection().await?;
        let mut queues: Vec<String> = conn.smembers(&self.keys.queues).await?;
        queues.sort();
        Ok(queues)
    }

    pub async fn queue_len(&self, queue: &str) -> Result<usize, KiqError> {
        let mut conn = self.connection().await?;
        let len: i64 = conn.llen(self.keys.queue(queue)).await?;
        Ok(len as usize)
    }

    pub async fn backup_len(&self, host: &str, queue: &str) -> Result<usize, KiqError> {
        let mut conn = self.connection().await?;
        let len: i64 = conn.llen(self.keys.backup(host, queue)).await?;
        Ok(len as usize)
    }

    pub async fn schedule_len(&self) -> Result<usize, KiqError> {
        let mut conn = self.connection().await?;
        let len: i64 = conn.zcard(&self.keys.schedule).await?;
        Ok(len as usize)
    }

    pub async fn retry_len(&self) -> Result<usize, KiqError> {
        let mut conn = self.connection().await?;
        let len: i64 = conn.zcard(&self.keys.retry).await?;
        Ok(len as usize)
    }

    pub async fn dead_len(&self) -> Result<usize, KiqError> {
        let mut conn = self.connection().await?;
        let len: i64 = conn.zcard(&self.keys.dead).await?;
        Ok(len as usize)
    }
}

/// Retry back-off matching the peer ecosystem:
/// `n^4 + 15 + rand(30) * (n + 1)` seconds.
fn backoff_secs(retry_count: u32) -> u64 {
    let n = retry_count as u64;
    n.pow(4) + 15 + rand::rng().random_range(0..30) * (n + 1)
}
