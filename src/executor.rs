use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::{
    job::Job,
    stats::{Process, Stats},
    store::JobStore,
    worker::JobContext,
    worker_registry::WorkerRegistry,
};

/// Shared handles a pool passes to every job execution.
#[derive(Clone)]
pub(crate) struct ExecutionEnv {
    pub(crate) store: JobStore,
    pub(crate) stats: Stats,
    pub(crate) registry: Arc<WorkerRegistry>,
    pub(crate) host: String,
    pub(crate) queue: String,
}

enum JobFailure {
    WorkerNotFound(String),
    WorkerRaised(String),
}

impl JobFailure {
    fn class(&self) -> &'static str {
        match self {
            JobFailure::WorkerNotFound(_) => "WorkerNotFound",
            JobFailure::WorkerRaised(_) => "WorkerRaised",
        }
    }

    fn message(&self) -> &str {
        match self {
            JobFailure::WorkerNotFound(msg) | JobFailure::WorkerRaised(msg) => msg,
        }
    }
}

/// Runs one dequeued payload to its terminal outcome.
///
/// The payload is already on the backup list; whatever happens here it is
/// either completed (removed from backup) or booked for retry/failure before
/// the backup entry goes away, so a crash at any point leaves it recoverable.
/// This function never propagates job errors to the pool.
pub(crate) async fn run(env: &ExecutionEnv, payload: String) {
    let job = match Job::decode(&payload) {
        Ok(job) => job,
        Err(e) => {
            discard_malformed(env, &payload, &e.to_string()).await;
            return;
        }
    };

    let process = Process::new(&env.host, &env.queue, &job);
    if let Err(e) = env.stats.add_process(&process).await {
        tracing::warn!(jid = job.jid, error = %e, "Stats write failed, continuing");
    }

    tracing::info!(
        jid = job.jid,
        queue = env.queue,
        class = job.class,
        retry_count = job.retry_count.unwrap_or(0),
        "Job started"
    );
    let start = std::time::Instant::now();

    let outcome = match env.registry.get(job.class_name()) {
        None => Err(JobFailure::WorkerNotFound(format!(
            "no worker registered for class {}",
            job.class_name()
        ))),
        Some(worker) => {
            let ctx = JobContext::new(job.clone());
            match AssertUnwindSafe(worker.perform(&ctx)).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(JobFailure::WorkerRaised(e.to_string())),
                Err(panic) => Err(JobFailure::WorkerRaised(panic_message(panic))),
            }
        }
    };

    let duration = start.elapsed();
    tracing::info!(
        jid = job.jid,
        queue = env.queue,
        class = job.class,
        success = outcome.is_ok(),
        duration_ms = duration.as_millis() as u64,
        "Job finished"
    );

    match outcome {
        Ok(()) => {
            if let Err(e) = env
                .store
                .remove_job_from_backup(&env.host, &env.queue, &payload)
                .await
            {
                tracing::error!(jid = job.jid, error = %e, "Failed to clear backup entry");
            }
            if let Err(e) = env.stats.record_processed(&env.queue).await {
                tracing::warn!(jid = job.jid, error = %e, "Stats write failed, continuing");
            }
        }
        Err(failure) => {
            tracing::error!(
                jid = job.jid,
                queue = env.queue,
                class = job.class,
                error_class = failure.class(),
                error = failure.message(),
                "Job failed"
            );

            // Book the retry/failure before releasing the backup entry so a
            // crash in between can only duplicate, never lose, the job.
            if let Err(e) = env
                .store
                .retry_or_fail_job(&job, failure.class(), failure.message())
                .await
            {
                tracing::error!(jid = job.jid, error = %e, "Failed to book job retry");
            }
            if let Err(e) = env
                .store
                .remove_job_from_backup(&env.host, &env.queue, &payload)
                .await
            {
                tracing::error!(jid = job.jid, error = %e, "Failed to clear backup entry");
            }
            if let Err(e) = env.stats.record_failed(&env.queue).await {
                tracing::warn!(jid = job.jid, error = %e, "Stats write failed, continuing");
            }
        }
    }

    if let Err(e) = env.stats.remove_process(&process.process_id).await {
        tracing::warn!(jid = job.jid, error = %e, "Stats write failed, continuing");
    }
}

/// A payload that does not decode is dropped straight into the dead set;
/// there is nothing to retry.
async fn discard_malformed(env: &ExecutionEnv, payload: &str, error: &str) {
    tracing::error!(queue = env.queue, error, "Discarding malformed job");

    if let Err(e) = env.store.fail_raw(payload, "MalformedJob", error).await {
        tracing::error!(error = %e, "Failed to record malformed job");
    }
    if let Err(e) = env
        .store
        .remove_job_from_backup(&env.host, &env.queue, payload)
        .await
    {
        tracing::error!(error = %e, "Failed to clear backup entry");
    }
    if let Err(e) = env.stats.record_failed(&env.queue).await {
        tracing::warn!(error = %e, "Stats write failed, continuing");
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
