use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{config::Concurrency, executor, executor::ExecutionEnv};

/// Ceiling for the next-poll back-off while Redis is unreachable.
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(10);

/// Dequeue loop for a single queue.
///
/// A semaphore of `concurrency` permits bounds the in-flight jobs; the loop
/// only touches Redis while it holds a free permit, and each dequeued job is
/// run on its own task carrying the permit until its terminal outcome.
/// Cancellation stops dequeuing and drains in-flight jobs before returning;
/// backup entries of anything still running at hard kill are picked up by
/// boot recovery.
pub(crate) struct QueuePool {
    pub(crate) env: ExecutionEnv,
    pub(crate) concurrency: Concurrency,
    pub(crate) poll_timeout: Duration,
    pub(crate) cancel: CancellationToken,
}

impl QueuePool {
    pub(crate) async fn run(self) {
        let queue = self.env.queue.clone();
        let semaphore = Arc::new(Semaphore::new(self.concurrency.permits()));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut idle = self.poll_timeout;

        tracing::info!(queue, concurrency = ?self.concurrency, "Starting worker pool");

        loop {
            while tasks.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.env.store.dequeue_one(&self.env.host, &queue).await {
                Ok(Some(payload)) => {
                    idle = self.poll_timeout;
                    let env = self.env.clone();
                    tasks.spawn(async move {
                        executor::run(&env, payload).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    idle = self.poll_timeout;
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(idle) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(queue, error = %e, "Dequeue failed, backing off");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(idle) => {}
                    }
                    idle = (idle * 2).min(MAX_POLL_BACKOFF);
                }
            }
        }

        // Graceful drain: no more dequeues, let in-flight jobs finish.
        while tasks.join_next().await.is_some() {}

        tracing::info!(queue, "Worker pool stopped");
    }
}
