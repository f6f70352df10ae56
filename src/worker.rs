use crate::job::Job;

pub type WorkerError = Box<dyn std::error::Error + Send + Sync>;

/// Everything a worker sees about the job it was handed.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: Job,
    /// Method selector carried after `/` in the job's `class` field, chosen
    /// by the producer to address a specific entry point of the handler.
    pub method: Option<String>,
}

impl JobContext {
    pub(crate) fn new(job: Job) -> Self {
        let method = job.method().map(str::to_string);
        Self { job, method }
    }

    pub fn jid(&self) -> &str {
        &self.job.jid
    }

    pub fn queue(&self) -> &str {
        &self.job.queue
    }

    pub fn args(&self) -> &[serde_json::Value] {
        &self.job.args
    }

    pub fn retry_count(&self) -> u32 {
        self.job.retry_count.unwrap_or(0)
    }
}

/// A handler for one job class.
///
/// Implementations are registered under the `class` string producers put on
/// the wire; see [`WorkerRegistry`](crate::WorkerRegistry). An `Err` return
/// (or a panic) sends the job down the retry/fail path.
///
/// # Examples
///
/// ```rust
/// use kiq::{JobContext, Worker, WorkerError};
///
/// struct EmailWorker;
///
/// #[async_trait::async_trait]
/// impl Worker for EmailWorker {
///     async fn perform(&self, ctx: &JobContext) -> Result<(), WorkerError> {
///         let recipient = ctx.args()[0].as_str().unwrap_or_default();
///         println!("emailing {recipient}");
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    async fn perform(&self, ctx: &JobContext) -> Result<(), WorkerError>;
}
