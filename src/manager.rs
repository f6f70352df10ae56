use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    api::Api,
    config::{Concurrency, Config},
    error::KiqError,
    executor::ExecutionEnv,
    job::JobOptions,
    pool::QueuePool,
    scheduler::Scheduler,
    stats::Stats,
    store::JobStore,
    worker_registry::WorkerRegistry,
};

enum Control {
    Subscribe {
        queue: String,
        concurrency: Concurrency,
        reply: oneshot::Sender<Result<(), KiqError>>,
    },
    Unsubscribe {
        queue: String,
        reply: oneshot::Sender<Result<(), KiqError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to one running job-processing instance.
///
/// Construction runs the boot recovery protocol (draining every configured
/// queue's backup list back onto its ready queue) before any pool starts, so
/// jobs left in flight by a prior crash are delivered again. Several managers
/// can coexist in a process; each holds its own pools and registry.
///
/// # Examples
///
/// ```rust,no_run
/// use kiq::{Config, Manager, WorkerRegistry};
///
/// # async fn example(registry: WorkerRegistry) -> Result<(), kiq::KiqError> {
/// let config = Config::new().queue("default").scheduler_enable(true);
/// let manager = Manager::start(config, registry).await?;
///
/// let jid = manager.enqueue("default", "MailWorker", vec![]).await?;
/// manager.subscribe("reports", 4).await?;
/// manager.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Manager {
    name: String,
    store: JobStore,
    stats: Stats,
    call_timeout: Duration,
    control: mpsc::Sender<Control>,
}

impl Manager {
    /// Builds the Redis pool from `config` and starts the instance.
    pub async fn start(config: Config, registry: WorkerRegistry) -> Result<Self, KiqError> {
        let pool = config.build_pool()?;
        Self::start_with_pool(config, registry, pool).await
    }

    /// Starts the instance on an existing Redis pool.
    pub async fn start_with_pool(
        config: Config,
        registry: WorkerRegistry,
        pool: deadpool_redis::Pool,
    ) -> Result<Self, KiqError> {
        let store = JobStore::with_pool(pool.clone(), &config.namespace, config.max_retries);
        let stats = Stats::new(pool, &config.namespace);
        let host = config.resolve_host();
        let registry = Arc::new(registry);

        tracing::info!(name = config.name, host, "Starting manager");

        let mut supervisor = Supervisor {
            store: store.clone(),
            stats: stats.clone(),
            registry,
            host,
            poll_timeout: config.poll_timeout,
            pools: HashMap::new(),
            scheduler: None,
        };

        // Recovery must complete for every configured queue before the first
        // pool dequeues.
        let queues: Vec<(String, Concurrency)> = config
            .queues
            .iter()
            .map(|(name, concurrency)| {
                (name.clone(), concurrency.unwrap_or(config.concurrency))
            })
            .collect();
        for (queue, _) in &queues {
            supervisor.recover(queue).await?;
        }
        for (queue, concurrency) in queues {
            if !supervisor.pools.contains_key(&queue) {
                supervisor.spawn_pool(queue, concurrency);
            }
        }

        if config.scheduler_enable {
            supervisor.spawn_scheduler(config.scheduler_poll_timeout);
        }

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(supervisor.run(rx));

        Ok(Self {
            name: config.name,
            store,
            stats,
            call_timeout: config.call_timeout,
            control: tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read-only inspection handle sharing this manager's Redis pool.
    pub fn api(&self) -> Api {
        Api::with_parts(self.store.clone(), self.stats.clone())
    }

    /// Direct access to the queue protocol, for tooling and tests.
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Enqueues a job for immediate processing and returns its jid.
    pub async fn enqueue(
        &self,
        queue: &str,
        class: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<String, KiqError> {
        self.store.enqueue(queue, class, args, &JobOptions::default()).await
    }

    /// Enqueues with per-job overrides.
    pub async fn enqueue_with(
        &self,
        queue: &str,
        class: &str,
        args: Vec<serde_json::Value>,
        opts: &JobOptions,
    ) -> Result<String, KiqError> {
        self.store.enqueue(queue, class, args, opts).await
    }

    /// Schedules a job `delay` from now; requires the scheduler.
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

    /// Schedules a job at an absolute time; requires the scheduler.
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

    /// Starts a pool for `queue`, running the recovery step for it first.
    /// Subscribing an already-subscribed queue is a no-op.
    pub async fn subscribe(
        &self,
        queue: &str,
        concurrency: impl Into<Concurrency>,
    ) -> Result<(), KiqError> {
        let queue = queue.to_string();
        let concurrency = concurrency.into();
        self.call(|reply| Control::Subscribe {
            queue,
            concurrency,
            reply,
        })
        .await?
    }

    /// Marks the queue's pool for graceful shutdown: no more dequeues,
    /// in-flight jobs finish, then the pool exits. Jobs enqueued afterwards
    /// stay in Redis until the queue is re-subscribed.
    pub async fn unsubscribe(&self, queue: &str) -> Result<(), KiqError> {
        let queue = queue.to_string();
        self.call(|reply| Control::Unsubscribe { queue, reply }).await?
    }

    /// Graceful shutdown: stops the scheduler and every pool, waiting for
    /// in-flight jobs. Not bounded by `call_timeout`; a hard kill instead is
    /// tolerated because boot recovery re-delivers what was in flight.
    pub async fn shutdown(&self) -> Result<(), KiqError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Shutdown { reply: tx })
            .await
            .map_err(|_| KiqError::ManagerClosed)?;
        rx.await.map_err(|_| KiqError::ManagerClosed)
    }

    async fn call<T>(
        &self,
        msg: impl FnOnce(oneshot::Sender<T>) -> Control,
    ) -> Result<T, KiqError> {
        let (tx, rx) = oneshot::channel();
        tokio::time::timeout(self.call_timeout, async {
            self.control
                .send(msg(tx))
                .await
                .map_err(|_| KiqError::ManagerClosed)?;
            rx.await.map_err(|_| KiqError::ManagerClosed)
        })
        .await
        .map_err(|_| KiqError::CallTimeout)?
    }
}

struct PoolHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns the pool map and the scheduler; mutated only through control
/// messages, so subscribe/unsubscribe never race the dequeue loops.
struct Supervisor {
    store: JobStore,
    stats: Stats,
    registry: Arc<WorkerRegistry>,
    host: String,
    poll_timeout: Duration,
    pools: HashMap<String, PoolHandle>,
    scheduler: Option<PoolHandle>,
}

impl Supervisor {
    async fn run(mut self, mut rx: mpsc::Receiver<Control>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Control::Subscribe {
                    queue,
                    concurrency,
                    reply,
                } => {
                    let result = self.subscribe(queue, concurrency).await;
                    let _ = reply.send(result);
                }
                Control::Unsubscribe { queue, reply } => {
                    self.unsubscribe(&queue).await;
                    let _ = reply.send(Ok(()));
                }
                Control::Shutdown { reply } => {
                    self.shutdown_all().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }

        // Every manager handle dropped without an explicit shutdown.
        self.shutdown_all().await;
    }

    async fn recover(&self, queue: &str) -> Result<(), KiqError> {
        let recovered = self.store.re_enqueue_backup(&self.host, queue).await?;
        if recovered > 0 {
            tracing::info!(queue, recovered, "Re-enqueued in-flight jobs from backup");
        }
        Ok(())
    }

    async fn subscribe(&mut self, queue: String, concurrency: Concurrency) -> Result<(), KiqError> {
        if self.pools.contains_key(&queue) {
            return Ok(());
        }

        self.recover(&queue).await?;
        self.store.add_known_queue(&queue).await?;
        self.spawn_pool(queue, concurrency);
        Ok(())
    }

    async fn unsubscribe(&mut self, queue: &str) {
        if let Some(handle) = self.pools.remove(queue) {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }
    }

    fn spawn_pool(&mut self, queue: String, concurrency: Concurrency) {
        let cancel = CancellationToken::new();
        let pool = QueuePool {
            env: ExecutionEnv {
                store: self.store.clone(),
                stats: self.stats.clone(),
                registry: Arc::clone(&self.registry),
                host: self.host.clone(),
                queue: queue.clone(),
            },
            concurrency,
            poll_timeout: self.poll_timeout,
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(pool.run());
        self.pools.insert(queue, PoolHandle { cancel, join });
    }

    fn spawn_scheduler(&mut self, interval: Duration) {
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(self.store.clone(), interval, cancel.clone());
        let join = tokio::spawn(scheduler.run());
        self.scheduler = Some(PoolHandle { cancel, join });
    }

    async fn shutdown_all(&mut self) {
        if let Some(handle) = self.scheduler.take() {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }
        for (_, handle) in self.pools.drain() {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }
    }
}
