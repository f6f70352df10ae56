use std::time::Duration;

use crate::error::KiqError;

/// Per-queue concurrency bound: a worker count, or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Limited(usize),
    Unlimited,
}

impl Concurrency {
    pub(crate) fn permits(self) -> usize {
        match self {
            Concurrency::Limited(n) => n,
            Concurrency::Unlimited => tokio::sync::Semaphore::MAX_PERMITS,
        }
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Limited(10_000)
    }
}

impl From<usize> for Concurrency {
    fn from(n: usize) -> Self {
        Concurrency::Limited(n)
    }
}

/// Settings for a [`Manager`](crate::Manager), [`Enqueuer`](crate::Enqueuer)
/// or [`Api`](crate::Api) instance.
///
/// # Examples
///
/// ```rust,no_run
/// use kiq::{Concurrency, Config};
///
/// let config = Config::new()
///     .url("redis://127.0.0.1:6379/0")
///     .namespace("exq")
///     .queue("default")
///     .queue_with_concurrency("mail", Concurrency::Limited(4))
///     .scheduler_enable(true);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) name: String,
    pub(crate) url: Option<String>,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) database: i64,
    pub(crate) password: Option<String>,
    pub(crate) namespace: String,
    pub(crate) queues: Vec<(String, Option<Concurrency>)>,
    pub(crate) concurrency: Concurrency,
    pub(crate) scheduler_enable: bool,
    pub(crate) scheduler_poll_timeout: Duration,
    pub(crate) poll_timeout: Duration,
    pub(crate) redis_timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) call_timeout: Duration,
    pub(crate) node_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "kiq".to_string(),
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            namespace: "exq".to_string(),
            queues: vec![],
            concurrency: Concurrency::default(),
            scheduler_enable: false,
            scheduler_poll_timeout: Duration::from_millis(200),
            poll_timeout: Duration::from_millis(50),
            redis_timeout: Duration::from_secs(5),
            max_retries: 25,
            call_timeout: Duration::from_secs(5),
            node_id: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the connection URL from the `REDIS_URL` environment variable.
    pub fn from_env() -> Result<Self, KiqError> {
        let url = std::env::var("REDIS_URL")
            .map_err(|_| KiqError::Config("REDIS_URL is not set".to_string()))?;
        Ok(Self::new().url(url))
    }

    /// Registered identifier for this instance, used in logging.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Full Redis connection URL; takes precedence over host/port/database.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Key prefix isolating this deployment within Redis.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Subscribes a queue at the default concurrency.
    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.queues.push((name.into(), None));
        self
    }

    /// Subscribes a queue with its own concurrency bound.
    pub fn queue_with_concurrency(
        mut self,
        name: impl Into<String>,
        concurrency: impl Into<Concurrency>,
    ) -> Self {
        self.queues.push((name.into(), Some(concurrency.into())));
        self
    }

    /// Default per-queue concurrency when none is given per queue.
    pub fn concurrency(mut self, concurrency: impl Into<Concurrency>) -> Self {
        self.concurrency = concurrency.into();
        self
    }

    /// Whether the scheduler polls the `schedule` and `retry` sets. Must be
    /// enabled when `enqueue_in`/`enqueue_at` are in use.
    pub fn scheduler_enable(mut self, enable: bool) -> Self {
        self.scheduler_enable = enable;
        self
    }

    pub fn scheduler_poll_timeout(mut self, interval: Duration) -> Self {
        self.scheduler_poll_timeout = interval;
        self
    }

    /// Worker pool sleep between polls of an empty queue.
    pub fn poll_timeout(mut self, interval: Duration) -> Self {
        self.poll_timeout = interval;
        self
    }

    /// Per-command Redis socket timeout.
    pub fn redis_timeout(mut self, timeout: Duration) -> Self {
        self.redis_timeout = timeout;
        self
    }

    /// Default retry budget for jobs enqueued with `retry: true`.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Upper bound on manager control calls (subscribe/unsubscribe).
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Overrides the host identity used for backup lists; defaults to
    /// `gethostname()`.
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub(crate) fn redis_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => {
                let auth = match &self.password {
                    Some(password) => format!(":{password}@"),
                    None => String::new(),
                };
                format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.database)
            }
        }
    }

    pub(crate) fn build_pool(&self) -> Result<deadpool_redis::Pool, KiqError> {
        let mut cfg = deadpool_redis::Config::from_url(self.redis_url());
        cfg.pool = Some(deadpool_redis::PoolConfig {
            max_size: 16,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(self.redis_timeout),
                create: Some(self.redis_timeout),
                recycle: Some(self.redis_timeout),
            },
            ..Default::default()
        });
        Ok(cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?)
    }

    pub(crate) fn resolve_host(&self) -> String {
        match &self.node_id {
            Some(node_id) => node_id.clone(),
            None => gethostname::gethostname().to_string_lossy().to_string(),
        }
    }
}
