/// Errors returned by the kiq public API.
#[derive(Debug, thiserror::Error)]
pub enum KiqError {
    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis pool setup error: {0}")]
    PoolBuild(#[from] deadpool_redis::CreatePoolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed job: {0}")]
    MalformedJob(String),

    #[error("No worker registered for class {0}")]
    WorkerNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Manager control loop is gone")]
    ManagerClosed,

    #[error("Manager call timed out")]
    CallTimeout,
}
