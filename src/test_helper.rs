use rand::distr::{Alphanumeric, SampleString};

pub fn random_string() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 16)
}

pub async fn redis_pool() -> Result<deadpool_redis::Pool, deadpool_redis::CreatePoolError> {
    dotenvy::from_filename(".env.test").ok();
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let cfg = deadpool_redis::Config::from_url(redis_url);
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
}
