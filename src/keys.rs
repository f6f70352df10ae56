use chrono::NaiveDate;

/// Centralizes the Redis key naming scheme used by `JobStore` and `Stats`.
///
/// The layout is wire-compatible with the established Sidekiq family of
/// processors so that producers and consumers on other stacks can share a
/// Redis instance with this crate.
#[derive(Clone)]
pub(crate) struct Keys {
    /// Namespace prefix applied to every Redis key (default `exq`).
    pub(crate) namespace: String,
    /// Redis set of every queue name ever enqueued to or subscribed.
    pub(crate) queues: String,
    /// Redis sorted set (ZSET) of serialized jobs scheduled for future
    /// execution, scored by their due timestamp in epoch seconds.
    pub(crate) schedule: String,
    /// Redis sorted set (ZSET) of serialized jobs awaiting a retry,
    /// scored by the computed back-off timestamp in epoch seconds.
    pub(crate) retry: String,
    /// Redis sorted set (ZSET) of terminally failed jobs, scored by the
    /// failure timestamp. Capped, oldest evicted first.
    pub(crate) dead: String,
    /// Redis set of in-flight process ids.
    pub(crate) processes: String,
    /// Total successful completions since the namespace was created.
    pub(crate) stat_processed: String,
    /// Total terminal failures since the namespace was created.
    pub(crate) stat_failed: String,
}

impl Keys {
    /// Builds the namespaced key collection, defaulting to the `exq`
    /// namespace when none is provided.
    pub(crate) fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let namespace = if namespace.is_empty() {
            "exq".to_string()
        } else {
            namespace
        };

        Self {
            queues: format!("{namespace}:queues"),
            schedule: format!("{namespace}:schedule"),
            retry: format!("{namespace}:retry"),
            dead: format!("{namespace}:dead"),
            processes: format!("{namespace}:processes"),
            stat_processed: format!("{namespace}:stat:processed"),
            stat_failed: format!("{namespace}:stat:failed"),
            namespace,
        }
    }

    /// Redis list holding the ready jobs of a queue.
    pub(crate) fn queue(&self, name: &str) -> String {
        format!("{}:queue:{}", self.namespace, name)
    }

    /// Redis list holding jobs currently in flight on `host` for `queue`.
    pub(crate) fn backup(&self, host: &str, queue: &str) -> String {
        format!("{}:{}:{}:backup", self.namespace, host, queue)
    }

    /// Daily (UTC) bucket of successful completions.
    pub(crate) fn stat_processed_date(&self, date: NaiveDate) -> String {
        format!("{}:stat:processed:{}", self.namespace, date.format("%Y-%m-%d"))
    }

    /// Daily (UTC) bucket of terminal failures.
    pub(crate) fn stat_failed_date(&self, date: NaiveDate) -> String {
        format!("{}:stat:failed:{}", self.namespace, date.format("%Y-%m-%d"))
    }

    /// Per-queue counter of successful completions.
    pub(crate) fn stat_processed_queue(&self, queue: &str) -> String {
        format!("{}:stat:processed_queues:{}", self.namespace, queue)
    }

    /// Per-queue counter of terminal failures.
    pub(crate) fn stat_failed_queue(&self, queue: &str) -> String {
        format!("{}:stat:failed_queues:{}", self.namespace, queue)
    }

    /// String key holding the JSON record of one in-flight process.
    pub(crate) fn process(&self, process_id: &str) -> String {
        format!("{}:{}", self.namespace, process_id)
    }
}
