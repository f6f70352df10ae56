use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KiqError;

/// A single unit of work, serialized to the wire-compatible JSON payload.
///
/// Decoding tolerates unknown fields so payloads produced by peers on other
/// stacks survive a round trip through this crate unchanged in meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub jid: String,
    pub class: String,
    pub args: Vec<serde_json::Value>,
    pub queue: String,
    #[serde(default)]
    pub enqueued_at: f64,
    #[serde(default)]
    pub retry: Retry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,
}

/// Retry directive carried on the wire: either a flag (`true` means the
/// processor-wide default budget, `false` means never retry) or an explicit
/// attempt budget. Peer producers emit both forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Retry {
    Flag(bool),
    Limit(u32),
}

impl Default for Retry {
    fn default() -> Self {
        Retry::Flag(true)
    }
}

impl Retry {
    /// Normalizes the directive into an attempt budget.
    pub fn budget(self, default_max: u32) -> u32 {
        match self {
            Retry::Flag(true) => default_max,
            Retry::Flag(false) => 0,
            Retry::Limit(n) => n,
        }
    }
}

/// Per-enqueue overrides.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Retry directive for this job; defaults to the flag form `true`.
    pub retry: Option<Retry>,
}

impl Job {
    pub(crate) fn build(
        queue: &str,
        class: &str,
        args: Vec<serde_json::Value>,
        opts: &JobOptions,
    ) -> Self {
        Self {
            jid: new_jid(),
            class: class.to_string(),
            args,
            queue: queue.to_string(),
            enqueued_at: epoch_now(),
            retry: opts.retry.unwrap_or_default(),
            retry_count: None,
            failed_at: None,
            error_message: None,
            error_class: None,
            processor: None,
        }
    }

    /// Decodes a wire payload, failing with [`KiqError::MalformedJob`] when a
    /// required field is missing or the `jid` is absent.
    pub fn decode(payload: &str) -> Result<Self, KiqError> {
        let job: Job =
            serde_json::from_str(payload).map_err(|e| KiqError::MalformedJob(e.to_string()))?;
        if job.jid.is_empty() {
            return Err(KiqError::MalformedJob("jid is absent".to_string()));
        }
        Ok(job)
    }

    pub fn encode(&self) -> Result<String, KiqError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The handler lookup key: the `class` field with any `/method` selector
    /// stripped.
    pub fn class_name(&self) -> &str {
        match self.class.split_once('/') {
            Some((name, _)) => name,
            None => &self.class,
        }
    }

    /// The optional method selector carried after `/` in `class`.
    pub fn method(&self) -> Option<&str> {
        self.class.split_once('/').map(|(_, method)| method)
    }
}

/// Generates a 128-bit hex job identifier.
pub(crate) fn new_jid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current wall-clock time as floating seconds since the epoch.
pub(crate) fn epoch_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
