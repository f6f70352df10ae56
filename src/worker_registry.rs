use std::collections::HashMap;
use std::sync::Arc;

use crate::worker::Worker;

/// Maps wire `class` names to handlers.
///
/// Dispatch strips any `/method` selector before lookup, so the class
/// `"Billing.Invoicer/finalize"` resolves the handler registered under
/// `"Billing.Invoicer"` and hands it `method = "finalize"` via the context.
/// A class with no registered handler fails the job as `WorkerNotFound`.
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    pub fn register<W>(&mut self, class: impl Into<String>, worker: W) -> &mut Self
    where
        W: Worker + 'static,
    {
        self.workers.insert(class.into(), Arc::new(worker));
        self
    }

    pub(crate) fn get(&self, class: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(class).cloned()
    }

    pub fn has_registered(&self, class: &str) -> bool {
        self.workers.contains_key(class)
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
