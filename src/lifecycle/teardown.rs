//! Reverse-order teardown of started subsystems.
//!
//! Every subsystem pushes its stop action right after its start call
//! returned. Unwinding pops them, so subsystems stop in reverse start order
//! and a failed startup only stops what actually started.

use std::future::Future;
use std::pin::Pin;

type StopFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Step {
    name: &'static str,
    action: Box<dyn FnOnce() -> StopFuture + Send>,
}

/// Growing list of undo actions.
#[derive(Default)]
pub struct Teardown {
    steps: Vec<Step>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the stop action of a subsystem that just started.
    pub fn push<F, Fut>(&mut self, name: &'static str, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.steps.push(Step {
            name,
            action: Box::new(move || Box::pin(action())),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names in the order they will be stopped.
    pub fn pending(&self) -> Vec<&'static str> {
        self.steps.iter().rev().map(|s| s.name).collect()
    }

    /// Run every registered action, last registered first, one at a time.
    pub async fn unwind(&mut self) {
        while let Some(step) = self.steps.pop() {
            tracing::info!(subsystem = step.name, "Stopping");
            (step.action)().await;
            tracing::debug!(subsystem = step.name, "Stopped");
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.steps.is_empty() {
            tracing::warn!(pending = ?self.pending(), "Teardown dropped before unwinding");
        }
    }
}
