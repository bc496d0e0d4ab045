//! Shutdown coordination and task ownership.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Coordinator for cooperative shutdown.
///
/// Backed by a watch channel, so a listener created after the trigger still
/// observes it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered.
    pub async fn recv(&mut self) {
        // The sender lives in the owning TaskGroup; a closed channel means
        // the group is gone and the task must end as well.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

/// The tasks of one subsystem and the signal that stops them.
///
/// `stop` only returns after every task has ended, so two subsystems are
/// never torn down at the same time.
#[derive(Debug)]
pub struct TaskGroup {
    name: &'static str,
    shutdown: Shutdown,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            shutdown: Shutdown::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn listener(&self) -> ShutdownListener {
        self.shutdown.subscribe()
    }

    /// Spawn a task owned by this group.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.handles.lock().push(handle);
    }

    /// Spawn a loop calling `tick` immediately and then every `period`
    /// until the group is stopped.
    pub fn spawn_periodic<F, Fut>(&self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.listener();
        let name = self.name;
        self.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        // A tick in progress is not interrupted.
                        tick().await;
                    }
                }
            }
            tracing::debug!(subsystem = name, "Refresh loop exited");
        });
    }

    /// Signal every task and wait for all of them to end.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(subsystem = self.name, error = %e, "Task panicked");
                }
            }
        }
    }

    /// Number of tasks not yet collected by `stop`.
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn late_listener_sees_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut listener = shutdown.subscribe();
        tokio::time::timeout(Duration::from_millis(100), listener.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stop_waits_for_tasks() {
        let group = TaskGroup::new("test");
        let finished = Arc::new(AtomicBool::new(false));
        let mut listener = group.listener();
        let flag = finished.clone();
        group.spawn(async move {
            listener.recv().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        group.stop().await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(group.task_count(), 0);
    }

    #[tokio::test]
    async fn periodic_ticks_until_stopped() {
        let group = TaskGroup::new("ticker");
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        group.spawn_periodic(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        group.stop().await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {seen} ticks");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
