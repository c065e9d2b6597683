//! Meter listener registry and the subscription guard.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tracing::debug;

use super::RouterInner;

/// Receives `(channel id, level)` with level in [0, 1].
pub type MeterListener = Arc<dyn Fn(&str, f32) + Send + Sync>;

/// Listeners plus the polling task that feeds them. The task exists only
/// while at least one listener does.
#[derive(Default)]
pub(crate) struct MeterHub {
    listeners: Vec<(u64, MeterListener)>,
    next_id: u64,
    task: Option<JoinHandle<()>>,
}

impl MeterHub {
    pub(crate) fn add(&mut self, listener: MeterListener) -> u64 {
        self.next_id += 1;
        self.listeners.push((self.next_id, listener));
        self.next_id
    }

    /// Remove a listener; stops polling when it was the last one.
    pub(crate) fn remove(&mut self, id: u64) {
        self.listeners.retain(|(listener, _)| *listener != id);
        if self.listeners.is_empty() {
            self.stop();
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<MeterListener> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.task.is_some()
    }

    pub(crate) fn set_task(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.task.replace(task) {
            previous.abort();
        }
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("meter polling stopped");
        }
    }
}

impl Drop for MeterHub {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Keeps a meter listener registered. Call [`unsubscribe`](Self::unsubscribe)
/// or drop it to remove the listener.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct MeterSubscription {
    router: Weak<RouterInner>,
    id: u64,
}

impl MeterSubscription {
    pub(crate) fn new(router: Weak<RouterInner>, id: u64) -> Self {
        Self { router, id }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.meters.lock().remove(self.id);
        }
        self.router = Weak::new();
    }
}

impl Drop for MeterSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
