//! Delivery scheduling.
//!
//! Asynchronous publishes hand every delivery to a [`Scheduler`]. The bus
//! ships two implementations:
//!
//! - [`InlineScheduler`] runs each task immediately on the calling thread
//! - [`DispatchQueue`] owns one ordered execution context (a dedicated thread
//!   or a task on a tokio runtime) and runs tasks in FIFO order
//!
//! Items enqueued by one publish keep their relative order, but they may
//! interleave with work enqueued by other publishers.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

use crate::error::{panic_message, BusError, Result};
use crate::types::Task;

/// Strategy for running deferred deliveries
pub trait Scheduler: Send + Sync {
    /// Hand a task to the execution context.
    fn schedule(&self, task: Task);

    /// Block until every task scheduled before this call has run.
    fn flush(&self) {}
}

/// Runs every task on the scheduling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn schedule(&self, task: Task) {
        run_task(task);
    }
}

/// A single ordered execution context fed through an unbounded channel
pub struct DispatchQueue {
    sender: mpsc::UnboundedSender<Task>,
    worker: Option<JoinHandle<()>>,
}

impl DispatchQueue {
    /// Start a dedicated dispatch thread with the given name.
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(task) = receiver.blocking_recv() {
                    run_task(task);
                }
                tracing::debug!("Dispatch thread drained, exiting");
            })?;

        tracing::debug!("Dispatch thread '{}' started", name);
        Ok(Self {
            sender,
            worker: Some(worker),
        })
    }

    /// Run the queue as a task on an existing tokio runtime.
    pub fn on_runtime(handle: &tokio::runtime::Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = receiver.recv().await {
                run_task(task);
            }
            tracing::debug!("Dispatch task drained, exiting");
        });

        Self {
            sender,
            worker: None,
        }
    }

    /// Enqueue a task, failing if the execution context has gone away.
    pub fn try_schedule(&self, task: Task) -> Result<()> {
        self.sender.send(task).map_err(|_| BusError::QueueClosed)
    }

    /// Wait asynchronously until all previously queued tasks have run.
    ///
    /// Returns false if the queue is closed.
    pub async fn flushed(&self) -> bool {
        match self.enqueue_marker() {
            Some(done) => done.await.is_ok(),
            None => false,
        }
    }

    /// Queue a task that fires the returned receiver once it runs.
    fn enqueue_marker(&self) -> Option<oneshot::Receiver<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        let marker: Task = Box::new(move || {
            let _ = done_tx.send(());
        });
        self.try_schedule(marker).ok().map(|_| done_rx)
    }

    /// Whether the calling thread is this queue's dedicated dispatch thread.
    fn on_worker_thread(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| worker.thread().id() == thread::current().id())
    }

    /// Whether the execution context still accepts work.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Stop accepting work, let the queue drain, and join the dispatch
    /// thread. Must not be called from a queued task.
    pub fn shutdown(self) {
        let DispatchQueue { sender, worker } = self;
        drop(sender);
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                tracing::warn!("Dispatch queue shut down from its own thread; not joining");
                return;
            }
            if worker.join().is_err() {
                tracing::error!("Dispatch thread terminated abnormally");
            }
        }
    }
}

impl Scheduler for DispatchQueue {
    fn schedule(&self, task: Task) {
        if let Err(err) = self.try_schedule(task) {
            tracing::warn!("{}; dropping delivery", err);
        }
    }

    /// Blocks the calling thread.
    ///
    /// From a queued task this returns at once, since everything queued
    /// earlier has already run. Inside a tokio runtime it logs a warning and
    /// returns without waiting; await [`Self::flushed`] there instead.
    fn flush(&self) {
        if self.on_worker_thread() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            tracing::warn!(
                "Dispatch queue flush called inside a tokio runtime; use flushed().await"
            );
            return;
        }
        if let Some(done) = self.enqueue_marker() {
            let _ = done.blocking_recv();
        }
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("open", &self.is_open())
            .field("dedicated_thread", &self.worker.is_some())
            .finish()
    }
}

/// Run a task, containing any panic so the execution context survives.
fn run_task(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(
            "Scheduled task panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn exploding_task() {
        panic!("handler exploded");
    }

    #[test]
    fn test_inline_scheduler_runs_immediately() {
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        InlineScheduler.schedule(Box::new(move || *flag.lock() = true));
        assert!(*ran.lock());
    }

    #[test]
    fn test_dispatch_queue_is_fifo() {
        let queue = DispatchQueue::spawn("test-dispatch").expect("spawn dispatch thread");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            queue.schedule(Box::new(move || seen.lock().push(i)));
        }
        queue.flush();

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
        queue.shutdown();
    }

    #[test]
    fn test_dispatch_queue_runs_off_caller_thread() {
        let queue = DispatchQueue::spawn("test-dispatch").expect("spawn dispatch thread");
        let caller = thread::current().id();
        let observed = Arc::new(Mutex::new(None));

        let slot = observed.clone();
        queue.schedule(Box::new(move || {
            *slot.lock() = Some(thread::current().id());
        }));
        queue.flush();

        let worker = observed.lock().expect("task ran");
        assert_ne!(worker, caller);
        queue.shutdown();
    }

    #[test]
    fn test_dispatch_queue_survives_panicking_task() {
        let queue = DispatchQueue::spawn("test-dispatch").expect("spawn dispatch thread");
        let ran = Arc::new(Mutex::new(false));

        queue.schedule(Box::new(exploding_task));
        let flag = ran.clone();
        queue.schedule(Box::new(move || *flag.lock() = true));
        queue.flush();

        assert!(*ran.lock());
        assert!(queue.is_open());
        queue.shutdown();
    }

    #[test]
    fn test_shutdown_drains_pending_tasks() {
        let queue = DispatchQueue::spawn("test-dispatch").expect("spawn dispatch thread");
        let count = Arc::new(Mutex::new(0));
        for _ in 0..10 {
            let count = count.clone();
            queue.schedule(Box::new(move || *count.lock() += 1));
        }
        queue.shutdown();
        assert_eq!(*count.lock(), 10);
    }

    #[test]
    fn test_flush_from_queued_task_returns() {
        let queue = Arc::new(DispatchQueue::spawn("test-dispatch").expect("spawn dispatch thread"));
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let inner = queue.clone();
        queue.schedule(Box::new(move || {
            inner.flush();
            let _ = done_tx.send(());
        }));

        assert!(done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .is_ok());
    }

    #[tokio::test]
    async fn test_flush_inside_runtime_does_not_block() {
        let queue = DispatchQueue::spawn("test-dispatch").expect("spawn dispatch thread");
        queue.flush();
        assert!(queue.flushed().await);
    }

    #[tokio::test]
    async fn test_runtime_queue_flushes() {
        let queue = DispatchQueue::on_runtime(&tokio::runtime::Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            queue.schedule(Box::new(move || seen.lock().push(i)));
        }

        assert!(queue.flushed().await);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }
}
