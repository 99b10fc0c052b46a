//! Background Task Queue + Worker (C10): decouples `execute()`'s immediate
//! `EID` return from the actual supervised run. New module, grounded in the
//! teacher's channel-based concurrency and hosted-worker idiom
//! (`supervisor.rs`'s `mpsc`/`oneshot` plumbing generalized to a queue).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{Result, TaskGridError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of background work. Receives a clone of the process-wide
/// cancellation token chained down from shutdown so it can chain it
/// further into any C3 supervision it starts (I6).
pub type BoxedTask = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// Bounded, non-blocking-enqueue task queue. `enqueue` returns
/// `QueueFull` instead of blocking, so a caller (C5/C8) that needs
/// backpressure signaling gets it synchronously rather than stalling on a
/// full channel.
pub struct TaskQueue {
    sender: mpsc::Sender<BoxedTask>,
    shutdown: CancellationToken,
}

pub struct TaskQueueWorker {
    receiver: mpsc::Receiver<BoxedTask>,
    shutdown: CancellationToken,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> (Arc<Self>, TaskQueueWorker) {
        let (sender, receiver) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();
        (
            Arc::new(Self {
                sender,
                shutdown: shutdown.clone(),
            }),
            TaskQueueWorker { receiver, shutdown },
        )
    }

    pub fn enqueue(&self, task: BoxedTask) -> Result<()> {
        self.sender
            .try_send(task)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TaskGridError::QueueFull("background task queue is at capacity".into()),
                mpsc::error::TrySendError::Closed(_) => TaskGridError::QueueFull("background task queue worker has shut down".into()),
            })
    }

    /// Signals the worker to stop accepting new dispatch and propagates
    /// cancellation to every in-flight task's chained token (I6).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Free slots left before `enqueue` would return `QueueFull`.
    pub fn available_capacity(&self) -> usize {
        self.sender.capacity()
    }

    /// The bound passed to `TaskQueue::new`.
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

impl TaskQueueWorker {
    /// Drains the queue, spawning each task on its own `tokio` task so a
    /// slow task never blocks dispatch of the next one. Exits once the
    /// sender side is dropped or shutdown is signalled and the channel is
    /// drained.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    warn!("task queue worker received shutdown signal; draining remaining tasks");
                    while let Ok(task) = self.receiver.try_recv() {
                        self.dispatch(task);
                    }
                    break;
                }
                task = self.receiver.recv() => {
                    match task {
                        Some(task) => self.dispatch(task),
                        None => break,
                    }
                }
            }
        }
    }

    fn dispatch(&self, task: BoxedTask) {
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            task(token).await;
        });
    }
}

impl Drop for TaskQueueWorker {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            error!("task queue worker dropped without an explicit shutdown");
        }
    }
}
