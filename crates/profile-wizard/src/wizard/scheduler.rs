use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::oneshot;
use tracing::trace;

/// Deferred unit of work handed to a [`Scheduler`].
pub type ScheduledTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to a pending task. Dropping the handle cancels the task unless its delay has
/// already elapsed.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    cancel: oneshot::Sender<()>,
}

impl TaskHandle {
    /// Pairs a task id with the sender that cancels it. For `Scheduler` implementations.
    pub fn from_parts(id: u64, cancel: oneshot::Sender<()>) -> Self {
        Self { id, cancel }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancels the task if it is still waiting. A task whose delay elapsed keeps running.
    pub fn cancel(self) {
        trace!(task = self.id, "cancelling scheduled task");
        let _ = self.cancel.send(());
    }
}

/// Delayed execution with cancellation, independent of any UI lifecycle.
pub trait Scheduler: Send + Sync {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask) -> TaskHandle;

    fn cancel(&self, handle: TaskHandle) {
        handle.cancel();
    }
}

static TASK_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Runs tasks on a tokio runtime: each task races its delay against a cancel signal.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Binds to the runtime of the calling context.
    pub fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask) -> TaskHandle {
        let id = TASK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel::<()>();

        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    trace!(task = id, "scheduled task fired");
                    task.await;
                }
                _ = cancelled => {
                    trace!(task = id, "scheduled task cancelled before firing");
                }
            }
        });

        TaskHandle::from_parts(id, cancel)
    }
}
