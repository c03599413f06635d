// src/scheduler/mod.rs
mod runtime;

pub use runtime::TokioScheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

/// A unit of work submitted to the scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serialized execution context consumed by an acceptor channel.
///
/// The channel only needs three things from its host: one-shot delayed
/// submission (recovery tasks), immediate submission on the channel's context
/// (connection handoff), and a clock that is consistent with the delays.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`, unless the returned handle is cancelled first.
    fn schedule_once(&self, delay: Duration, task: Task) -> ScheduledTask;

    /// Run `task` as soon as the execution context gets around to it.
    fn run_on_context(&self, task: Task);

    fn now(&self) -> Instant;
}

/// Handle to a one-shot scheduled task.
///
/// A task observed cancelled before its deadline never fires. Cancellation is
/// best-effort against a task that is already firing; callers who must not
/// observe a late firing serialize against it with their own lock.
#[derive(Debug)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    fired: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl ScheduledTask {
    pub fn new(
        cancelled: Arc<AtomicBool>,
        fired: Arc<AtomicBool>,
        abort: Option<AbortHandle>,
    ) -> Self {
        Self {
            cancelled,
            fired,
            abort,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Scheduled, not yet fired, not cancelled.
    pub fn is_pending(&self) -> bool {
        !self.has_fired() && !self.is_cancelled()
    }
}
