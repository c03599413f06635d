// src/scheduler/runtime.rs
use super::{ScheduledTask, Scheduler, Task};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scheduler backed by the ambient tokio runtime.
///
/// Delays go through `tokio::time`, so tests driving a paused clock can advance
/// scheduled work deterministically.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) -> ScheduledTask {
        let cancelled = Arc::new(AtomicBool::new(false));
        let fired = Arc::new(AtomicBool::new(false));

        let cancel_flag = cancelled.clone();
        let fired_flag = fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancel_flag.load(Ordering::SeqCst) {
                fired_flag.store(true, Ordering::SeqCst);
                task();
            }
        });

        ScheduledTask::new(cancelled, fired, Some(handle.abort_handle()))
    }

    fn run_on_context(&self, task: Task) {
        tokio::spawn(async move {
            task();
        });
    }

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_fires_after_delay() {
        let scheduler = TokioScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let task = scheduler.schedule_once(
            Duration::from_millis(500),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert!(!ran.load(Ordering::SeqCst));
        assert!(task.is_pending());

        tokio::time::sleep(Duration::from_millis(400)).await;
        settle().await;
        assert!(ran.load(Ordering::SeqCst));
        assert!(task.has_fired());
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_fires() {
        let scheduler = TokioScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let task = scheduler.schedule_once(
            Duration::from_millis(100),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        task.cancel();

        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;
        assert!(!ran.load(Ordering::SeqCst));
        assert!(task.is_cancelled());
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_recorded() {
        let scheduler = TokioScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let task = scheduler.schedule_once(
            Duration::from_millis(100),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert!(ran.load(Ordering::SeqCst));

        task.cancel();
        assert!(task.has_fired());
        assert!(task.is_cancelled());
        assert!(!task.is_pending());
    }

    #[tokio::test]
    async fn run_on_context_executes() {
        let scheduler = TokioScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        scheduler.run_on_context(Box::new(move || flag.store(true, Ordering::SeqCst)));

        settle().await;
        assert!(ran.load(Ordering::SeqCst));
    }
}
