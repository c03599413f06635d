// src/backpressure/mod.rs

use crate::config::ChannelConfig;
use crate::metrics::AcceptorMetrics;
use crate::scheduler::{ScheduledTask, Scheduler};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The one recovery slot, plus the revocation mark set by `cancel`.
///
/// The recovery task and `cancel` both take this lock before touching
/// `auto_read`, so a recovery that is already firing when the channel closes
/// still observes the revocation and leaves reads disabled.
#[derive(Default)]
struct PendingSlot {
    task: Option<ScheduledTask>,
    revoked: bool,
}

struct Shared {
    config: Arc<ChannelConfig>,
    pending: Mutex<PendingSlot>,
    throttled_at: Mutex<Option<Instant>>,
    metrics: Option<Arc<AcceptorMetrics>>,
}

/// Converts an accept-failure storm into a bounded-rate retry.
///
/// On a non-recoverable accept error the controller forces `auto_read` off and
/// schedules a single recovery task; until that task fires, further failures
/// are absorbed without scheduling anything new. Without the cooldown, a
/// persistent failure such as file-descriptor exhaustion would have the
/// scheduler re-invoke the accept cycle in a tight loop.
pub struct BackpressureController {
    shared: Arc<Shared>,
    scheduler: Arc<dyn Scheduler>,
    recovery_delay: Duration,
}

impl BackpressureController {
    pub fn new(
        config: Arc<ChannelConfig>,
        scheduler: Arc<dyn Scheduler>,
        recovery_delay: Duration,
        metrics: Option<Arc<AcceptorMetrics>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                pending: Mutex::new(PendingSlot::default()),
                throttled_at: Mutex::new(None),
                metrics,
            }),
            scheduler,
            recovery_delay,
        }
    }

    /// React to a non-recoverable accept error. Called only from the accept cycle.
    pub fn on_accept_failure(&self) {
        // Reads already disabled: either we are throttling and one recovery
        // task is pending, or an operator paused reads. Either way there is
        // nothing to schedule.
        if !self.shared.config.auto_read() {
            return;
        }

        self.shared.config.set_auto_read(false);
        *self
            .shared
            .throttled_at
            .lock()
            .expect("backpressure state poisoned") = Some(self.scheduler.now());
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_throttled(true);
        }
        debug!(
            delay = ?self.recovery_delay,
            "accept reads disabled; recovery scheduled"
        );

        let shared = self.shared.clone();
        let scheduler = self.scheduler.clone();
        let task = self.scheduler.schedule_once(
            self.recovery_delay,
            Box::new(move || {
                {
                    let mut slot = shared.pending.lock().expect("backpressure state poisoned");
                    if slot.revoked {
                        return;
                    }
                    // Unconditional re-enable, matching the observed behavior
                    // of the original: an operator who disabled reads in the
                    // meantime is overridden here.
                    shared.config.set_auto_read(true);
                    slot.task.take();
                }
                let since = shared
                    .throttled_at
                    .lock()
                    .expect("backpressure state poisoned")
                    .take();
                if let Some(metrics) = &shared.metrics {
                    metrics.set_throttled(false);
                }
                if let Some(at) = since {
                    info!(
                        throttled_for = ?scheduler.now().duration_since(at),
                        "accept reads re-enabled"
                    );
                }
            }),
        );

        self.shared
            .pending
            .lock()
            .expect("backpressure state poisoned")
            .task = Some(task);
    }

    /// Revoke recovery. Used on channel close so a recovery task, pending or
    /// already firing, cannot resurrect `auto_read` afterwards.
    pub fn cancel(&self) {
        let mut slot = self.shared.pending.lock().expect("backpressure state poisoned");
        slot.revoked = true;
        if let Some(task) = slot.task.take() {
            task.cancel();
            if let Some(metrics) = &self.shared.metrics {
                metrics.set_throttled(false);
            }
        }
    }

    /// True while a recovery task is scheduled and has not yet fired.
    pub fn is_throttling(&self) -> bool {
        self.shared
            .pending
            .lock()
            .expect("backpressure state poisoned")
            .task
            .as_ref()
            .map_or(false, |task| task.is_pending())
    }
}
