// src/config/channel.rs
use crate::config::AcceptorOptions;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Runtime configuration shared between an acceptor channel, its backpressure
/// controller and its drive loop.
///
/// `auto_read` is backed by a watch channel so a throttled drive loop can sleep
/// until the flag changes instead of polling it. Only the channel's own context
/// (accept cycle, recovery task, operator through the channel handle) is
/// expected to write here.
pub struct ChannelConfig {
    auto_read: watch::Sender<bool>,
    backlog: AtomicU32,
    so_timeout_ms: AtomicU64,
}

impl ChannelConfig {
    pub fn new(options: &AcceptorOptions) -> Self {
        let (auto_read, _) = watch::channel(options.auto_read);
        Self {
            auto_read,
            backlog: AtomicU32::new(options.backlog),
            so_timeout_ms: AtomicU64::new(options.so_timeout_ms),
        }
    }

    pub fn auto_read(&self) -> bool {
        *self.auto_read.borrow()
    }

    /// Toggle read interest.
    ///
    /// Known quirk inherited from the original behavior: the backpressure
    /// recovery task re-enables reads through this same flag, so an operator
    /// who disabled reads before a failure window may find them re-enabled
    /// once the cooldown elapses.
    pub fn set_auto_read(&self, enabled: bool) {
        self.auto_read.send_replace(enabled);
    }

    /// Subscribe to `auto_read` changes (used by the drive loop while throttled).
    pub fn watch_auto_read(&self) -> watch::Receiver<bool> {
        self.auto_read.subscribe()
    }

    pub fn backlog(&self) -> u32 {
        self.backlog.load(Ordering::Relaxed)
    }

    pub fn set_backlog(&self, backlog: u32) {
        self.backlog.store(backlog, Ordering::Relaxed);
    }

    pub fn so_timeout(&self) -> Duration {
        Duration::from_millis(self.so_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_so_timeout_ms(&self, millis: u64) {
        self.so_timeout_ms.store(millis, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("auto_read", &self.auto_read())
            .field("backlog", &self.backlog())
            .field("so_timeout", &self.so_timeout())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_read_changes_wake_watchers() {
        let config = ChannelConfig::new(&AcceptorOptions::default());
        let mut rx = config.watch_auto_read();

        assert!(config.auto_read());
        config.set_auto_read(false);

        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
        assert!(!config.auto_read());
    }

    #[test]
    fn setters_update_runtime_values() {
        let config = ChannelConfig::new(&AcceptorOptions::default());
        config.set_backlog(50);
        config.set_so_timeout_ms(250);

        assert_eq!(config.backlog(), 50);
        assert_eq!(config.so_timeout(), Duration::from_millis(250));
    }
}
