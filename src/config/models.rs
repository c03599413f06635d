// src/config/models.rs
use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

/// Construction-time options for an acceptor channel.
#[derive(Debug, Clone, Deserialize)]
pub struct AcceptorOptions {
    /// Listen backlog passed to the OS when binding.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Bounded wait for the blocking accept variant, in milliseconds.
    #[serde(default = "default_so_timeout_ms")]
    pub so_timeout_ms: u64,

    /// Whether read cycles run as soon as the channel is registered.
    #[serde(default = "default_auto_read")]
    pub auto_read: bool,

    /// Cooldown before reads are re-enabled after an accept failure, in milliseconds.
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,
}

fn default_backlog() -> u32 {
    128
}

fn default_so_timeout_ms() -> u64 {
    1000
}

fn default_auto_read() -> bool {
    true
}

fn default_recovery_delay_ms() -> u64 {
    1000
}

impl Default for AcceptorOptions {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
            so_timeout_ms: default_so_timeout_ms(),
            auto_read: default_auto_read(),
            recovery_delay_ms: default_recovery_delay_ms(),
        }
    }
}

impl AcceptorOptions {
    pub fn validate(&self) -> Result<()> {
        if self.backlog == 0 {
            bail!("backlog must be greater than zero");
        }
        if self.so_timeout_ms == 0 {
            bail!("so_timeout_ms must be greater than zero");
        }
        if self.recovery_delay_ms == 0 {
            bail!("recovery_delay_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn so_timeout(&self) -> Duration {
        Duration::from_millis(self.so_timeout_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}
