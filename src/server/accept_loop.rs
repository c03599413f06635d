// ────────────────────────────────
// src/server/accept_loop.rs
// Drives one acceptor channel on its own serialized task.
// ────────────────────────────────
use crate::channel::{AcceptedChannel, AcceptorChannel, ChannelError, ReadResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// The single execution context of an acceptor channel.
///
/// One loop per channel: read cycles, throttle waits and close observation all
/// happen here, so no two cycles of the same channel ever run concurrently.
/// Produced connections are forwarded immediately; the loop never buffers more
/// than the one result a cycle can yield.
pub struct AcceptLoop {
    channel: Arc<AcceptorChannel>,
    sink: mpsc::Sender<AcceptedChannel>,
}

impl AcceptLoop {
    pub fn new(channel: Arc<AcceptorChannel>, sink: mpsc::Sender<AcceptedChannel>) -> Self {
        Self { channel, sink }
    }

    /// Register the channel and drive it until it closes.
    pub async fn run(self) -> Result<(), ChannelError> {
        self.channel.activate().await?;

        let config = self.channel.config().clone();
        let mut auto_read_rx = config.watch_auto_read();
        let mut closed_rx = self.channel.closed_watch();

        info!(channel = %self.channel.id(), "accept loop started");

        loop {
            if self.channel.is_closed() {
                break;
            }

            if !config.auto_read() {
                // throttled by backpressure (or paused by an operator); sleep
                // until the flag flips or the channel closes
                tokio::select! {
                    changed = auto_read_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = closed_rx.changed() => {}
                }
                continue;
            }

            self.channel.await_ready().await;

            match self.channel.read_cycle().await {
                ReadResult::Produced(accepted) => {
                    if self.sink.send(accepted).await.is_err() {
                        // nobody left to hand connections to
                        debug!(channel = %self.channel.id(), "sink dropped, closing channel");
                        self.channel.close().await;
                        break;
                    }
                }
                ReadResult::Empty | ReadResult::Failed => continue,
                ReadResult::Closed => break,
            }
        }

        info!(channel = %self.channel.id(), "accept loop stopped");
        Ok(())
    }
}
