// src/channel/mod.rs
mod accepted;

pub use accepted::AcceptedChannel;

use crate::backpressure::BackpressureController;
use crate::config::{AcceptorOptions, ChannelConfig};
use crate::metrics::AcceptorMetrics;
use crate::scheduler::Scheduler;
use crate::transport::{AcceptPoll, AcceptTransport, RawConnection, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque stable channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Fresh identifier for an acceptor channel.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[cfg(unix)]
    pub(crate) fn for_connection(raw: &RawConnection) -> Self {
        use std::os::unix::io::AsRawFd;
        Self(format!("fd-{}", raw.stream.as_raw_fd()))
    }

    #[cfg(not(unix))]
    pub(crate) fn for_connection(raw: &RawConnection) -> Self {
        Self(format!("conn-{}", raw.remote))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unbound,
    Bound,
    Active,
    Closed,
}

/// Outcome of one accept cycle, surfaced to the drive loop.
#[derive(Debug)]
pub enum ReadResult {
    /// Nothing was pending.
    Empty,
    /// Exactly one connection was produced; the caller consumes it immediately.
    Produced(AcceptedChannel),
    /// The channel is closed; no further cycles will produce anything.
    Closed,
    /// The accept attempt failed; reads are now throttled.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel is {0:?}, operation requires a different state")]
    InvalidState(ChannelState),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Owns a listening socket primitive and turns inbound connection attempts
/// into discrete [`ReadResult`] events, one accept attempt per cycle.
///
/// All cycles for one channel run on a single drive loop; the channel itself
/// never spins and never blocks longer than the blocking transport's bounded
/// timeout. Accept failures are absorbed by the embedded
/// [`BackpressureController`] rather than propagated to the caller.
pub struct AcceptorChannel {
    id: ChannelId,
    state: RwLock<ChannelState>,
    config: Arc<ChannelConfig>,
    transport: Mutex<Box<dyn AcceptTransport>>,
    backpressure: BackpressureController,
    closed: watch::Sender<bool>,
    metrics: Option<Arc<AcceptorMetrics>>,
}

impl AcceptorChannel {
    pub fn new(
        options: &AcceptorOptions,
        transport: Box<dyn AcceptTransport>,
        scheduler: Arc<dyn Scheduler>,
        metrics: Option<Arc<AcceptorMetrics>>,
    ) -> Self {
        let config = Arc::new(ChannelConfig::new(options));
        let backpressure = BackpressureController::new(
            config.clone(),
            scheduler,
            options.recovery_delay(),
            metrics.clone(),
        );
        let (closed, _) = watch::channel(false);

        Self {
            id: ChannelId::random(),
            state: RwLock::new(ChannelState::Unbound),
            config,
            transport: Mutex::new(transport),
            backpressure,
            closed,
            metrics,
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn config(&self) -> &Arc<ChannelConfig> {
        &self.config
    }

    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Subscribe to the close signal (used by the drive loop).
    pub fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// True while a backpressure recovery task is pending.
    pub fn is_throttling(&self) -> bool {
        self.backpressure.is_throttling()
    }

    /// Address the listening socket is bound to, once bound.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.lock().await.local_addr()
    }

    /// Bind the listening socket with the configured backlog.
    pub async fn bind(&self, addr: SocketAddr) -> Result<(), ChannelError> {
        let mut state = self.state.write().await;
        if *state != ChannelState::Unbound {
            return Err(ChannelError::InvalidState(*state));
        }

        let mut transport = self.transport.lock().await;
        transport.bind(addr, self.config.backlog())?;
        let local = transport.local_addr();
        drop(transport);

        *state = ChannelState::Bound;
        info!(
            channel = %self.id,
            address = ?local,
            backlog = self.config.backlog(),
            "listener bound"
        );
        Ok(())
    }

    /// Mark the channel registered with its drive loop. Idempotent once active.
    pub async fn activate(&self) -> Result<(), ChannelError> {
        let mut state = self.state.write().await;
        match *state {
            ChannelState::Bound => {
                *state = ChannelState::Active;
                if let Some(metrics) = &self.metrics {
                    metrics.channel_opened();
                }
                info!(channel = %self.id, "acceptor channel active");
                Ok(())
            }
            ChannelState::Active => Ok(()),
            other => Err(ChannelError::InvalidState(other)),
        }
    }

    /// Park until an accept attempt is likely to make progress, or the channel
    /// is closed.
    pub async fn await_ready(&self) {
        let mut closed_rx = self.closed.subscribe();
        if *closed_rx.borrow() {
            return;
        }

        let mut transport = self.transport.lock().await;
        tokio::select! {
            result = transport.ready() => {
                if let Err(err) = result {
                    debug!(channel = %self.id, error = %err, "readiness wait failed");
                }
            }
            _ = closed_rx.changed() => {}
        }
    }

    /// Run one accept cycle: exactly one accept attempt, one result.
    pub async fn read_cycle(&self) -> ReadResult {
        if *self.state.read().await == ChannelState::Closed {
            return ReadResult::Closed;
        }

        let mut transport = self.transport.lock().await;
        if transport.is_closed() {
            drop(transport);
            // the listening socket went away underneath us
            self.close().await;
            return ReadResult::Closed;
        }

        let poll = transport.accept_once();
        drop(transport);

        match poll {
            Ok(AcceptPoll::Empty) => ReadResult::Empty,
            Ok(AcceptPoll::Closed) => {
                self.close().await;
                ReadResult::Closed
            }
            Ok(AcceptPoll::Accepted(raw)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_accept();
                }
                let accepted = AcceptedChannel::from_raw(raw, self.id.clone());
                debug!(
                    channel = %self.id,
                    accepted = %accepted.id(),
                    peer = %accepted.remote_addr(),
                    "connection accepted"
                );
                ReadResult::Produced(accepted)
            }
            Err(err) => {
                warn!(
                    channel = %self.id,
                    error = %err,
                    "failed to accept a connection"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_accept_failure();
                }
                self.backpressure.on_accept_failure();
                ReadResult::Failed
            }
        }
    }

    /// Close the channel: cancel any pending recovery, release the listening
    /// socket, and wake anything parked on this channel. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.write().await;
            if *state == ChannelState::Closed {
                return;
            }
            if *state == ChannelState::Active {
                if let Some(metrics) = &self.metrics {
                    metrics.channel_closed();
                }
            }
            *state = ChannelState::Closed;
        }

        // cancel first so the recovery task cannot resurrect auto_read
        self.backpressure.cancel();
        let _ = self.closed.send(true);

        let mut transport = self.transport.lock().await;
        transport.close();
        drop(transport);

        info!(channel = %self.id, "acceptor channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use crate::transport::close_quietly;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    /// Scripted accept outcomes, one per cycle.
    enum Step {
        Empty,
        Accept,
        Fail,
        Close,
    }

    struct ScriptedTransport {
        steps: VecDeque<Step>,
        closed: bool,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                closed: false,
            }
        }
    }

    fn raw_connection() -> RawConnection {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (stream, remote) = listener.accept().unwrap();
        RawConnection {
            local: stream.local_addr().unwrap(),
            stream,
            remote,
        }
    }

    #[async_trait]
    impl AcceptTransport for ScriptedTransport {
        fn bind(&mut self, _addr: SocketAddr, _backlog: u32) -> Result<(), TransportError> {
            Ok(())
        }

        async fn ready(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn accept_once(&mut self) -> Result<AcceptPoll, TransportError> {
            match self.steps.pop_front() {
                Some(Step::Empty) | None => Ok(AcceptPoll::Empty),
                Some(Step::Accept) => Ok(AcceptPoll::Accepted(raw_connection())),
                Some(Step::Fail) => Err(TransportError::Accept(io::Error::new(
                    io::ErrorKind::Other,
                    "too many open files",
                ))),
                Some(Step::Close) => Ok(AcceptPoll::Closed),
            }
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        fn local_addr(&self) -> Option<SocketAddr> {
            None
        }
    }

    async fn channel_with(steps: Vec<Step>) -> AcceptorChannel {
        let channel = AcceptorChannel::new(
            &AcceptorOptions::default(),
            Box::new(ScriptedTransport::new(steps)),
            Arc::new(TokioScheduler::new()),
            None,
        );
        channel.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        channel.activate().await.unwrap();
        channel
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cycle_has_no_side_effects() {
        let channel = channel_with(vec![Step::Empty]).await;

        assert!(matches!(channel.read_cycle().await, ReadResult::Empty));
        assert!(channel.config().auto_read());
        assert!(!channel.is_throttling());
    }

    #[tokio::test(start_paused = true)]
    async fn produced_channel_carries_parent_and_derived_id() {
        let channel = channel_with(vec![Step::Accept]).await;

        match channel.read_cycle().await {
            ReadResult::Produced(accepted) => {
                assert_eq!(accepted.parent(), channel.id());
                #[cfg(unix)]
                assert!(accepted.id().as_str().starts_with("fd-"));
                close_quietly(accepted.stream());
            }
            other => panic!("expected Produced, got {:?}", other),
        }
        assert!(channel.config().auto_read());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_throttles_then_recovers() {
        let channel = channel_with(vec![Step::Fail]).await;

        assert!(matches!(channel.read_cycle().await, ReadResult::Failed));
        assert!(!channel.config().auto_read());
        assert!(channel.is_throttling());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;

        assert!(channel.config().auto_read());
        assert!(!channel.is_throttling());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_keep_a_single_recovery_pending() {
        let channel = channel_with(vec![Step::Fail, Step::Fail, Step::Fail]).await;

        for _ in 0..3 {
            assert!(matches!(channel.read_cycle().await, ReadResult::Failed));
        }
        assert!(channel.is_throttling());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;
        assert!(channel.config().auto_read());
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_recovery_and_stays_closed() {
        let channel = channel_with(vec![Step::Fail, Step::Empty]).await;

        assert!(matches!(channel.read_cycle().await, ReadResult::Failed));
        assert!(channel.is_throttling());

        channel.close().await;
        assert!(channel.is_closed());
        assert!(!channel.is_throttling());

        // recovery must not resurrect auto_read after close
        tokio::time::sleep(Duration::from_millis(2000)).await;
        settle().await;
        assert!(!channel.config().auto_read());

        assert!(matches!(channel.read_cycle().await, ReadResult::Closed));
        assert_eq!(channel.state().await, ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_reported_close_transitions_the_channel() {
        let channel = channel_with(vec![Step::Close]).await;

        assert!(matches!(channel.read_cycle().await, ReadResult::Closed));
        assert_eq!(channel.state().await, ChannelState::Closed);
        assert!(channel.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn bind_twice_is_rejected() {
        let channel = channel_with(vec![]).await;

        let err = channel
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidState(_)));
    }
}
