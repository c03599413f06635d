// src/transport/blocking.rs
use super::{close_quietly, complete_accept, AcceptPoll, AcceptTransport, TransportError};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

/// Blocking listening-socket variant.
///
/// One accept call per read cycle, bounded by `SO_RCVTIMEO` so a cycle never
/// waits longer than the configured timeout. The bounded wait runs on a
/// blocking thread during `ready`, keeping the shared runtime free to drive
/// timers and other channels; `accept_once` then consumes the staged outcome.
/// A timeout expiry is an expected condition and maps to [`AcceptPoll::Empty`].
pub struct BlockingTcpTransport {
    so_timeout: Duration,
    listener: Option<TcpListener>,
    local: Option<SocketAddr>,
    // outcome staged by `ready`, consumed by the next `accept_once`
    staged: Option<Result<AcceptPoll, TransportError>>,
}

impl BlockingTcpTransport {
    pub fn new(so_timeout: Duration) -> Self {
        Self {
            so_timeout,
            listener: None,
            local: None,
            staged: None,
        }
    }
}

/// One bounded accept attempt on a listener carrying `SO_RCVTIMEO`.
fn accept_bounded(listener: &TcpListener) -> Result<AcceptPoll, TransportError> {
    match listener.accept() {
        Ok((stream, remote)) => {
            // Accepted sockets inherit SO_RCVTIMEO; clear it before handoff.
            if let Err(err) = stream.set_read_timeout(None) {
                close_quietly(&stream);
                return Err(TransportError::Accept(err));
            }
            Ok(AcceptPoll::Accepted(complete_accept(stream, remote)?))
        }
        // Bounded wait elapsed with nothing pending. Expected
        Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            Ok(AcceptPoll::Empty)
        }
        Err(err) => Err(TransportError::Accept(err)),
    }
}

#[async_trait]
impl AcceptTransport for BlockingTcpTransport {
    fn bind(&mut self, addr: SocketAddr, backlog: u32) -> Result<(), TransportError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(TransportError::Configure)?;

        // Dropping `socket` on the error paths below closes the partially
        // initialized handle before the failure is reported.
        socket
            .set_read_timeout(Some(self.so_timeout))
            .map_err(TransportError::Configure)?;
        socket
            .set_reuse_address(true)
            .map_err(TransportError::Configure)?;

        socket
            .bind(&addr.into())
            .map_err(TransportError::Bind)?;
        socket
            .listen(backlog as i32)
            .map_err(TransportError::Bind)?;

        let listener: TcpListener = socket.into();
        self.local = listener.local_addr().ok();
        self.listener = Some(listener);
        Ok(())
    }

    async fn ready(&mut self) -> Result<(), TransportError> {
        if self.staged.is_some() {
            return Ok(());
        }
        let listener = match &self.listener {
            Some(listener) => listener.try_clone().map_err(TransportError::Accept)?,
            // closed; let the next cycle observe it
            None => return Ok(()),
        };

        let outcome = tokio::task::spawn_blocking(move || accept_bounded(&listener))
            .await
            .map_err(|err| TransportError::Accept(io::Error::new(ErrorKind::Other, err)))?;
        self.staged = Some(outcome);
        Ok(())
    }

    fn accept_once(&mut self) -> Result<AcceptPoll, TransportError> {
        if let Some(outcome) = self.staged.take() {
            return outcome;
        }
        let listener = match &self.listener {
            Some(listener) => listener,
            None => return Ok(AcceptPoll::Closed),
        };
        accept_bounded(listener)
    }

    fn close(&mut self) {
        // a staged-but-unconsumed connection is closed along with the listener
        self.staged = None;
        if let Some(listener) = self.listener.take() {
            tracing::debug!(address = ?self.local, "closing blocking listener");
            drop(listener);
        }
    }

    fn is_closed(&self) -> bool {
        self.listener.is_none()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }
}
