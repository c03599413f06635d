// src/transport/polled.rs
use super::{close_quietly, complete_accept, AcceptPoll, AcceptTransport, TransportError};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// Non-blocking listening-socket variant.
///
/// The descriptor is registered with the tokio reactor; `accept_once` returns
/// [`AcceptPoll::Empty`] with no wait when nothing is pending, and `ready`
/// parks until the reactor reports the descriptor readable again.
///
/// `bind` must be called from within a tokio runtime so the descriptor can be
/// registered.
pub struct PolledTcpTransport {
    fd: Option<AsyncFd<TcpListener>>,
    local: Option<SocketAddr>,
    // set when an accept attempt drained the queue, meaning the readiness the
    // reactor last reported is stale and must be cleared before parking
    stale_ready: bool,
}

impl PolledTcpTransport {
    pub fn new() -> Self {
        Self {
            fd: None,
            local: None,
            stale_ready: false,
        }
    }
}

impl Default for PolledTcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AcceptTransport for PolledTcpTransport {
    fn bind(&mut self, addr: SocketAddr, backlog: u32) -> Result<(), TransportError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(TransportError::Configure)?;

        // Dropping `socket` on the error paths below closes the partially
        // initialized handle before the failure is reported.
        socket
            .set_nonblocking(true)
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
        self.fd = Some(
            AsyncFd::with_interest(listener, Interest::READABLE)
                .map_err(TransportError::Configure)?,
        );
        Ok(())
    }

    async fn ready(&mut self) -> Result<(), TransportError> {
        loop {
            let stale = std::mem::take(&mut self.stale_ready);
            let fd = match &self.fd {
                Some(fd) => fd,
                // closed; let the next cycle observe it
                None => return Ok(()),
            };

            let mut guard = fd.readable().await.map_err(TransportError::Accept)?;
            if stale {
                guard.clear_ready();
                continue;
            }
            return Ok(());
        }
    }

    fn accept_once(&mut self) -> Result<AcceptPoll, TransportError> {
        let fd = match &self.fd {
            Some(fd) => fd,
            None => return Ok(AcceptPoll::Closed),
        };

        match fd.get_ref().accept() {
            Ok((stream, remote)) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    close_quietly(&stream);
                    return Err(TransportError::Accept(err));
                }
                Ok(AcceptPoll::Accepted(complete_accept(stream, remote)?))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                self.stale_ready = true;
                Ok(AcceptPoll::Empty)
            }
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            tracing::debug!(address = ?self.local, "closing polled listener");
            drop(fd);
        }
    }

    fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::time::Duration;

    fn bound() -> PolledTcpTransport {
        let mut transport = PolledTcpTransport::new();
        transport
            .bind("127.0.0.1:0".parse().unwrap(), 50)
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn empty_poll_returns_without_waiting() {
        let mut transport = bound();

        let poll = transport.accept_once().unwrap();
        assert!(matches!(poll, AcceptPoll::Empty));
    }

    #[tokio::test]
    async fn readiness_then_accept_yields_connection() {
        let mut transport = bound();
        let addr = transport.local_addr().unwrap();

        // drain readiness first so `ready` has to re-arm
        assert!(matches!(transport.accept_once().unwrap(), AcceptPoll::Empty));

        let client = TcpStream::connect(addr).unwrap();

        tokio::time::timeout(Duration::from_secs(5), transport.ready())
            .await
            .expect("listener never became readable")
            .unwrap();

        match transport.accept_once().unwrap() {
            AcceptPoll::Accepted(raw) => {
                assert_eq!(raw.remote, client.local_addr().unwrap());
            }
            other => panic!("expected an accepted connection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn accept_after_close_reports_closed() {
        let mut transport = bound();
        transport.close();

        assert!(transport.is_closed());
        assert!(matches!(transport.accept_once().unwrap(), AcceptPoll::Closed));
    }
}
