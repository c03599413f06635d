// src/transport/mod.rs
mod blocking;
#[cfg(unix)]
mod polled;

pub use blocking::BlockingTcpTransport;
#[cfg(unix)]
pub use polled::PolledTcpTransport;

use async_trait::async_trait;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};

/// Error type for listening-socket operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind listener: {0}")]
    Bind(io::Error),

    #[error("Failed to configure listener socket: {0}")]
    Configure(io::Error),

    #[error("Failed to accept connection: {0}")]
    Accept(io::Error),

    #[error("Listener is closed")]
    Closed,
}

/// Outcome of a single accept attempt.
///
/// Callers branch on the value: an expired bounded wait or an empty accept
/// queue is `Empty`, never an error.
#[derive(Debug)]
pub enum AcceptPoll {
    /// Nothing pending right now.
    Empty,
    /// One connection was accepted.
    Accepted(RawConnection),
    /// The listening socket is no longer usable.
    Closed,
}

/// A freshly accepted native connection with its addressing captured.
///
/// Both addresses are resolved inside the transport so that a failure while
/// populating them closes the OS handle before the error is reported.
#[derive(Debug)]
pub struct RawConnection {
    pub stream: TcpStream,
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

/// Minimal capability an acceptor channel needs from a listening socket.
///
/// Two interchangeable implementations exist: [`BlockingTcpTransport`] whose
/// bounded accept wait runs on a blocking thread, and `PolledTcpTransport`
/// (unix only) which polls a readiness-notified descriptor and never waits
/// inside `accept_once`.
#[async_trait]
pub trait AcceptTransport: Send {
    /// Create the listening socket and start listening with the given backlog.
    ///
    /// A failure configuring the socket closes the partially initialized
    /// handle before the error is returned.
    fn bind(&mut self, addr: SocketAddr, backlog: u32) -> Result<(), TransportError>;

    /// Wait until an accept attempt is likely to make progress.
    ///
    /// The blocking variant runs its bounded accept wait on a blocking thread
    /// and stages the outcome; the polled variant parks on descriptor
    /// readiness. Neither occupies the shared runtime while waiting.
    async fn ready(&mut self) -> Result<(), TransportError>;

    /// Attempt exactly one accept. Never waits longer than the blocking
    /// variant's configured timeout.
    fn accept_once(&mut self) -> Result<AcceptPoll, TransportError>;

    /// Release the listening socket. Best-effort and idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Best-effort cleanup of a connection we cannot keep.
///
/// Errors are logged and swallowed so they never mask the failure that made
/// the cleanup necessary.
pub(crate) fn close_quietly(stream: &TcpStream) {
    if let Err(err) = stream.shutdown(Shutdown::Both) {
        tracing::warn!(error = %err, "failed to close a partially accepted connection");
    }
}

/// Resolve addressing for an accepted stream, closing it on failure.
pub(crate) fn complete_accept(
    stream: TcpStream,
    remote: SocketAddr,
) -> Result<RawConnection, TransportError> {
    match stream.local_addr() {
        Ok(local) => Ok(RawConnection {
            stream,
            local,
            remote,
        }),
        Err(err) => {
            close_quietly(&stream);
            Err(TransportError::Accept(err))
        }
    }
}
