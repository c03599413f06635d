// src/channel/accepted.rs
use super::ChannelId;
use crate::transport::RawConnection;
use std::net::{SocketAddr, TcpStream};

/// A per-connection channel produced by a successful accept.
///
/// Ownership transfers to the surrounding framework immediately; the acceptor
/// never retains it.
#[derive(Debug)]
pub struct AcceptedChannel {
    id: ChannelId,
    parent: ChannelId,
    local: SocketAddr,
    remote: SocketAddr,
    stream: TcpStream,
}

impl AcceptedChannel {
    pub(crate) fn from_raw(raw: RawConnection, parent: ChannelId) -> Self {
        let id = ChannelId::for_connection(&raw);
        Self {
            id,
            parent,
            local: raw.local,
            remote: raw.remote,
            stream: raw.stream,
        }
    }

    /// Identifier derived from the native connection handle.
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Identifier of the acceptor channel that produced this connection.
    pub fn parent(&self) -> &ChannelId {
        &self.parent
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Hand the native stream off to the framework.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}
