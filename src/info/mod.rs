//! Connection Information

use std::{fmt, io};

/// Information about a connection to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo<Addr> {
    /// The local address for this connection.
    pub local_addr: Addr,

    /// The remote address for this connection.
    pub remote_addr: Addr,
}

impl<Addr> ConnectionInfo<Addr> {
    /// The local address for this connection
    pub fn local_addr(&self) -> &Addr {
        &self.local_addr
    }

    /// The remote address for this connection
    pub fn remote_addr(&self) -> &Addr {
        &self.remote_addr
    }
}

/// Trait for types which can provide connection information.
///
/// Address queries are forwarded to the underlying socket, so they fail
/// the same way the socket does (for example, once the peer has reset it).
pub trait HasConnectionInfo {
    /// The address type for this connection.
    type Addr: fmt::Display + fmt::Debug + Send;

    /// Get the connection information for this stream.
    fn info(&self) -> io::Result<ConnectionInfo<Self::Addr>>;
}

impl HasConnectionInfo for tokio::net::TcpStream {
    type Addr = std::net::SocketAddr;

    fn info(&self) -> io::Result<ConnectionInfo<Self::Addr>> {
        Ok(ConnectionInfo {
            local_addr: self.local_addr()?,
            remote_addr: self.peer_addr()?,
        })
    }
}

/// Trait for bound endpoints which can report the address they listen on.
pub trait HasLocalAddr {
    /// The address type for this endpoint.
    type Addr: fmt::Display + fmt::Debug + Send;

    /// The local address this endpoint is bound to.
    fn local_addr(&self) -> io::Result<Self::Addr>;
}

impl HasLocalAddr for tokio::net::TcpListener {
    type Addr = std::net::SocketAddr;

    fn local_addr(&self) -> io::Result<Self::Addr> {
        tokio::net::TcpListener::local_addr(self)
    }
}
