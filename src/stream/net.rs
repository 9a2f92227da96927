//! Network families, socket addresses and the stream type produced by listeners.
//!
//! A [`Network`] names a stream-oriented socket family (`tcp`, `tcp4`, `tcp6` or
//! `unix`). Listeners bound on any of these families produce a [`Stream`], which
//! dispatches I/O to the underlying TCP or Unix-domain socket and reports its
//! addresses as an [`Addr`].

use std::fmt;
use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::info::{ConnectionInfo, HasConnectionInfo};

/// A stream-oriented network family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Network {
    /// TCP over IPv4 or IPv6.
    Tcp,

    /// TCP over IPv4 only.
    Tcp4,

    /// TCP over IPv6 only.
    Tcp6,

    /// Unix-domain stream sockets. The address is a filesystem path.
    #[cfg(unix)]
    Unix,
}

impl Network {
    /// The canonical name of this family.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            #[cfg(unix)]
            Network::Unix => "unix",
        }
    }

    /// Whether `addr` belongs to this family.
    pub(crate) fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
            #[cfg(unix)]
            Network::Unix => false,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The network family is not a supported stream-oriented family.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported network family: {0:?}")]
pub struct UnsupportedNetwork(String);

impl FromStr for Network {
    type Err = UnsupportedNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            #[cfg(unix)]
            "unix" => Ok(Network::Unix),
            other => Err(UnsupportedNetwork(other.to_owned())),
        }
    }
}

/// Canonicalize a socket address, converting IPv4-mapped IPv6 addresses
/// into standard IPv4 addresses.
pub(crate) fn make_canonical(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => addr,
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(ip) => SocketAddr::new(ip.into(), addr.port()),
            None => addr,
        },
    }
}

/// The address of one end of a [`Stream`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addr {
    /// An IP socket address.
    Inet(SocketAddr),

    /// A Unix-domain socket path, or `None` for unnamed sockets.
    #[cfg(unix)]
    Unix(Option<PathBuf>),
}

impl Addr {
    /// The IP socket address, if this is not a Unix-domain address.
    pub fn as_inet(&self) -> Option<SocketAddr> {
        match self {
            Addr::Inet(addr) => Some(*addr),
            #[cfg(unix)]
            Addr::Unix(_) => None,
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Inet(addr) => write!(f, "{addr}"),
            #[cfg(unix)]
            Addr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            #[cfg(unix)]
            Addr::Unix(None) => f.write_str("unix:(unnamed)"),
        }
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Self {
        Addr::Inet(make_canonical(addr))
    }
}

#[cfg(unix)]
impl From<tokio::net::unix::SocketAddr> for Addr {
    fn from(addr: tokio::net::unix::SocketAddr) -> Self {
        Addr::Unix(addr.as_pathname().map(PathBuf::from))
    }
}

/// A connected stream socket of any supported [`Network`] family.
#[derive(Debug)]
pub enum Stream {
    /// A TCP stream.
    Tcp(TcpStream),

    /// A Unix-domain stream.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Local address of the connection.
    pub fn local_addr(&self) -> io::Result<Addr> {
        match self {
            Stream::Tcp(stream) => stream.local_addr().map(Addr::from),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.local_addr().map(Addr::from),
        }
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> io::Result<Addr> {
        match self {
            Stream::Tcp(stream) => stream.peer_addr().map(Addr::from),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.peer_addr().map(Addr::from),
        }
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Stream::Tcp(stream)
    }
}

#[cfg(unix)]
impl From<UnixStream> for Stream {
    fn from(stream: UnixStream) -> Self {
        Stream::Unix(stream)
    }
}

impl HasConnectionInfo for Stream {
    type Addr = Addr;

    fn info(&self) -> io::Result<ConnectionInfo<Self::Addr>> {
        Ok(ConnectionInfo {
            local_addr: self.local_addr()?,
            remote_addr: self.peer_addr()?,
        })
    }
}

macro_rules! dispatch {
    ($driver:ident.$method:ident($($args:expr),+)) => {
        match $driver.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).$method($($args),+),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).$method($($args),+),
        }
    };
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        dispatch!(self.poll_read(cx, buf))
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        dispatch!(self.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        dispatch!(self.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        dispatch!(self.poll_shutdown(cx))
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<Result<usize, io::Error>> {
        dispatch!(self.poll_write_vectored(cx, bufs))
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Stream::Tcp(stream) => stream.is_write_vectored(),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.is_write_vectored(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn parse_network() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("tcp4".parse::<Network>().unwrap(), Network::Tcp4);
        assert_eq!("tcp6".parse::<Network>().unwrap(), Network::Tcp6);
        #[cfg(unix)]
        assert_eq!("unix".parse::<Network>().unwrap(), Network::Unix);

        let err = "udp".parse::<Network>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported network family: \"udp\"");
        assert!("unixpacket".parse::<Network>().is_err());
    }

    #[test]
    fn network_family_filter() {
        let v4 = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 80);
        let v6 = SocketAddr::new(Ipv6Addr::LOCALHOST.into(), 80);

        assert!(Network::Tcp.accepts(&v4) && Network::Tcp.accepts(&v6));
        assert!(Network::Tcp4.accepts(&v4) && !Network::Tcp4.accepts(&v6));
        assert!(!Network::Tcp6.accepts(&v4) && Network::Tcp6.accepts(&v6));
    }

    #[test]
    fn canonical_mapped_address() {
        let mapped = SocketAddr::new(Ipv4Addr::new(192, 0, 2, 1).to_ipv6_mapped().into(), 8080);
        assert_eq!(
            Addr::from(mapped),
            Addr::Inet(SocketAddr::new(Ipv4Addr::new(192, 0, 2, 1).into(), 8080))
        );
        assert_eq!(Addr::from(mapped).to_string(), "192.0.2.1:8080");
    }
}
