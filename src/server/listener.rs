//! Binding stream listeners on a network family and address.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, trace};

use super::{Accept, ListenError};
use crate::info::HasLocalAddr;
use crate::stream::net::{Addr, Network, Stream};

/// A bound stream listener of any supported [`Network`] family.
#[derive(Debug)]
pub enum Listener {
    /// A TCP listener.
    Tcp(TcpListener),

    /// A Unix-domain listener.
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Bind a listener on `network` at `address`.
    ///
    /// Host names are resolved, and the first resolved address belonging to the
    /// network family which can be bound is used.
    pub async fn bind(network: Network, address: &str) -> Result<Self, ListenError> {
        #[cfg(unix)]
        if network == Network::Unix {
            let listener = UnixListener::bind(address).map_err(ListenError::Bind)?;
            debug!(%network, address, "listening");
            return Ok(Listener::Unix(listener));
        }

        let mut error = None;
        for addr in resolve(network, address).await? {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    debug!(%network, %addr, "listening");
                    return Ok(Listener::Tcp(listener));
                }
                Err(err) => {
                    trace!(%addr, %err, "bind attempt failed");
                    error = Some(err);
                }
            }
        }

        Err(ListenError::Bind(error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to bind")
        })))
    }
}

impl HasLocalAddr for Listener {
    type Addr = Addr;

    fn local_addr(&self) -> io::Result<Self::Addr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().map(Addr::from),
            #[cfg(unix)]
            Listener::Unix(listener) => listener.local_addr().map(Addr::from),
        }
    }
}

impl Accept for Listener {
    type Connection = Stream;
    type Error = io::Error;

    fn poll_accept(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Self::Connection, Self::Error>> {
        match self.get_mut() {
            Listener::Tcp(listener) => listener
                .poll_accept(cx)
                .map_ok(|(stream, _)| Stream::Tcp(stream)),
            #[cfg(unix)]
            Listener::Unix(listener) => listener
                .poll_accept(cx)
                .map_ok(|(stream, _)| Stream::Unix(stream)),
        }
    }
}

/// Split `host:port`, removing brackets from IPv6 hosts.
fn split_host_port(address: &str) -> Result<(&str, u16), ListenError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ListenError::address(address, "missing port"))?;

    let host = match host.strip_prefix('[') {
        Some(rest) => rest
            .strip_suffix(']')
            .ok_or_else(|| ListenError::address(address, "missing ']'"))?,
        None if host.contains(':') => {
            return Err(ListenError::address(address, "too many colons"));
        }
        None => host,
    };

    let port = port
        .parse()
        .map_err(|_| ListenError::address(address, "invalid port"))?;

    Ok((host, port))
}

/// Resolve `address` to the socket addresses of `network`.
async fn resolve(network: Network, address: &str) -> Result<Vec<SocketAddr>, ListenError> {
    let (host, port) = split_host_port(address)?;

    let addrs: Vec<SocketAddr> = if host.is_empty() {
        let ip: IpAddr = match network {
            Network::Tcp6 => Ipv6Addr::UNSPECIFIED.into(),
            _ => Ipv4Addr::UNSPECIFIED.into(),
        };
        vec![SocketAddr::new(ip, port)]
    } else {
        tokio::net::lookup_host((host, port))
            .await
            .map_err(ListenError::Resolve)?
            .filter(|addr| network.accepts(addr))
            .collect()
    };

    if addrs.is_empty() {
        return Err(ListenError::address(
            address,
            "no addresses for network family",
        ));
    }

    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_addresses() {
        assert_eq!(split_host_port("127.0.0.1:80").unwrap(), ("127.0.0.1", 80));
        assert_eq!(split_host_port(":8080").unwrap(), ("", 8080));
        assert_eq!(split_host_port("[::1]:443").unwrap(), ("::1", 443));
        assert_eq!(split_host_port("localhost:0").unwrap(), ("localhost", 0));

        for (address, reason) in [
            ("127.0.0.1", "missing port"),
            ("::1:80", "too many colons"),
            ("[::1:80", "missing ']'"),
            ("localhost:http", "invalid port"),
            ("localhost:65536", "invalid port"),
        ] {
            match split_host_port(address) {
                Err(ListenError::Address { reason: r, .. }) => assert_eq!(r, reason, "{address}"),
                other => panic!("{address}: unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn resolve_unspecified() {
        let v4 = resolve(Network::Tcp, ":0").await.unwrap();
        assert_eq!(v4, vec![SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)]);

        let v6 = resolve(Network::Tcp6, ":0").await.unwrap();
        assert_eq!(v6, vec![SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)]);
    }

    #[tokio::test]
    async fn resolve_filters_family() {
        let addrs = resolve(Network::Tcp4, "127.0.0.1:80").await.unwrap();
        assert!(addrs.iter().all(SocketAddr::is_ipv4));

        assert!(resolve(Network::Tcp4, "[::1]:80").await.is_err());
    }
}
