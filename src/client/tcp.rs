//! TCP transport for outbound connections.
//!
//! [`TcpTransport`] is the default inner transport of
//! [`DeadlineTransport`][super::DeadlineTransport]. It is a [`tower::Service`] which
//! connects to a [`SocketAddr`], or to a `host:port` string after resolving it.

use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use futures::FutureExt as _;
use tokio::net::TcpStream;
use tracing::{Instrument, trace, warn};

type BoxFuture<'a, T, E> = crate::BoxFuture<'a, Result<T, E>>;

/// A TCP connector for client connections.
///
/// Each call makes a single connection attempt per resolved address, in the order
/// the resolver returns them, and returns the error of the last attempt if none
/// succeed. Nothing is retried and no connections are pooled.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    nodelay: bool,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

impl TcpTransport {
    /// Create a new TCP transport with Nagle's algorithm disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to disable Nagle's algorithm on new connections.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

async fn connect(addr: SocketAddr, nodelay: bool) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;

    if nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("tcp set_nodelay error: {}", e);
        }
    }

    trace!(peer.addr = %addr, "tcp connected");
    Ok(stream)
}

impl tower::Service<SocketAddr> for TcpTransport {
    type Response = TcpStream;
    type Error = io::Error;
    type Future = BoxFuture<'static, Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: SocketAddr) -> Self::Future {
        let span = tracing::trace_span!("tcp", ip = %req.ip(), port = %req.port());
        connect(req, self.nodelay).instrument(span).boxed()
    }
}

impl<'a> tower::Service<&'a str> for TcpTransport {
    type Response = TcpStream;
    type Error = io::Error;
    type Future = BoxFuture<'static, Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: &'a str) -> Self::Future {
        let address = req.to_owned();
        let nodelay = self.nodelay;
        let span = tracing::trace_span!("tcp", %address);

        async move {
            let mut error = None;
            for addr in tokio::net::lookup_host(address.as_str()).await? {
                match connect(addr, nodelay).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        trace!(%addr, "tcp connect error: {}", e);
                        error = Some(e);
                    }
                }
            }

            Err(error.unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no addresses resolved for {address}"),
                )
            }))
        }
        .instrument(span)
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tower::ServiceExt as _;

    use super::*;

    #[tokio::test]
    async fn connect_socket_addr() {
        crate::fixtures::subscribe();

        let bind = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = bind.local_addr().unwrap();

        let (stream, accepted) = tokio::join!(
            async { TcpTransport::new().oneshot(addr).await.unwrap() },
            async { bind.accept().await.unwrap() }
        );

        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert_eq!(stream.local_addr().unwrap(), accepted.1);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn connect_host_string() {
        let bind = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = bind.local_addr().unwrap();
        let target = format!("127.0.0.1:{}", addr.port());

        let (stream, _) = tokio::join!(
            async {
                TcpTransport::new()
                    .with_nodelay(false)
                    .oneshot(target.as_str())
                    .await
                    .unwrap()
            },
            async { bind.accept().await.unwrap() }
        );

        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn connect_refused() {
        let bind = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = bind.local_addr().unwrap();
        drop(bind);

        let err = TcpTransport::new().oneshot(addr).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn invalid_host_string() {
        let err = TcpTransport::new().oneshot("no-port").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
