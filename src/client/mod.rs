//! Outbound transports which apply read and write deadlines to every dialed connection.
//!
//! A transport is the dial function of a client: a [`tower::Service`] which takes an
//! address and returns a connected stream. The client machinery calls it once for each
//! connection it needs; pooling and reuse stay the client's responsibility.
//!
//! [`DeadlineTransport`] wraps any [`Transport`], bounding the connection attempt by a
//! connect timeout and returning the stream as a [`DeadlineStream`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stream_deadline::client::DeadlineTransport;
//! use tokio::io::AsyncWriteExt as _;
//! use tower::ServiceExt as _;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = DeadlineTransport::new(Duration::from_secs(5));
//! let mut stream = transport.oneshot("example.com:80").await?;
//! stream.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use pin_project::pin_project;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tower::Service;

use crate::stream::deadline::{DeadlineStream, Timeouts};

pub use self::tcp::TcpTransport;

pub mod tcp;

/// A transport provides data transmission between two endpoints.
///
/// To implement a transport stream, implement a [`tower::Service`] which accepts an
/// address and returns an IO stream.
pub trait Transport<Req>: Send {
    /// The type of IO stream used by this transport
    type IO: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Error returned when connection fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// The future type returned by this service
    type Future: Future<Output = Result<Self::IO, <Self as Transport<Req>>::Error>> + Send + 'static;

    /// Connect to a remote server and return a stream.
    fn connect(&mut self, req: Req) -> <Self as Transport<Req>>::Future;

    /// Poll the transport to see if it is ready to accept a new connection.
    fn poll_ready(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), <Self as Transport<Req>>::Error>>;
}

impl<T, IO, Req, F, E> Transport<Req> for T
where
    T: Service<Req, Response = IO, Future = F, Error = E>,
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Future<Output = Result<IO, E>> + Send + 'static,
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type IO = IO;
    type Error = E;
    type Future = F;

    fn connect(&mut self, req: Req) -> Self::Future {
        self.call(req)
    }

    fn poll_ready(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), <Self as Transport<Req>>::Error>> {
        Service::poll_ready(self, cx)
    }
}

/// Timeouts for outbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct TransportConfig {
    /// Maximum duration of each read on a dialed connection.
    pub read_timeout: Duration,

    /// Maximum duration of each write on a dialed connection.
    pub write_timeout: Duration,

    /// Maximum duration of a connection attempt. Defaults to the read timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl TransportConfig {
    /// Use `timeout` for connecting, reading and writing.
    pub fn new(timeout: Duration) -> Self {
        Self {
            read_timeout: timeout,
            write_timeout: timeout,
            connect_timeout: None,
        }
    }

    /// Set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// The effective connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(self.read_timeout)
    }

    /// The read and write timeouts applied to dialed connections.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts::new(self.read_timeout, self.write_timeout)
    }
}

/// A transport whose connections enforce read and write deadlines.
///
/// Each call connects through the inner transport, bounded by the connect timeout,
/// and wraps the new connection in a [`DeadlineStream`].
#[derive(Debug, Clone)]
pub struct DeadlineTransport<T = TcpTransport> {
    transport: T,
    config: TransportConfig,
}

impl DeadlineTransport {
    /// Create a TCP transport using `timeout` for connecting, reading and writing.
    pub fn new(timeout: Duration) -> Self {
        Self::with_config(TransportConfig::new(timeout))
    }

    /// Create a TCP transport with the given timeouts.
    pub fn with_config(config: TransportConfig) -> Self {
        Self::with_transport(TcpTransport::new(), config)
    }
}

impl<T> DeadlineTransport<T> {
    /// Wrap an inner transport.
    pub fn with_transport(transport: T, config: TransportConfig) -> Self {
        Self { transport, config }
    }

    /// The timeouts used by this transport.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Returns a reference to the inner transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the inner transport and the configuration.
    pub fn into_parts(self) -> (T, TransportConfig) {
        (self.transport, self.config)
    }
}

impl<T, Req> Service<Req> for DeadlineTransport<T>
where
    T: Transport<Req>,
{
    type Response = DeadlineStream<T::IO>;
    type Error = ConnectError<T::Error>;
    type Future = ConnectFuture<T::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.transport
            .poll_ready(cx)
            .map_err(ConnectError::Connection)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let connect_timeout = self.config.connect_timeout();
        let span = tracing::trace_span!("dial", timeout = ?connect_timeout);
        let future = span.in_scope(|| self.transport.connect(req));

        ConnectFuture {
            inner: tokio::time::timeout(connect_timeout, future),
            connect_timeout,
            timeouts: self.config.timeouts(),
            span,
        }
    }
}

/// Future returned by [`DeadlineTransport`] when dialing a connection.
#[pin_project]
#[derive(Debug)]
pub struct ConnectFuture<F> {
    #[pin]
    inner: tokio::time::Timeout<F>,
    connect_timeout: Duration,
    timeouts: Timeouts,
    span: tracing::Span,
}

impl<F, IO, E> Future for ConnectFuture<F>
where
    F: Future<Output = Result<IO, E>>,
{
    type Output = Result<DeadlineStream<IO>, ConnectError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.span.enter();

        match ready!(this.inner.poll(cx)) {
            Ok(Ok(stream)) => {
                tracing::trace!(timeouts = ?this.timeouts, "connected");
                Poll::Ready(Ok(DeadlineStream::new(stream, *this.timeouts)))
            }
            Ok(Err(error)) => {
                tracing::trace!("connection error");
                Poll::Ready(Err(ConnectError::Connection(error)))
            }
            Err(_) => {
                tracing::trace!("connection timed out");
                Poll::Ready(Err(ConnectError::Timeout(*this.connect_timeout)))
            }
        }
    }
}

/// An error returned when a connection attempt fails.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError<E> {
    /// The inner transport failed to connect.
    #[error(transparent)]
    Connection(#[from] E),

    /// The connection attempt did not complete within the connect timeout.
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ConnectError<io::Error>> for io::Error {
    fn from(value: ConnectError<io::Error>) -> Self {
        match value {
            ConnectError::Connection(error) => error,
            timeout @ ConnectError::Timeout(_) => {
                io::Error::new(io::ErrorKind::TimedOut, timeout.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _, DuplexStream, duplex};
    use tokio::net::TcpListener;
    use tokio::time::Instant;
    use tower::ServiceExt as _;

    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(200);

    static_assertions::assert_impl_all!(DeadlineTransport: Transport<SocketAddr>, Clone);

    fn pending_transport()
    -> impl Service<SocketAddr, Response = DuplexStream, Error = io::Error, Future: Send + 'static>
    + Clone
    + Send
    + Sync
    + 'static {
        tower::service_fn(|_: SocketAddr| std::future::pending::<io::Result<DuplexStream>>())
    }

    fn ready_transport()
    -> impl Service<SocketAddr, Response = DuplexStream, Error = io::Error, Future: Send + 'static>
    + Clone
    + Send
    + Sync
    + 'static {
        tower::service_fn(|_: SocketAddr| async {
            let (client, _server) = duplex(64);
            Ok::<_, io::Error>(client)
        })
    }

    fn unused_addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[tokio::test]
    async fn dial_and_roundtrip() {
        crate::fixtures::subscribe();

        let bind = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = bind.local_addr().unwrap();

        let (mut stream, mut server) = tokio::join!(
            async { DeadlineTransport::new(TIMEOUT).oneshot(addr).await.unwrap() },
            async { bind.accept().await.unwrap().0 }
        );

        assert_eq!(stream.timeouts(), Timeouts::uniform(TIMEOUT));

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn dialed_connection_read_is_cut_off() {
        crate::fixtures::subscribe();

        let bind = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = bind.local_addr().unwrap().to_string();

        let (mut stream, _server) = tokio::join!(
            async {
                DeadlineTransport::new(TIMEOUT)
                    .oneshot(target.as_str())
                    .await
                    .unwrap()
            },
            async { bind.accept().await.unwrap() }
        );

        let start = std::time::Instant::now();
        let mut buf = [0u8; 4];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let elapsed = start.elapsed();
        assert!(elapsed >= TIMEOUT, "timed out early: {elapsed:?}");
        assert!(elapsed < TIMEOUT + Duration::from_secs(2), "timed out late: {elapsed:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_not_wrapped() {
        let bind = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = bind.local_addr().unwrap();
        drop(bind);

        let err = DeadlineTransport::new(TIMEOUT)
            .oneshot(addr)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ConnectError::Connection(ref e) if e.kind() == io::ErrorKind::ConnectionRefused),
            "{err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_dial_times_out() {
        let config = TransportConfig::new(Duration::from_secs(5)).with_connect_timeout(TIMEOUT);
        let transport = DeadlineTransport::with_transport(pending_transport(), config);

        let start = Instant::now();
        let err = transport.oneshot(unused_addr()).await.unwrap_err();

        assert!(matches!(err, ConnectError::Timeout(d) if d == TIMEOUT), "{err}");
        let elapsed = start.elapsed();
        assert!(elapsed >= TIMEOUT, "timed out early: {elapsed:?}");
        assert!(elapsed < TIMEOUT * 2, "timed out late: {elapsed:?}");

        let err = io::Error::from(err);
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_defaults_to_read_timeout() {
        let config = TransportConfig::new(Duration::from_secs(5)).with_read_timeout(TIMEOUT);
        assert_eq!(config.connect_timeout(), TIMEOUT);

        let transport = DeadlineTransport::with_transport(pending_transport(), config);
        let start = Instant::now();
        let err = transport.oneshot(unused_addr()).await.unwrap_err();

        assert!(matches!(err, ConnectError::Timeout(d) if d == TIMEOUT), "{err}");
        assert!(start.elapsed() >= TIMEOUT);
    }

    #[tokio::test]
    async fn independent_read_and_write_timeouts() {
        let config = TransportConfig::new(TIMEOUT)
            .with_read_timeout(TIMEOUT * 2)
            .with_write_timeout(TIMEOUT * 3);
        let transport = DeadlineTransport::with_transport(ready_transport(), config);

        let stream = transport.oneshot(unused_addr()).await.unwrap();
        assert_eq!(stream.timeouts(), Timeouts::new(TIMEOUT * 2, TIMEOUT * 3));
    }

    #[test]
    fn single_timeout_config() {
        let config = TransportConfig::new(TIMEOUT);
        assert_eq!(config.timeouts(), Timeouts::uniform(TIMEOUT));
        assert_eq!(config.connect_timeout(), TIMEOUT);
        assert_eq!(
            config.with_connect_timeout(TIMEOUT * 2).connect_timeout(),
            TIMEOUT * 2
        );
        assert_eq!(
            TransportConfig::default(),
            TransportConfig::new(Duration::from_secs(30))
        );
    }
}
