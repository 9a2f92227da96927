//! Listeners which apply read and write deadlines to every accepted connection.
//!
//! A [`DeadlineListener`] wraps any [`Accept`]or. Each accepted connection is returned
//! as a [`DeadlineStream`] carrying the listener's [`Timeouts`], so a stalled client can
//! never block a server task indefinitely.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stream_deadline::server::DeadlineListener;
//! use stream_deadline::stream::net::Network;
//! use tokio::io::AsyncReadExt as _;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let network: Network = "tcp".parse()?;
//! let mut listener = DeadlineListener::bind(
//!     network,
//!     ":8080",
//!     Duration::from_secs(30),
//!     Duration::from_secs(10),
//! )
//! .await?;
//!
//! loop {
//!     let mut stream = listener.accept().await?;
//!     tokio::spawn(async move {
//!         let mut buf = [0u8; 1024];
//!         while let Ok(n) = stream.read(&mut buf).await {
//!             if n == 0 {
//!                 break;
//!             }
//!         }
//!     });
//! }
//! # }
//! ```

use std::io;
#[cfg(feature = "tls")]
use std::path::{Path, PathBuf};
use std::pin::Pin;
#[cfg(feature = "tls")]
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tracing::{debug, trace};

use crate::info::HasLocalAddr;
use crate::stream::deadline::{DeadlineStream, Timeouts};
use crate::stream::net::{Network, UnsupportedNetwork};

pub use self::listener::Listener;
#[cfg(feature = "tls")]
pub use self::tls::TlsListener;

pub mod listener;
#[cfg(feature = "tls")]
pub mod tls;

/// An async generator of new connections
pub trait Accept {
    /// The connection type for this acceptor
    type Connection: Unpin + 'static;

    /// The error type for this acceptor
    type Error: Into<crate::BoxError>;

    /// Poll for a new connection
    fn poll_accept(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Self::Connection, Self::Error>>;
}

impl Accept for tokio::net::TcpListener {
    type Connection = tokio::net::TcpStream;
    type Error = io::Error;

    fn poll_accept(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<Self::Connection>> {
        tokio::net::TcpListener::poll_accept(self.get_mut(), cx).map_ok(|(stream, _)| stream)
    }
}

/// A listener which wraps every accepted connection in a [`DeadlineStream`].
///
/// Closing the listener with [`DeadlineListener::close`] drops the underlying acceptor.
/// Connections which were already accepted are independent of the listener and stay
/// usable until they are dropped.
#[derive(Debug)]
pub struct DeadlineListener<A = Listener> {
    inner: Option<A>,
    timeouts: Timeouts,
}

impl<A> DeadlineListener<A> {
    /// Wrap an acceptor, applying `timeouts` to each accepted connection.
    pub fn new(acceptor: A, timeouts: Timeouts) -> Self {
        Self {
            inner: Some(acceptor),
            timeouts,
        }
    }

    /// The timeouts applied to accepted connections.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// A reference to the underlying acceptor, or `None` once closed.
    pub fn get_ref(&self) -> Option<&A> {
        self.inner.as_ref()
    }

    /// Close the listener.
    ///
    /// The underlying socket is released immediately, and closing cannot fail.
    /// Calling `close` again has no effect. Further calls to
    /// [`accept`][DeadlineListener::accept] fail with [`io::ErrorKind::NotConnected`].
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("listener closed");
        }
    }

    /// Whether [`close`][DeadlineListener::close] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

fn listener_closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "listener closed")
}

impl<A> DeadlineListener<A>
where
    A: Accept<Error = io::Error> + Unpin,
{
    /// Accept the next connection.
    ///
    /// The returned stream carries this listener's timeouts. Accept errors are
    /// returned unchanged.
    pub async fn accept(&mut self) -> io::Result<DeadlineStream<A::Connection>> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_accept(cx)).await
    }
}

impl<A> Accept for DeadlineListener<A>
where
    A: Accept<Error = io::Error> + Unpin,
{
    type Connection = DeadlineStream<A::Connection>;
    type Error = io::Error;

    fn poll_accept(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Self::Connection, Self::Error>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(listener_closed()));
        };

        match ready!(Pin::new(inner).poll_accept(cx)) {
            Ok(stream) => {
                trace!(timeouts = ?this.timeouts, "accepted connection");
                Poll::Ready(Ok(DeadlineStream::new(stream, this.timeouts)))
            }
            Err(error) => {
                debug!("accept error: {}", error);
                Poll::Ready(Err(error))
            }
        }
    }
}

impl<A> HasLocalAddr for DeadlineListener<A>
where
    A: HasLocalAddr,
{
    type Addr = A::Addr;

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner
            .as_ref()
            .ok_or_else(listener_closed)?
            .local_addr()
    }
}

impl DeadlineListener<Listener> {
    /// Bind a listener on `network` at `address`.
    ///
    /// For TCP families the address has the form `host:port`. An empty host, as in
    /// `":8080"`, listens on all available interfaces. For `unix` the address is a
    /// filesystem path.
    pub async fn bind(
        network: Network,
        address: &str,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, ListenError> {
        let listener = Listener::bind(network, address).await?;
        Ok(Self::new(
            listener,
            Timeouts::new(read_timeout, write_timeout),
        ))
    }
}

#[cfg(feature = "tls")]
impl DeadlineListener<TlsListener<Listener>> {
    /// Bind a TLS listener on `network` at `address`.
    ///
    /// The certificate chain and private key are loaded from PEM files before any
    /// socket is bound. The server advertises `http/1.1` via ALPN.
    pub async fn bind_tls(
        network: Network,
        address: &str,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, ListenError> {
        let config = self::tls::load_server_config(cert_file.as_ref(), key_file.as_ref())?;
        Self::bind_tls_with_config(network, address, config, read_timeout, write_timeout).await
    }

    /// Bind a TLS listener with a prepared server configuration.
    ///
    /// If the configuration has no ALPN protocols, `http/1.1` is advertised.
    pub async fn bind_tls_with_config(
        network: Network,
        address: &str,
        config: rustls::ServerConfig,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, ListenError> {
        let config = self::tls::with_default_alpn(config);
        let listener = Listener::bind(network, address).await?;
        Ok(Self::new(
            TlsListener::new(listener, Arc::new(config)),
            Timeouts::new(read_timeout, write_timeout),
        ))
    }
}

/// An error binding a listener.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ListenError {
    /// The network family is not supported.
    #[error(transparent)]
    UnsupportedNetwork(#[from] UnsupportedNetwork),

    /// The address could not be parsed or has no usable addresses.
    #[error("invalid address {address:?}: {reason}")]
    Address {
        /// The address as given.
        address: String,

        /// Why the address was rejected.
        reason: &'static str,
    },

    /// Resolving the host name failed.
    #[error("resolve error: {0}")]
    Resolve(#[source] io::Error),

    /// Binding the socket failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),

    /// The certificate chain could not be loaded.
    #[cfg(feature = "tls")]
    #[error("loading certificates from {}: {source}", .path.display())]
    Certificate {
        /// The certificate file.
        path: PathBuf,

        /// The underlying PEM error.
        #[source]
        source: rustls::pki_types::pem::Error,
    },

    /// The certificate file contained no certificates.
    #[cfg(feature = "tls")]
    #[error("no certificates found in {}", .path.display())]
    NoCertificates {
        /// The certificate file.
        path: PathBuf,
    },

    /// The private key could not be loaded.
    #[cfg(feature = "tls")]
    #[error("loading private key from {}: {source}", .path.display())]
    PrivateKey {
        /// The private key file.
        path: PathBuf,

        /// The underlying PEM error.
        #[source]
        source: rustls::pki_types::pem::Error,
    },

    /// The TLS configuration was rejected.
    #[cfg(feature = "tls")]
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

impl ListenError {
    pub(crate) fn address(address: &str, reason: &'static str) -> Self {
        Self::Address {
            address: address.to_owned(),
            reason,
        }
    }
}
