//! Server-side TLS streams with a lazily completed handshake.
//!
//! A [`TlsStream`] is produced as soon as the underlying connection is accepted. The
//! TLS handshake is driven by the first read or write (or explicitly with
//! [`TlsHandshakeStream::finish_handshake`]), so when the stream is wrapped in a
//! [`DeadlineStream`][crate::stream::deadline::DeadlineStream] the handshake is bounded
//! by the deadline of that first operation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::{fmt, io};

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::info::{ConnectionInfo, HasConnectionInfo};

/// Future returned by `TlsHandshakeStream::finish_handshake`.
///
/// This future resolves when the handshake is complete.
#[pin_project]
#[derive(Debug)]
pub struct Handshaking<'a, T: ?Sized> {
    inner: &'a mut T,
}

impl<'a, T: ?Sized> Handshaking<'a, T> {
    fn new(inner: &'a mut T) -> Self {
        Handshaking { inner }
    }
}

impl<T> Future for Handshaking<'_, T>
where
    T: TlsHandshakeStream + ?Sized,
{
    type Output = Result<(), io::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll_handshake(cx)
    }
}

/// A stream that supports a TLS handshake.
pub trait TlsHandshakeStream {
    /// Poll the handshake to completion.
    ///
    /// Returns `Poll::Ready(Ok(()))` once the handshake is complete, and
    /// `Poll::Ready(Err(_))` if the handshake failed.
    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>>;

    /// Finish the TLS handshake.
    ///
    /// If this method is not called, the TLS handshake will be completed the first
    /// time the connection is used for I/O operations.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use stream_deadline::stream::tls::TlsHandshakeStream;
    ///
    /// # async fn example<T: TlsHandshakeStream>(mut stream: T) -> std::io::Result<()> {
    /// // Explicitly complete the handshake before doing any I/O
    /// stream.finish_handshake().await?;
    /// # Ok(())
    /// # }
    /// ```
    fn finish_handshake(&mut self) -> Handshaking<'_, Self> {
        Handshaking::new(self)
    }
}

enum State<IO> {
    Handshake(tokio_rustls::Accept<IO>),
    Streaming(tokio_rustls::server::TlsStream<IO>),
    Failed,
}

/// A server-side TLS stream over `IO`.
pub struct TlsStream<IO> {
    state: State<IO>,
}

impl<IO> fmt::Debug for TlsStream<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Handshake(_) => "handshake",
            State::Streaming(_) => "streaming",
            State::Failed => "failed",
        };
        f.debug_struct("TlsStream").field("state", &state).finish()
    }
}

impl<IO> TlsStream<IO> {
    pub(crate) fn new(accept: tokio_rustls::Accept<IO>) -> Self {
        Self {
            state: State::Handshake(accept),
        }
    }

    /// The underlying stream, if the handshake has not failed.
    pub fn get_ref(&self) -> Option<&IO> {
        match &self.state {
            State::Handshake(accept) => accept.get_ref(),
            State::Streaming(stream) => Some(stream.get_ref().0),
            State::Failed => None,
        }
    }

    fn get_mut(&mut self) -> Option<&mut IO> {
        match &mut self.state {
            State::Handshake(accept) => accept.get_mut(),
            State::Streaming(stream) => Some(stream.get_mut().0),
            State::Failed => None,
        }
    }

    /// The application protocol negotiated during the handshake, if any.
    ///
    /// Returns `None` until the handshake has completed.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match &self.state {
            State::Streaming(stream) => stream.get_ref().1.alpn_protocol(),
            _ => None,
        }
    }

    /// The server name requested by the client, if any.
    pub fn server_name(&self) -> Option<&str> {
        match &self.state {
            State::Streaming(stream) => stream.get_ref().1.server_name(),
            _ => None,
        }
    }
}

fn handshake_failed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "TLS handshake failed")
}

impl<IO> TlsHandshakeStream for TlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        let accept = match &mut self.state {
            State::Handshake(accept) => accept,
            State::Streaming(_) => return Poll::Ready(Ok(())),
            State::Failed => return Poll::Ready(Err(handshake_failed())),
        };

        match ready!(Pin::new(accept).poll(cx)) {
            Ok(stream) => {
                tracing::trace!(
                    alpn = ?stream.get_ref().1.alpn_protocol().map(String::from_utf8_lossy),
                    "TLS handshake complete"
                );
                self.state = State::Streaming(stream);
                Poll::Ready(Ok(()))
            }
            Err(error) => {
                tracing::debug!(%error, "TLS handshake error");
                self.state = State::Failed;
                Poll::Ready(Err(error))
            }
        }
    }
}

impl<IO> HasConnectionInfo for TlsStream<IO>
where
    IO: HasConnectionInfo,
{
    type Addr = IO::Addr;

    fn info(&self) -> io::Result<ConnectionInfo<Self::Addr>> {
        self.get_ref().ok_or_else(handshake_failed)?.info()
    }
}

impl<IO> AsyncRead for TlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        match &mut this.state {
            State::Streaming(stream) => Pin::new(stream).poll_read(cx, buf),
            _ => Poll::Ready(Err(handshake_failed())),
        }
    }
}

impl<IO> AsyncWrite for TlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        match &mut this.state {
            State::Streaming(stream) => Pin::new(stream).poll_write(cx, buf),
            _ => Poll::Ready(Err(handshake_failed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        match &mut this.state {
            State::Streaming(stream) => Pin::new(stream).poll_flush(cx),
            _ => Poll::Ready(Err(handshake_failed())),
        }
    }

    /// Closing before the handshake completes shuts down the raw connection.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        let this = self.get_mut();
        if let State::Streaming(stream) = &mut this.state {
            return Pin::new(stream).poll_shutdown(cx);
        }

        match this.get_mut() {
            Some(io) => Pin::new(io).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rustls::pki_types::ServerName;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _, duplex};
    use tokio_rustls::{TlsAcceptor, TlsConnector};

    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn handshake_on_first_read() {
        fixtures::subscribe();
        fixtures::tls_install_default();

        let (client, server) = duplex(16 * 1024);
        let acceptor = TlsAcceptor::from(Arc::new(fixtures::tls_server_config()));
        let mut server = TlsStream::new(acceptor.accept(server));
        assert!(server.alpn_protocol().is_none());

        let connector = TlsConnector::from(Arc::new(fixtures::tls_client_config()));
        let name = ServerName::try_from("localhost").unwrap();

        let (client, received) = tokio::join!(
            async {
                let mut client = connector.connect(name, client).await.unwrap();
                client.write_all(b"hello").await.unwrap();
                client.flush().await.unwrap();
                client
            },
            async {
                let mut buf = [0u8; 5];
                server.read_exact(&mut buf).await.unwrap();
                buf
            }
        );

        assert_eq!(&received, b"hello");
        assert_eq!(server.alpn_protocol(), Some(&b"http/1.1"[..]));
        assert_eq!(server.server_name(), Some("localhost"));
        drop(client);
    }

    #[tokio::test]
    async fn failed_handshake_is_terminal() {
        fixtures::subscribe();
        fixtures::tls_install_default();

        let (mut client, server) = duplex(1024);
        let acceptor = TlsAcceptor::from(Arc::new(fixtures::tls_server_config()));
        let mut server = TlsStream::new(acceptor.accept(server));

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        assert!(server.finish_handshake().await.is_err());
        assert!(server.get_ref().is_none());

        let mut buf = [0u8; 8];
        let err = server.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
