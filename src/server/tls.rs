//! TLS termination for listeners.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::{fmt, io};

use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject as _;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;

use super::{Accept, ListenError};
use crate::info::HasLocalAddr;
use crate::stream::tls::TlsStream;

/// The ALPN protocol advertised when a configuration does not list any.
pub const DEFAULT_ALPN_PROTOCOL: &[u8] = b"http/1.1";

/// A listener which terminates TLS on each accepted connection.
///
/// Connections are returned before the handshake has run; it completes on the first
/// read or write of the returned [`TlsStream`].
pub struct TlsListener<A> {
    inner: A,
    config: Arc<ServerConfig>,
}

impl<A: fmt::Debug> fmt::Debug for TlsListener<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsListener")
            .field("inner", &self.inner)
            .field("alpn", &self.config.alpn_protocols)
            .finish()
    }
}

impl<A> TlsListener<A> {
    /// Wrap `inner`, terminating TLS with `config`.
    pub fn new(inner: A, config: Arc<ServerConfig>) -> Self {
        Self { inner, config }
    }

    /// A reference to the underlying acceptor.
    pub fn get_ref(&self) -> &A {
        &self.inner
    }

    /// The TLS configuration used for new connections.
    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }
}

impl<A> Accept for TlsListener<A>
where
    A: Accept<Error = io::Error> + Unpin,
    A::Connection: AsyncRead + AsyncWrite,
{
    type Connection = TlsStream<A::Connection>;
    type Error = io::Error;

    fn poll_accept(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Self::Connection, Self::Error>> {
        let this = self.get_mut();
        let stream = ready!(Pin::new(&mut this.inner).poll_accept(cx))?;
        let acceptor = TlsAcceptor::from(this.config.clone());
        Poll::Ready(Ok(TlsStream::new(acceptor.accept(stream))))
    }
}

impl<A> HasLocalAddr for TlsListener<A>
where
    A: HasLocalAddr,
{
    type Addr = A::Addr;

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// Fill in the default ALPN protocol list when `config` has none.
pub fn with_default_alpn(mut config: ServerConfig) -> ServerConfig {
    if config.alpn_protocols.is_empty() {
        config.alpn_protocols.push(DEFAULT_ALPN_PROTOCOL.to_vec());
    }
    config
}

/// Build a server configuration from a PEM certificate chain and private key.
///
/// The returned configuration has no ALPN protocols set.
pub fn load_server_config(cert_file: &Path, key_file: &Path) -> Result<ServerConfig, ListenError> {
    let certs = load_certificates(cert_file)?;
    let key = load_private_key(key_file)?;

    let config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(config)
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ListenError> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|source| ListenError::Certificate {
            path: path.to_owned(),
            source,
        })?;

    if certs.is_empty() {
        return Err(ListenError::NoCertificates {
            path: path.to_owned(),
        });
    }

    tracing::trace!(path = %path.display(), count = certs.len(), "loaded certificates");
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ListenError> {
    PrivateKeyDer::from_pem_file(path).map_err(|source| ListenError::PrivateKey {
        path: path.to_owned(),
        source,
    })
}

/// The process default crypto provider, or the one selected by crate features.
fn crypto_provider() -> Arc<CryptoProvider> {
    if let Some(provider) = CryptoProvider::get_default() {
        return provider.clone();
    }

    #[cfg(feature = "tls-ring")]
    {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    {
        Arc::new(rustls::crypto::aws_lc_rs::default_provider())
    }
}
