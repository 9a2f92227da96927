//! # stream-deadline: idle deadlines for tokio streams
//!
//! A peer which stops reading or writing should never be able to park a task forever.
//! This crate decorates streams, listeners and client transports so that every read
//! and every write is bounded by a fixed idle timeout. The deadline is re-armed at the
//! start of each operation (now + timeout), so long-lived connections are fine as long
//! as each individual operation makes progress in time.
//!
//! ## Components
//!
//! - [`DeadlineStream`]: wraps any `AsyncRead + AsyncWrite` stream and arms a read or
//!   write deadline for each operation. Everything else (shutdown, address queries) is
//!   passed through unchanged.
//! - [`DeadlineListener`]: wraps any [`Accept`][server::Accept]or and returns each
//!   accepted connection as a `DeadlineStream` carrying the listener's timeouts. It can
//!   bind TCP and Unix-domain listeners, with optional TLS termination.
//! - [`DeadlineTransport`]: a [`tower::Service`] dial function for clients, which
//!   bounds each connection attempt by a connect timeout and returns the connection as
//!   a `DeadlineStream`.
//!
//! Errors are never retried or swallowed: a deadline which elapses surfaces as an
//! [`std::io::ErrorKind::TimedOut`] error from the operation that was waiting, and all
//! other errors are returned exactly as the underlying socket produced them.
//!
//! ## Feature Flags
//!
//! - `tls`: Enables TLS listeners using rustls
//! - `tls-ring`: Use ring as the crypto backend for TLS (default)
//! - `tls-aws-lc`: Use AWS-LC as the crypto backend for TLS
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stream_deadline::{DeadlineListener, stream::net::Network};
//! use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut listener = DeadlineListener::bind(
//!     Network::Tcp,
//!     "127.0.0.1:7000",
//!     Duration::from_secs(5),
//!     Duration::from_secs(5),
//! )
//! .await?;
//!
//! let mut stream = listener.accept().await?;
//! let mut buf = [0u8; 512];
//! let n = stream.read(&mut buf).await?;
//! stream.write_all(&buf[..n]).await?;
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;

pub mod client;
pub mod info;
pub mod server;
pub mod stream;

pub use self::client::{DeadlineTransport, TransportConfig};
pub use self::server::DeadlineListener;
pub use self::stream::deadline::{DeadlineStream, Timeouts};

#[cfg(all(
    feature = "tls",
    not(any(feature = "tls-ring", feature = "tls-aws-lc"))
))]
compile_error!(
    "The 'tls' feature requires a backend, enable 'tls-ring' or 'tls-aws-lc' to select a backend"
);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Test fixtures
#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod fixtures {

    use std::sync::Once;

    /// PEM certificate chain for `localhost`, signed by `tests/minica/minica.pem`.
    #[cfg(feature = "tls")]
    pub(crate) const TLS_CERT_FILE: &str = concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/minica/localhost/cert.pem"
    );

    /// PEM private key matching [`TLS_CERT_FILE`].
    #[cfg(feature = "tls")]
    pub(crate) const TLS_KEY_FILE: &str = concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/minica/localhost/key.pem"
    );

    /// Registers a global default tracing subscriber when called for the first time. This is intended
    /// for use in tests.
    pub fn subscribe() {
        static INSTALL_TRACING_SUBSCRIBER: Once = Once::new();
        INSTALL_TRACING_SUBSCRIBER.call_once(|| {
            let subscriber = tracing_subscriber::FmtSubscriber::builder()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        });
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls_server_config() -> rustls::ServerConfig {
        let config = crate::server::tls::load_server_config(
            std::path::Path::new(TLS_CERT_FILE),
            std::path::Path::new(TLS_KEY_FILE),
        )
        .unwrap();

        crate::server::tls::with_default_alpn(config)
    }

    #[cfg(feature = "tls")]
    fn tls_root_store() -> rustls::RootCertStore {
        let mut root_store = rustls::RootCertStore::empty();
        let (_, cert) = pem_rfc7468::decode_vec(include_bytes!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/minica/minica.pem"
        )))
        .unwrap();
        root_store
            .add(rustls::pki_types::CertificateDer::from(cert))
            .unwrap();
        root_store
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls_client_config() -> rustls::ClientConfig {
        let mut config = rustls::ClientConfig::builder()
            .with_root_certificates(tls_root_store())
            .with_no_client_auth();
        config.alpn_protocols.push(b"h2".to_vec());
        config.alpn_protocols.push(b"http/1.1".to_vec());
        config
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls_install_default() {
        #[cfg(feature = "tls-ring")]
        {
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
        {
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        }
    }
}
