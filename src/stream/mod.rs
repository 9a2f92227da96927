//! Stream wrappers and implementations.
//!
//! # Modules
//!
//! - [`deadline`] - [`DeadlineStream`][deadline::DeadlineStream], which arms a fresh
//!   deadline for every read and write on any async stream
//! - [`net`] - Network families, addresses and the TCP / Unix-domain stream produced
//!   by listeners
//! - [`tls`] - Server-side TLS streams which complete their handshake on first use
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stream_deadline::stream::deadline::{DeadlineStream, Timeouts};
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> std::io::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! let (stream, _) = listener.accept().await?;
//!
//! let timeouts = Timeouts::new(Duration::from_secs(30), Duration::from_secs(10));
//! let stream = DeadlineStream::new(stream, timeouts);
//! # Ok(())
//! # }
//! ```

pub mod deadline;
pub mod net;
#[cfg(feature = "tls")]
pub mod tls;
