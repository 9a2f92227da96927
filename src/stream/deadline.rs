//! Idle deadlines for every read and write on a stream.
//!
//! [`DeadlineStream`] wraps any async stream and arms a fresh deadline at the start
//! of each read or write operation. An operation which does not complete before its
//! deadline fails with [`io::ErrorKind::TimedOut`]. The stream stays usable after a
//! timeout: the next operation simply arms a new deadline.
//!
//! An operation starts on the first poll after the previous operation in the same
//! direction completed, and ends when the inner stream returns `Poll::Ready`. Re-polls
//! of a pending operation keep the deadline that was armed when it started, so a
//! stalled peer cannot extend it.
//!
//! A stream cannot observe a read or write future being dropped while pending (for
//! example by `select!` or `tokio::time::timeout`). The deadline armed by such an
//! abandoned operation is carried into the next operation in that direction, until
//! it has been expired for longer than one timeout without being polled. After that
//! the next operation arms a fresh deadline.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

use crate::info::{ConnectionInfo, HasConnectionInfo};

/// Read and write timeouts applied to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeouts {
    /// Maximum duration of a single read operation.
    pub read: Duration,

    /// Maximum duration of a single write or flush operation.
    pub write: Duration,
}

impl Timeouts {
    /// Create timeouts with independent read and write durations.
    pub const fn new(read: Duration, write: Duration) -> Self {
        Self { read, write }
    }

    /// Create timeouts using the same duration for reads and writes.
    pub const fn uniform(timeout: Duration) -> Self {
        Self::new(timeout, timeout)
    }
}

/// The timer for one direction of a stream.
///
/// The sleep is allocated lazily on the first operation, so that streams can be
/// constructed outside of a runtime, and then reset in place for each operation.
struct Deadline {
    timeout: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    armed: bool,
}

impl std::fmt::Debug for Deadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deadline")
            .field("timeout", &self.timeout)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Deadline {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sleep: None,
            armed: false,
        }
    }

    /// Arm the deadline at now + timeout, unless an operation is already in flight.
    fn arm(&mut self) -> io::Result<()> {
        let now = Instant::now();
        if self.armed {
            if !self.is_stale(now) {
                return Ok(());
            }
            tracing::trace!(timeout = ?self.timeout, "discarding deadline of an abandoned operation");
        }

        let deadline = now.checked_add(self.timeout).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("deadline out of range for timeout {:?}", self.timeout),
            )
        })?;

        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(tokio::time::sleep_until(deadline))),
        }

        self.armed = true;
        Ok(())
    }

    /// An armed deadline which expired more than one timeout ago was never observed
    /// by a poll, so the operation that armed it was dropped while pending.
    fn is_stale(&self, now: Instant) -> bool {
        self.sleep.as_ref().is_some_and(|sleep| {
            now.checked_duration_since(sleep.deadline())
                .is_some_and(|late| late > self.timeout)
        })
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn poll_elapsed(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        match self.sleep.as_mut() {
            Some(sleep) if self.armed => sleep.as_mut().poll(cx),
            _ => Poll::Pending,
        }
    }

    /// Run one poll of an operation under this deadline.
    fn poll_operation<T, F>(
        &mut self,
        operation: &'static str,
        cx: &mut Context<'_>,
        poll: F,
    ) -> Poll<io::Result<T>>
    where
        F: FnOnce(&mut Context<'_>) -> Poll<io::Result<T>>,
    {
        self.arm()?;

        match poll(cx) {
            Poll::Ready(result) => {
                self.disarm();
                Poll::Ready(result)
            }
            Poll::Pending => match self.poll_elapsed(cx) {
                Poll::Ready(()) => {
                    self.disarm();
                    tracing::debug!(timeout = ?self.timeout, "{operation} deadline exceeded");
                    Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{operation} deadline exceeded after {:?}", self.timeout),
                    )))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// A stream which enforces a deadline on every read and write.
///
/// Reads are bounded by [`Timeouts::read`], writes and flushes by [`Timeouts::write`].
/// Shutdown and address queries are passed through to the inner stream unchanged.
///
/// # Cancellation
///
/// Dropping a read or write future while it is pending leaves its deadline armed.
/// An operation started before that deadline has been expired for a full timeout
/// inherits it, and may time out sooner than its own timeout.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use stream_deadline::stream::deadline::{DeadlineStream, Timeouts};
/// use tokio::io::AsyncReadExt as _;
///
/// # async fn example() -> std::io::Result<()> {
/// let stream = tokio::net::TcpStream::connect("127.0.0.1:8080").await?;
/// let mut stream = DeadlineStream::new(stream, Timeouts::uniform(Duration::from_secs(5)));
///
/// let mut buf = [0u8; 1024];
/// // Fails with `ErrorKind::TimedOut` if the peer sends nothing for five seconds.
/// let n = stream.read(&mut buf).await?;
/// # Ok(())
/// # }
/// ```
#[pin_project]
#[derive(Debug)]
pub struct DeadlineStream<IO> {
    #[pin]
    inner: IO,
    timeouts: Timeouts,
    read: Deadline,
    write: Deadline,
}

impl<IO> DeadlineStream<IO> {
    /// Wrap `inner` so that each read and write is bounded by `timeouts`.
    pub fn new(inner: IO, timeouts: Timeouts) -> Self {
        Self {
            inner,
            timeouts,
            read: Deadline::new(timeouts.read),
            write: Deadline::new(timeouts.write),
        }
    }

    /// The timeouts applied to this stream.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// A reference to the inner stream.
    pub fn get_ref(&self) -> &IO {
        &self.inner
    }

    /// A mutable reference to the inner stream.
    ///
    /// I/O performed directly on the inner stream is not bounded by a deadline.
    pub fn get_mut(&mut self) -> &mut IO {
        &mut self.inner
    }

    /// Unwraps the stream, returning the inner stream.
    pub fn into_inner(self) -> IO {
        self.inner
    }
}

impl<IO> HasConnectionInfo for DeadlineStream<IO>
where
    IO: HasConnectionInfo,
{
    type Addr = IO::Addr;

    fn info(&self) -> io::Result<ConnectionInfo<Self::Addr>> {
        self.inner.info()
    }
}

#[cfg(feature = "tls")]
impl<IO> crate::stream::tls::TlsHandshakeStream for DeadlineStream<IO>
where
    IO: crate::stream::tls::TlsHandshakeStream,
{
    /// The handshake reads from the peer, so it is bounded by the read deadline.
    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Self { inner, read, .. } = self;
        read.poll_operation("handshake", cx, |cx| inner.poll_handshake(cx))
    }
}

impl<IO> AsyncRead for DeadlineStream<IO>
where
    IO: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let inner = this.inner;
        this.read
            .poll_operation("read", cx, |cx| inner.poll_read(cx, buf))
    }
}

impl<IO> AsyncWrite for DeadlineStream<IO>
where
    IO: AsyncWrite,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.project();
        let inner = this.inner;
        this.write
            .poll_operation("write", cx, |cx| inner.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        let this = self.project();
        let inner = this.inner;
        this.write
            .poll_operation("flush", cx, |cx| inner.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.project();
        let inner = this.inner;
        this.write
            .poll_operation("write", cx, |cx| inner.poll_write_vectored(cx, bufs))
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
