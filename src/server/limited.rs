//! Per-exchange byte ceilings on a connection stream.

use std::{
    cmp, fmt, io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, ReadBuf};

/// Default ceiling for each direction of one exchange (1 MiB).
pub const DEFAULT_EXCHANGE_LIMIT: u64 = 1024 * 1024;

/// Read and write ceilings applied to every exchange on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExchangeLimits {
    /// Maximum bytes a request (head and body) may occupy.
    pub read_limit: u64,
    /// Maximum bytes a response (head, cookies and body) may occupy.
    pub write_limit: u64,
}

impl ExchangeLimits {
    pub fn new(read_limit: u64, write_limit: u64) -> Self {
        Self {
            read_limit,
            write_limit,
        }
    }
}

impl Default for ExchangeLimits {
    fn default() -> Self {
        Self::new(DEFAULT_EXCHANGE_LIMIT, DEFAULT_EXCHANGE_LIMIT)
    }
}

/// Which side of the exchange hit its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Read => "read",
            Direction::Write => "write",
        })
    }
}

/// An exchange tried to move more bytes than its ceiling allows.
///
/// Travels inside an [`io::Error`] through the reader and writer APIs; recover it
/// with [`LimitExceeded::from_io`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{direction} limit of {limit} bytes exceeded")]
pub struct LimitExceeded {
    pub direction: Direction,
    pub limit: u64,
}

impl LimitExceeded {
    /// Extracts a `LimitExceeded` carried by `err`, if that is what it is.
    pub fn from_io(err: &io::Error) -> Option<LimitExceeded> {
        err.get_ref()?.downcast_ref::<LimitExceeded>().copied()
    }
}

/// A stream decorator counting the bytes of one exchange.
///
/// Reads are capped at the read ceiling: once it is used up, any further read
/// fails with [`LimitExceeded`]. A write that would cross the write ceiling is
/// rejected whole, so nothing past the ceiling ever reaches the inner stream.
///
/// The decorator borrows the stream, so a fresh one (with fresh counters) is made
/// for every exchange.
#[derive(Debug)]
pub struct LimitedStream<'s, S> {
    inner: &'s mut S,
    limits: ExchangeLimits,
    read_remaining: u64,
    write_remaining: u64,
}

impl<'s, S> LimitedStream<'s, S> {
    pub fn new(inner: &'s mut S, limits: ExchangeLimits) -> Self {
        Self {
            inner,
            limits,
            read_remaining: limits.read_limit,
            write_remaining: limits.write_limit,
        }
    }

    /// Bytes consumed from the reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.limits.read_limit - self.read_remaining
    }

    /// Bytes accepted by the writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.limits.write_limit - self.write_remaining
    }

    /// The ceilings this stream was created with.
    pub fn limits(&self) -> ExchangeLimits {
        self.limits
    }

    /// Bytes the writer will still accept in this exchange.
    pub fn write_remaining(&self) -> u64 {
        self.write_remaining
    }

    /// The error a read or write past the ceiling fails with.
    pub(crate) fn exceeded(&self, direction: Direction) -> io::Error {
        let limit = match direction {
            Direction::Read => self.limits.read_limit,
            Direction::Write => self.limits.write_limit,
        };
        io::Error::other(LimitExceeded { direction, limit })
    }
}

impl<S> AsyncBufRead for LimitedStream<'_, S>
where
    S: AsyncBufRead + Unpin,
{
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        if this.read_remaining == 0 {
            return Poll::Ready(Err(this.exceeded(Direction::Read)));
        }
        let remaining = this.read_remaining;
        let buf = ready!(Pin::new(&mut *this.inner).poll_fill_buf(cx))?;
        let len = cmp::min(buf.len() as u64, remaining) as usize;
        Poll::Ready(Ok(&buf[..len]))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        this.read_remaining = this.read_remaining.saturating_sub(amt as u64);
        Pin::new(&mut *this.inner).consume(amt);
    }
}

impl<S> AsyncRead for LimitedStream<'_, S>
where
    S: AsyncBufRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let available = ready!(self.as_mut().poll_fill_buf(cx))?;
        let n = cmp::min(available.len(), buf.remaining());
        buf.put_slice(&available[..n]);
        self.consume(n);
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncWrite for LimitedStream<'_, S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.len() as u64 > this.write_remaining {
            return Poll::Ready(Err(this.exceeded(Direction::Write)));
        }
        let n = ready!(Pin::new(&mut *this.inner).poll_write(cx, buf))?;
        this.write_remaining -= n as u64;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

    use super::*;

    #[tokio::test]
    async fn reads_up_to_the_ceiling() {
        let mut inner = BufReader::new(&b"0123456789"[..]);
        let mut limited = LimitedStream::new(&mut inner, ExchangeLimits::new(4, 0));

        let mut buf = [0u8; 4];
        limited.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"0123");
        assert_eq!(limited.bytes_read(), 4);

        let err = limited.read_u8().await.unwrap_err();
        assert_eq!(
            LimitExceeded::from_io(&err),
            Some(LimitExceeded {
                direction: Direction::Read,
                limit: 4
            })
        );
    }

    #[tokio::test]
    async fn line_longer_than_ceiling_fails() {
        let mut inner = BufReader::new(&b"GET /a-very-long-target HTTP/1.1\r\n"[..]);
        let mut limited = LimitedStream::new(&mut inner, ExchangeLimits::new(8, 0));
        let mut line = Vec::new();
        let err = limited.read_until(b'\n', &mut line).await.unwrap_err();
        assert!(LimitExceeded::from_io(&err).is_some());
        assert_eq!(line, b"GET /a-v");
    }

    #[tokio::test]
    async fn unconsumed_bytes_stay_in_the_inner_buffer() {
        let mut inner = BufReader::new(&b"first\nsecond\n"[..]);
        {
            let mut limited = LimitedStream::new(&mut inner, ExchangeLimits::new(6, 0));
            let mut line = String::new();
            limited.read_line(&mut line).await.unwrap();
            assert_eq!(line, "first\n");
        }
        let mut limited = LimitedStream::new(&mut inner, ExchangeLimits::new(7, 0));
        let mut line = String::new();
        limited.read_line(&mut line).await.unwrap();
        assert_eq!(line, "second\n");
    }

    #[tokio::test]
    async fn oversized_write_is_rejected_whole() {
        let mut out = Vec::new();
        let mut limited = LimitedStream::new(&mut out, ExchangeLimits::new(0, 5));
        limited.write_all(b"abc").await.unwrap();
        assert_eq!(limited.bytes_written(), 3);

        assert_eq!(limited.write_remaining(), 2);

        let err = limited.write_all(b"def").await.unwrap_err();
        assert_eq!(
            LimitExceeded::from_io(&err).map(|e| e.direction),
            Some(Direction::Write)
        );
        assert_eq!(out, b"abc");
    }

    #[test]
    fn plain_io_errors_are_not_limits() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(LimitExceeded::from_io(&err), None);
    }

    #[test]
    fn limits_deserialize_with_defaults() {
        let limits: ExchangeLimits = serde_json::from_str(r#"{"read_limit": 10}"#).unwrap();
        assert_eq!(limits, ExchangeLimits::new(10, DEFAULT_EXCHANGE_LIMIT));
    }
}
