//! HTTP/1.1 response builder.
//!
//! A [`Response`] is what a handler leaves in the context's response slot. The
//! status line and headers are serialized by [`Response::head_bytes`]; the body is
//! kept lazy so large or generated payloads can be streamed straight into the
//! connection writer.

use std::fmt;
use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{Headers, StatusCode};
use crate::BoxFuture;

/// Capability to write a response body onto the connection.
///
/// Implementors are consumed by the write. Anything written counts against the
/// exchange's write ceiling.
///
/// # Examples
///
/// ```rust,no_run
/// use std::io;
/// use tokio::io::{AsyncWrite, AsyncWriteExt};
/// use h1chain::{BoxFuture, http::BodyWriter};
///
/// struct Countdown(u8);
///
/// impl BodyWriter for Countdown {
///     fn write_body<'a>(
///         self: Box<Self>,
///         out: &'a mut (dyn AsyncWrite + Send + Unpin),
///     ) -> BoxFuture<'a, io::Result<()>> {
///         Box::pin(async move {
///             for n in (0..=self.0).rev() {
///                 out.write_all(format!("{n}\n").as_bytes()).await?;
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait BodyWriter: Send {
    fn write_body<'a>(
        self: Box<Self>,
        out: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> BoxFuture<'a, io::Result<()>>;
}

/// A response body.
#[derive(Default)]
pub enum Body {
    /// No body bytes at all.
    #[default]
    Empty,
    /// A body already held in memory.
    Full(Bytes),
    /// A body produced on demand by a [`BodyWriter`].
    Writer(Box<dyn BodyWriter>),
}

impl Body {
    /// Writes the body to `out`. Does not flush.
    pub async fn write_to<W>(self, out: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        match self {
            Body::Empty => Ok(()),
            Body::Full(bytes) => out.write_all(&bytes).await,
            Body::Writer(writer) => writer.write_body(out).await,
        }
    }

    /// Length of the body when it is known up front.
    pub fn known_len(&self) -> Option<usize> {
        match self {
            Body::Empty => Some(0),
            Body::Full(bytes) => Some(bytes.len()),
            Body::Writer(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// An HTTP/1.1 response.
///
/// Headers are written in exactly the order they were added and nothing is
/// injected on the way out: framing headers such as `Content-Length` are the
/// handler's responsibility. [`Response::text`] covers the common case.
///
/// # Examples
///
/// ```
/// use h1chain::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "text/plain")
///     .header("X-Foo", "bar")
///     .body("hi");
///
/// assert_eq!(
///     &response.head_bytes()[..],
///     b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Foo: bar\r\n"
/// );
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    close_connection: bool,
}

impl Response {
    /// Creates a response with the given status, no headers and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Empty,
            close_connection: false,
        }
    }

    /// Creates a plain-text response with `Content-Type` and `Content-Length` set.
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("Content-Length", text.len().to_string())
            .body(text)
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in place, for handlers decorating a downstream response.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the body from in-memory bytes.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    /// Sets a streamed body.
    #[must_use]
    pub fn stream(mut self, writer: impl BodyWriter + 'static) -> Self {
        self.body = Body::Writer(Box::new(writer));
        self
    }

    /// Forces the connection to close once this response has been written,
    /// whatever the request asked for.
    #[must_use]
    pub fn close_connection(mut self, close: bool) -> Self {
        self.close_connection = close;
        self
    }

    /// Returns `true` if this response forces the connection closed.
    pub fn closes_connection(&self) -> bool {
        self.close_connection
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers in insertion order.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the body.
    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// Serializes the status line and header lines.
    ///
    /// The blank line that ends the head is not included; the writer emits it
    /// after any cookie lines.
    pub fn head_bytes(&self) -> BytesMut {
        let estimated_size = 32 + self.headers.len() * 48;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(name.as_bytes());
            buf.put(&b": "[..]);
            buf.put(value.as_bytes());
            buf.put(&b"\r\n"[..]);
        }
        buf
    }

    /// Splits the response into its head and its body.
    pub fn into_body(self) -> (Response, Body) {
        let Response {
            status,
            headers,
            body,
            close_connection,
        } = self;
        (
            Response {
                status,
                headers,
                body: Body::Empty,
                close_connection,
            },
            body,
        )
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(r: &Response) -> String {
        String::from_utf8(r.head_bytes().to_vec()).unwrap()
    }

    #[test]
    fn no_implicit_headers() {
        let r = Response::new(StatusCode::NoContent);
        assert_eq!(head(&r), "HTTP/1.1 204 No Content\r\n");
    }

    #[test]
    fn text_sets_framing_headers() {
        let r = Response::text(StatusCode::NotFound, "Not Found");
        assert_eq!(
            head(&r),
            "HTTP/1.1 404 Not Found\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Length: 9\r\n"
        );
        assert_eq!(r.body_ref().known_len(), Some(9));
    }

    #[test]
    fn header_order_is_insertion_order() {
        let mut r = Response::new(StatusCode::Ok)
            .header("Z-Last", "1")
            .header("A-First", "2");
        r.add_header("M-Middle", "3");
        assert_eq!(
            head(&r),
            "HTTP/1.1 200 OK\r\nZ-Last: 1\r\nA-First: 2\r\nM-Middle: 3\r\n"
        );
    }

    #[test]
    fn close_override() {
        let r = Response::new(StatusCode::Ok);
        assert!(!r.closes_connection());
        assert!(r.close_connection(true).closes_connection());
    }

    #[tokio::test]
    async fn full_body_writes_verbatim() {
        let (_, body) = Response::new(StatusCode::Ok).body("payload").into_body();
        let mut out = Vec::new();
        body.write_to(&mut out).await.unwrap();
        assert_eq!(out, b"payload");
    }
}
