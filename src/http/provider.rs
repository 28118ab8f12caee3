//! Request providers — turn connection bytes into [`Request`]s.

use std::future::Future;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

use super::{Request, RequestError};

/// Reads one request from a connection.
///
/// A session calls [`provide`](Self::provide) once per exchange with a reader
/// bounded to that exchange's read ceiling.
///
/// # Contract
///
/// - Returns `Ok(None)` when the peer closed the connection cleanly before
///   sending any byte of a new request.
/// - Never returns a partially populated request: a connection that ends in the
///   middle of a message is an error.
/// - Must not read past the end of the request it returns; whatever follows
///   belongs to the next exchange.
pub trait RequestProvider: Send + Sync + 'static {
    fn provide<R>(
        &self,
        reader: &mut R,
    ) -> impl Future<Output = Result<Option<Request>, RequestError>> + Send
    where
        R: AsyncBufRead + Unpin + Send;
}

/// Stock HTTP/1.x provider backed by [`httparse`].
///
/// Reads the head line by line up to the blank line, parses it with
/// [`Request::parse`], then reads exactly `Content-Length` body bytes. Chunked
/// request bodies are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpRequestProvider;

impl HttpRequestProvider {
    pub fn new() -> Self {
        Self
    }
}

impl RequestProvider for HttpRequestProvider {
    async fn provide<R>(&self, reader: &mut R) -> Result<Option<Request>, RequestError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut head = Vec::with_capacity(512);
        loop {
            let n = reader.read_until(b'\n', &mut head).await?;
            if n == 0 {
                if head.is_empty() {
                    return Ok(None);
                }
                return Err(RequestError::UnexpectedEof);
            }
            // Stray CRLFs between messages are ignored.
            if head == b"\r\n" || head == b"\n" {
                head.clear();
                continue;
            }
            if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
                break;
            }
        }

        let (request, _) = Request::parse(&head)?;

        if let Some(encoding) = request.headers().get("transfer-encoding") {
            if !encoding.trim().eq_ignore_ascii_case("identity") {
                return Err(RequestError::UnsupportedTransferEncoding(encoding.to_owned()));
            }
        }

        let body = match request.content_length()? {
            None | Some(0) => Bytes::new(),
            Some(len) => {
                let mut body = Vec::new();
                (&mut *reader).take(len).read_to_end(&mut body).await?;
                if (body.len() as u64) < len {
                    return Err(RequestError::UnexpectedEof);
                }
                Bytes::from(body)
            }
        };

        trace!(
            method = %request.method(),
            target = request.target(),
            body_len = body.len(),
            "request parsed"
        );
        Ok(Some(request.with_body(body)))
    }
}
