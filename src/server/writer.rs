//! Response serialization and the keep-alive decision.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::limited::{Direction, LimitedStream};
use crate::http::{Body, CookieLedger, Request, Response};

const CRLF: &[u8] = b"\r\n";

/// Writes `response` onto `writer` in HTTP/1.1 wire format.
///
/// Layout: status line, header lines in insertion order, the cookie ledger's
/// `Set-Cookie` lines when it was touched, a blank line, then the body. The head
/// is flushed before the blank line goes out, and everything is flushed once the
/// body is written.
///
/// Nothing is added to the headers; a response without `Content-Length` relies
/// on the connection closing to delimit its body.
///
/// # Errors
///
/// Any I/O error from `writer` or from the body writer.
pub async fn write_response<W>(
    writer: &mut W,
    response: Response,
    cookies: &CookieLedger,
) -> io::Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    let (head, body) = encode_head(response, cookies);
    send(writer, &head, body).await
}

/// [`write_response`] against a byte ceiling.
///
/// When the body length is known up front, the whole framed response is checked
/// against the stream's remaining write budget first, and nothing is written if
/// it does not fit. A streamed body can still hit the ceiling part way through.
///
/// # Errors
///
/// An [`io::Error`] carrying [`LimitExceeded`](super::LimitExceeded) when the
/// response does not fit, or any I/O error from the stream.
pub async fn write_bounded<S>(
    writer: &mut LimitedStream<'_, S>,
    response: Response,
    cookies: &CookieLedger,
) -> io::Result<()>
where
    S: AsyncWrite + Send + Unpin,
{
    let (head, body) = encode_head(response, cookies);
    if let Some(body_len) = body.known_len() {
        let framed = (head.len() + CRLF.len() + body_len) as u64;
        if framed > writer.write_remaining() {
            return Err(writer.exceeded(Direction::Write));
        }
    }
    send(writer, &head, body).await
}

// Status line, headers and cookie lines; the blank line is left to `send`.
fn encode_head(response: Response, cookies: &CookieLedger) -> (BytesMut, Body) {
    let (head, body) = response.into_body();
    let mut block = head.head_bytes();
    if cookies.is_touched() {
        block.put(cookies.to_cookie_data().as_bytes());
    }
    (block, body)
}

async fn send<W>(writer: &mut W, head: &[u8], body: Body) -> io::Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    writer.write_all(head).await?;
    writer.flush().await?;

    writer.write_all(CRLF).await?;
    body.write_to(writer).await?;
    writer.flush().await
}

/// Decides whether the connection survives this exchange.
///
/// The connection closes if the request does not allow keep-alive or the
/// response forces a close. An exchange without a response is judged on the
/// request alone.
pub fn keep_alive(request: &Request, response: Option<&Response>) -> bool {
    request.is_keep_alive() && !response.is_some_and(Response::closes_connection)
}
