//! HTTP/1.1 request head parsing using the [`httparse`] crate.

use std::io;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while turning connection bytes into a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("connection closed in the middle of a request")]
    UnexpectedEof,

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("header {name} has a value that is not valid UTF-8")]
    InvalidHeaderValue { name: String },

    #[error("unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("I/O error while reading request: {0}")]
    Io(#[from] io::Error),
}

/// A fully parsed HTTP/1.x request.
///
/// Requests are immutable once built. The head is parsed by [`Request::parse`];
/// the body is attached by the [`RequestProvider`](super::RequestProvider) that read it.
///
/// # Examples
///
/// ```
/// use h1chain::http::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.target(), "/hello?name=world");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
/// assert!(request.is_keep_alive());
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    path: String,
    query: Option<String>,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers accepted per request.
    pub const MAX_HEADERS: usize = 64;

    /// Parses a request head from `buf`.
    ///
    /// Returns the request (with an empty body) and the offset just past the
    /// `\r\n\r\n` terminator.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — `buf` does not yet hold a complete head.
    /// - [`RequestError::Parse`] — the head is malformed.
    /// - [`RequestError::MissingField`] — method, target or version is absent.
    /// - [`RequestError::InvalidHeaderValue`] — a header value is not UTF-8. The head
    ///   is rejected rather than losing a header that may carry framing or
    ///   connection semantics.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req.method {
            Some(m) => m.parse::<Method>().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "target" })?;

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_list = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            let value = std::str::from_utf8(header.value).map_err(|_| {
                RequestError::InvalidHeaderValue {
                    name: header.name.to_owned(),
                }
            })?;
            header_list.insert(header.name, value);
        }

        Ok((
            Self {
                method,
                target: target.to_owned(),
                path,
                query,
                version,
                headers: header_list,
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    pub(crate) fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target exactly as it appeared on the request line.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the target path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers in arrival order.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the client allows the connection to be reused.
    ///
    /// A `close` token in `Connection` always wins. Otherwise HTTP/1.1 defaults to
    /// keep-alive and HTTP/1.0 requires an explicit `keep-alive` token.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        self.version >= 1 || self.headers.has_token("connection", "keep-alive")
    }

    /// Returns the parsed `Content-Length`, `Ok(None)` when absent.
    ///
    /// Repeated headers (or a comma-separated list) are accepted only when every
    /// value is the same number.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidContentLength`] when a value is not a plain decimal
    /// number or two values disagree.
    pub fn content_length(&self) -> Result<Option<u64>, RequestError> {
        let mut length = None;
        for raw in self.headers.get_all("content-length") {
            for element in raw.split(',') {
                let invalid = || RequestError::InvalidContentLength {
                    value: raw.to_owned(),
                };
                let element = element.trim();
                if element.is_empty() || !element.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                let parsed: u64 = element.parse().map_err(|_| invalid())?;
                match length {
                    Some(previous) if previous != parsed => return Err(invalid()),
                    _ => length = Some(parsed),
                }
            }
        }
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
        assert!(req.body().is_empty());
    }

    #[test]
    fn headers_keep_arrival_order() {
        let raw = b"GET / HTTP/1.1\r\nX-B: 2\r\nHost: h\r\nX-A: 1\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        let names: Vec<_> = req.headers().iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["X-B", "Host", "X-A"]);
    }

    #[test]
    fn target_splits_into_path_and_query() {
        let raw = b"GET /search?q=rust+lang&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust+lang&page=2"));

        let (req, _) = Request::parse(b"GET /plain HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.query_string(), None);
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn malformed_request() {
        let raw = b"GET / HTTP/9.9\r\n\r\n";
        assert!(matches!(Request::parse(raw), Err(RequestError::Parse(_))));
    }

    #[test]
    fn non_utf8_header_value_rejects_the_head() {
        let raw = b"GET / HTTP/1.1\r\nConnection: close, \xff\r\n\r\n";
        match Request::parse(raw) {
            Err(RequestError::InvalidHeaderValue { name }) => assert_eq!(name, "Connection"),
            other => panic!("expected InvalidHeaderValue, got {other:?}"),
        }

        let raw = b"POST / HTTP/1.1\r\nContent-Length: 26\xff\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::InvalidHeaderValue { .. })
        ));
    }

    #[test]
    fn keep_alive_rules() {
        let cases: [(&[u8], bool); 5] = [
            (b"GET / HTTP/1.1\r\n\r\n", true),
            (b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n", false),
            (b"GET / HTTP/1.1\r\nConnection: Keep-Alive, CLOSE\r\n\r\n", false),
            (b"GET / HTTP/1.0\r\n\r\n", false),
            (b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n", true),
        ];
        for (raw, expected) in cases {
            let (req, _) = Request::parse(raw).unwrap();
            assert_eq!(req.is_keep_alive(), expected, "{}", String::from_utf8_lossy(raw));
        }
    }

    #[test]
    fn content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length().unwrap(), Some(5));
        assert_eq!(&raw[body_offset..], b"hello");

        let raw = b"POST / HTTP/1.1\r\nContent-Length: five\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(matches!(
            req.content_length(),
            Err(RequestError::InvalidContentLength { .. })
        ));
    }

    #[test]
    fn repeated_content_length_must_agree() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 4\r\nContent-Length: 4\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length().unwrap(), Some(4));

        let raw = b"POST / HTTP/1.1\r\nContent-Length: 4, 4\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length().unwrap(), Some(4));

        for raw in [
            &b"POST / HTTP/1.1\r\nContent-Length: 0\r\nContent-Length: 26\r\n\r\n"[..],
            &b"POST / HTTP/1.1\r\nContent-Length: 3, 7\r\n\r\n"[..],
            &b"POST / HTTP/1.1\r\nContent-Length: +5\r\n\r\n"[..],
        ] {
            let (req, _) = Request::parse(raw).unwrap();
            assert!(
                matches!(req.content_length(), Err(RequestError::InvalidContentLength { .. })),
                "{}",
                String::from_utf8_lossy(raw)
            );
        }
    }
}
