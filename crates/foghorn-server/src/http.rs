//! Minimal HTTP/1.1 request-head parsing for the SSE handshake.
//!
//! The server speaks just enough HTTP to accept `GET` requests and answer
//! with a streaming response; anything beyond that is refused with a
//! plain status line. A real proxy or framework in front is expected to
//! handle the rest of the protocol.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tokio::time::timeout;

/// Upper bound on the request head. Anything larger is refused.
pub(crate) const MAX_HEAD_BYTES: usize = 8 * 1024;

/// How long a client may take to deliver its request head.
pub(crate) const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure to read or parse the request head.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The socket failed while reading the head.
    #[error("reading request head: {0}")]
    Io(#[from] io::Error),
    /// The head exceeded [`MAX_HEAD_BYTES`] without terminating.
    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    TooLarge,
    /// The bytes received do not form an HTTP/1.1 request head.
    #[error("malformed request head: {0}")]
    Malformed(&'static str),
    /// The request used a method other than `GET`.
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),
    /// The head did not arrive within [`HEAD_TIMEOUT`].
    #[error("request head not received within {HEAD_TIMEOUT:?}")]
    Timeout,
}

impl HandshakeError {
    /// The complete HTTP response to write before closing the socket.
    #[must_use]
    pub fn response(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed(_) => {
                "HTTP/1.1 405 Method Not Allowed\r\nAllow: GET\r\nConnection: close\r\n\r\n"
            }
            Self::TooLarge => {
                "HTTP/1.1 431 Request Header Fields Too Large\r\nConnection: close\r\n\r\n"
            }
            Self::Timeout => "HTTP/1.1 408 Request Timeout\r\nConnection: close\r\n\r\n",
            Self::Malformed(_) | Self::Io(_) => {
                "HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n"
            }
        }
    }
}

/// The parsed head of an incoming `GET` request.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    path: String,
    query: Option<String>,
    headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Reads a request head from `stream` and parses it.
    ///
    /// Reads until the blank line that terminates the head, refusing heads
    /// over [`MAX_HEAD_BYTES`] or slower than [`HEAD_TIMEOUT`]. Any body
    /// bytes a misbehaving client sends after the head are left unread.
    pub async fn read_from<R>(stream: &mut R) -> Result<Self, HandshakeError>
    where
        R: AsyncRead + Unpin,
    {
        match timeout(HEAD_TIMEOUT, Self::read_head(stream)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Timeout),
        }
    }

    async fn read_head<R>(stream: &mut R) -> Result<Self, HandshakeError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::with_capacity(1024);
        loop {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                return Self::parse(&buf[..end]);
            }
            if buf.len() > MAX_HEAD_BYTES {
                return Err(HandshakeError::TooLarge);
            }
            let read = stream.read_buf(&mut buf).await?;
            if read == 0 {
                return Err(HandshakeError::Malformed("connection closed mid-head"));
            }
        }
    }

    /// Parses the head bytes, excluding the terminating blank line.
    pub(crate) fn parse(head: &[u8]) -> Result<Self, HandshakeError> {
        let head = std::str::from_utf8(head)
            .map_err(|_| HandshakeError::Malformed("head is not valid UTF-8"))?;
        let mut lines = head.split("\r\n");
        let request_line = lines
            .next()
            .ok_or(HandshakeError::Malformed("empty head"))?;

        let mut parts = request_line.split_ascii_whitespace();
        let method = parts
            .next()
            .ok_or(HandshakeError::Malformed("missing method"))?;
        let target = parts
            .next()
            .ok_or(HandshakeError::Malformed("missing request target"))?;
        if parts.next().is_none_or(|v| !v.starts_with("HTTP/1.")) {
            return Err(HandshakeError::Malformed("missing HTTP version"));
        }
        if method != "GET" {
            return Err(HandshakeError::MethodNotAllowed(method.to_owned()));
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or(HandshakeError::Malformed("header without colon"))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
        }

        Ok(Self {
            path,
            query,
            headers,
        })
    }

    /// The request path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, if the request target had one.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Looks up a header by name, case-insensitively. Returns the first
    /// occurrence when a header repeats.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a query parameter by key.
    ///
    /// Values are taken verbatim; channel names are plain tokens, so
    /// percent-decoding is not attempted. A key without `=` yields `""`.
    #[must_use]
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == key).then_some(v)
        })
    }
}
