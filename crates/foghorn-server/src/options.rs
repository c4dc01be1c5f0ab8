//! Response-preamble policy for the event stream.

use serde::{Deserialize, Serialize};

/// Length of the comment padding some legacy polyfills need before they
/// start surfacing events.
pub(crate) const PADDING_LEN: usize = 2048;

/// Knobs for the HTTP response head and the first stream bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseOptions {
    /// Reconnect delay advertised to clients via the `retry:` field, in
    /// milliseconds.
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
    /// Echo the request's `Origin` header back as
    /// `Access-Control-Allow-Origin`, allowing cross-origin
    /// `EventSource` use.
    #[serde(default = "default_true")]
    pub cors_origin_echo: bool,
    /// Prepend a large comment so buffering legacy clients flush and
    /// start delivering events immediately.
    #[serde(default = "default_true")]
    pub padding_for_old_browsers: bool,
}

fn default_retry_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            retry_ms: default_retry_ms(),
            cors_origin_echo: default_true(),
            padding_for_old_browsers: default_true(),
        }
    }
}

impl SseOptions {
    /// Builds the response head plus the opening stream bytes, written
    /// once per connection before any event.
    ///
    /// `origin` is the request's `Origin` header; it is echoed only when
    /// [`cors_origin_echo`](Self::cors_origin_echo) is set.
    #[must_use]
    pub fn preamble(&self, origin: Option<&str>) -> Vec<u8> {
        let padding = if self.padding_for_old_browsers {
            PADDING_LEN + 8
        } else {
            0
        };
        let mut head = Vec::with_capacity(256 + padding);
        head.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
        head.extend_from_slice(b"Content-Type: text/event-stream\r\n");
        head.extend_from_slice(b"Cache-Control: no-cache\r\n");
        head.extend_from_slice(b"Connection: keep-alive\r\n");
        if self.cors_origin_echo
            && let Some(origin) = origin
        {
            head.extend_from_slice(b"Access-Control-Allow-Origin: ");
            head.extend_from_slice(origin.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head.extend_from_slice(format!("retry: {}\n\n", self.retry_ms).as_bytes());
        if self.padding_for_old_browsers {
            head.push(b':');
            head.resize(head.len() + PADDING_LEN, b' ');
            head.extend_from_slice(b"\n\n");
        }
        head
    }
}
