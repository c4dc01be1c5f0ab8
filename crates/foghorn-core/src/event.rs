//! SSE event model and wire-format encoding.

use std::io::{self, Write as _};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use thiserror::Error;

/// Pre-encoded heartbeat frame. SSE comments are ignored by clients but
/// keep idle connections from being reaped by intermediaries.
pub const PING_FRAME: &[u8] = b":ping\n\n";

/// Final frame pushed to a client turned away at the capacity limit, so
/// `EventSource` consumers can tell why the stream ended.
pub const LIMIT_FRAME: &[u8] = b"event: error\ndata: client limit reached\n\n";

/// Failure to produce the wire form of an event.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The zlib encoder reported an error while compressing the payload.
    #[error("compressing event payload: {0}")]
    Compress(#[from] io::Error),
}

/// A server-sent event addressed to zero or more channels.
///
/// An event with no channels reaches every connected client; otherwise it
/// reaches the clients subscribed to at least one of its channels.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Optional `id:` line, letting clients resume via `Last-Event-ID`.
    pub id: Option<u64>,
    /// Optional `event:` line. `None` leaves the client's default type.
    pub name: Option<String>,
    /// Channels this event is addressed to. Empty means broadcast.
    pub channels: Vec<String>,
    /// Raw payload bytes for the `data:` line.
    pub data: Vec<u8>,
    /// Compress the payload (zlib, then base64) at encode time.
    pub compress: bool,
}

impl Event {
    /// Creates an event carrying `data`, addressed to every client.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Sets the `id:` line.
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the `event:` (type) line. An empty name is encoded verbatim
    /// and is a caller mistake; omit the call to leave the default type.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Addresses the event to the given channels.
    #[must_use]
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the payload for zlib+base64 compression at encode time.
    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Encodes the event into its `text/event-stream` frame.
    ///
    /// Layout: optional `id:` line, optional `event:` line, then a single
    /// `data:` line and the blank-line terminator. The payload is written
    /// as-is (embedded newlines are not reinterpreted) or, when
    /// [`compress`](Self::compress) is set, as the base64 of its zlib
    /// deflate.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut frame = Vec::with_capacity(self.data.len() + 32);
        if let Some(id) = self.id {
            frame.extend_from_slice(b"id: ");
            frame.extend_from_slice(id.to_string().as_bytes());
            frame.push(b'\n');
        }
        if let Some(name) = &self.name {
            frame.extend_from_slice(b"event: ");
            frame.extend_from_slice(name.as_bytes());
            frame.push(b'\n');
        }
        frame.extend_from_slice(b"data: ");
        if self.compress {
            frame.extend_from_slice(self.deflate()?.as_bytes());
        } else {
            frame.extend_from_slice(&self.data);
        }
        frame.extend_from_slice(b"\n\n");
        Ok(Bytes::from(frame))
    }

    fn deflate(&self) -> Result<String, EncodeError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.data)?;
        let compressed = encoder.finish()?;
        Ok(STANDARD.encode(compressed))
    }
}
