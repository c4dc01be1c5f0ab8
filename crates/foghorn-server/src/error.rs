//! Server-level error type.

use std::io;

use foghorn_broker::PublishError;
use thiserror::Error;

use crate::http::HandshakeError;

/// Failures surfaced by the server API.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("binding listener on {addr}: {source}")]
    Bind {
        /// The `host:port` that was requested.
        addr: String,
        /// The underlying bind failure.
        #[source]
        source: io::Error,
    },
    /// A connection-level I/O failure.
    #[error("connection i/o: {0}")]
    Connection(#[from] io::Error),
    /// The handshake with a connecting client failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// An event could not be published.
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// Background tasks did not stop within the grace period.
    #[error("server tasks did not stop within the shutdown grace period")]
    ShutdownTimeout,
}
