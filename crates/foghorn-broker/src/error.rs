//! Broker-facing error types.

use foghorn_core::EncodeError;
use thiserror::Error;

/// Failure to hand an event to the broker.
///
/// Client-side write failures never surface here; they resolve internally
/// through deactivation and self-removal of the affected client.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Encoding (compression) failed before the event reached the queue.
    #[error("encoding event: {0}")]
    Encode(#[from] EncodeError),

    /// The broker task has stopped.
    #[error("broker is not running")]
    Closed,
}
