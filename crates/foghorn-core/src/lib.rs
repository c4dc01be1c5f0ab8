//! # foghorn-core
//!
//! Protocol layer for the Foghorn SSE hub:
//!
//! - [`Event`]: a named payload addressed to zero or more channels
//! - [`Event::encode`]: the `text/event-stream` wire form, with optional
//!   zlib+base64 payload compression
//! - [`channels_match`]: the subscription predicate used by the fan-out
//!
//! This crate is runtime-free; everything async lives in `foghorn-broker`
//! and `foghorn-server`.

#![deny(unsafe_code)]

mod channels;
mod event;

pub use channels::channels_match;
pub use event::{EncodeError, Event, LIMIT_FRAME, PING_FRAME};
