//! # foghorn-server
//!
//! The network face of a Foghorn SSE hub:
//!
//! - [`SseServer`]: binds a TCP listener, performs the minimal HTTP
//!   handshake, and hands each connection to the broker
//! - [`SseOptions`]: the response preamble policy (retry hint, CORS
//!   echo, legacy padding)
//! - [`ChannelSelector`]: pluggable mapping from a handshake to channel
//!   subscriptions
//!
//! Broker and event types the embedding application needs are
//! re-exported, so this crate is the only dependency most users take.

#![deny(unsafe_code)]

mod config;
mod error;
mod http;
mod options;
mod server;
mod subscriber;

pub use config::ServerConfig;
pub use error::ServerError;
pub use http::{HandshakeError, HandshakeRequest};
pub use options::SseOptions;
pub use server::{ServerBuilder, SseServer};
pub use subscriber::{ChannelSelector, NoChannels, QueryParamChannels};

pub use foghorn_broker::{
    BrokerConfig, BrokerHandle, BrokerMetrics, LogMetrics, NoopMetrics, RecorderMetrics,
};
pub use foghorn_core::Event;
