//! # foghorn-broker
//!
//! The hub of a Foghorn SSE server:
//!
//! - [`Broker`]: the actor that owns the client registry; the single
//!   serialization point for registration, removal, fan-out, and
//!   heartbeat
//! - [`BrokerHandle`]: cloneable front door for publishing and
//!   (de)registration
//! - [`run_writer`]: per-client task draining a frame queue into a socket
//!   under a write deadline
//! - [`BrokerMetrics`]: pluggable observer of client counts and delivery
//!   reports
//!
//! All coordination is bounded message passing; no locks guard broker
//! state.

#![deny(unsafe_code)]

mod broker;
mod client;
mod config;
mod dispatch;
mod error;
mod metrics;
mod registry;

pub use broker::{Broker, BrokerHandle};
pub use client::{ClientHandle, ClientId, FrameReceiver, run_writer};
pub use config::BrokerConfig;
pub use dispatch::{Delivery, DispatchReport};
pub use error::PublishError;
pub use metrics::{
    BrokerMetrics, CLIENTS_CONNECTED, DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, FANOUT_SECONDS,
    LogMetrics, NoopMetrics, PINGS_DROPPED_TOTAL, RecorderMetrics,
};
