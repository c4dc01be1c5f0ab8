//! The broker actor: single owner of the client registry.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use foghorn_core::{Event, LIMIT_FRAME, PING_FRAME};

use crate::client::{ClientHandle, ClientId};
use crate::config::BrokerConfig;
use crate::dispatch::dispatch;
use crate::error::PublishError;
use crate::metrics::BrokerMetrics;
use crate::registry::Registry;

/// Commands accepted by the broker task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Hand a freshly connected client to the registry.
    Register(ClientHandle),
    /// Forget a client. Sent by its writer on the failure paths.
    Deregister {
        /// Which client to forget.
        id: ClientId,
    },
    /// Fan an encoded frame out to clients matching `channels`.
    Publish {
        /// The encoded event, shared across all deliveries.
        frame: Bytes,
        /// Addressing; empty reaches every client.
        channels: Vec<String>,
    },
}

/// Cloneable front door to the broker task.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    tx: mpsc::Sender<Command>,
}

impl BrokerHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Encodes `event` once and fans it out to subscribed clients.
    ///
    /// Waits for command-queue space when the broker is busy, so callers
    /// experience backpressure rather than unbounded buffering. Delivery
    /// snapshots the registry when the command is processed: a client
    /// whose registration is still queued behind this publish does not
    /// receive the event.
    pub async fn publish(&self, event: Event) -> Result<(), PublishError> {
        let frame = event.encode()?;
        self.tx
            .send(Command::Publish {
                frame,
                channels: event.channels,
            })
            .await
            .map_err(|_| PublishError::Closed)
    }

    /// Fans `event` out to every connected client, ignoring its channels.
    pub async fn broadcast(&self, event: Event) -> Result<(), PublishError> {
        let frame = event.encode()?;
        self.tx
            .send(Command::Publish {
                frame,
                channels: Vec::new(),
            })
            .await
            .map_err(|_| PublishError::Closed)
    }

    /// Hands a connected client to the registry. Best effort: when the
    /// broker has already stopped the handle is simply dropped, which
    /// closes the client's queue and lets its writer exit cleanly.
    pub async fn register(&self, client: ClientHandle) {
        if self.tx.send(Command::Register(client)).await.is_err() {
            debug!("broker stopped; dropping registration");
        }
    }

    /// Removes a client from the registry. Best effort, same as
    /// [`register`](Self::register): a stopped broker already implies
    /// deregistration.
    pub async fn deregister(&self, id: ClientId) {
        if self.tx.send(Command::Deregister { id }).await.is_err() {
            debug!(client = %id, "broker stopped; deregistration implied");
        }
    }
}

/// The actor that owns the client registry.
///
/// Registration, removal, fan-out, and heartbeat all pass through one
/// serialized command loop, which is what guarantees per-client publish
/// order: a dispatch runs to completion before the next command is
/// looked at.
pub struct Broker {
    rx: mpsc::Receiver<Command>,
    registry: Registry,
    config: BrokerConfig,
    metrics: Arc<dyn BrokerMetrics>,
    shutdown: CancellationToken,
}

impl Broker {
    /// Creates a broker and its handle.
    #[must_use]
    pub fn new(
        config: BrokerConfig,
        metrics: Arc<dyn BrokerMetrics>,
        shutdown: CancellationToken,
    ) -> (Self, BrokerHandle) {
        let (tx, rx) = mpsc::channel(config.command_queue.max(1));
        let broker = Self {
            rx,
            registry: Registry::default(),
            config,
            metrics,
            shutdown,
        };
        (broker, BrokerHandle::new(tx))
    }

    /// Creates a broker and spawns it onto the runtime.
    #[must_use]
    pub fn spawn(
        config: BrokerConfig,
        metrics: Arc<dyn BrokerMetrics>,
        shutdown: CancellationToken,
    ) -> (BrokerHandle, JoinHandle<()>) {
        let (broker, handle) = Self::new(config, metrics, shutdown);
        let task = tokio::spawn(broker.run());
        (handle, task)
    }

    /// Runs the command loop until shutdown is signalled or every handle
    /// is gone, then disconnects all remaining clients.
    pub async fn run(mut self) {
        // An interval's first tick is immediate; the first heartbeat
        // waits a full period instead.
        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        info!(
            heartbeat_secs = self.config.heartbeat_interval().as_secs(),
            max_clients = self.config.max_clients,
            "broker started"
        );
        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = heartbeat.tick() => self.ping_all(),
                () = self.shutdown.cancelled() => break,
            }
        }
        self.drain();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Register(client) => self.register(client),
            Command::Deregister { id } => self.deregister(id),
            Command::Publish { frame, channels } => {
                let report = dispatch(&frame, &channels, self.registry.iter()).await;
                debug!(
                    matched = report.matched,
                    delivered = report.delivered(),
                    failed = report.failed(),
                    "event dispatched"
                );
                self.metrics.event_delivered(&report);
            }
        }
    }

    fn register(&mut self, client: ClientHandle) {
        if let Some(max) = self.config.max_clients
            && self.registry.len() >= max
        {
            warn!(client = %client.id(), max, "client limit reached, refusing registration");
            let _ = client.try_send(Bytes::from_static(LIMIT_FRAME));
            // Dropping the handle closes the queue; the writer drains the
            // notice and closes the socket.
            return;
        }
        info!(client = %client.id(), channels = ?client.channels(), "client registered");
        self.registry.insert(client);
        self.metrics.client_count(self.registry.len());
    }

    fn deregister(&mut self, id: ClientId) {
        if let Some(handle) = self.registry.remove(id) {
            info!(client = %id, "client deregistered");
            drop(handle);
            self.metrics.client_count(self.registry.len());
        }
    }

    fn ping_all(&mut self) {
        let mut dropped = 0_usize;
        for client in self.registry.iter() {
            if !client.try_send(Bytes::from_static(PING_FRAME)) {
                dropped += 1;
                self.metrics.ping_dropped();
            }
        }
        if dropped > 0 {
            debug!(dropped, "heartbeat frames dropped on full queues");
        }
        // Heartbeat doubles as the periodic census.
        self.metrics.client_count(self.registry.len());
    }

    fn drain(&mut self) {
        let mut disconnected = 0_usize;
        for client in self.registry.drain() {
            client.deactivate();
            disconnected += 1;
        }
        self.metrics.client_count(0);
        info!(disconnected, "broker stopped");
    }
}
