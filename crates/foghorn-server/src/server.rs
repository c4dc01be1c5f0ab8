//! TCP accept loop and per-connection lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use foghorn_broker::{
    Broker, BrokerHandle, BrokerMetrics, ClientHandle, NoopMetrics, run_writer,
};
use foghorn_core::Event;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http::HandshakeRequest;
use crate::options::SseOptions;
use crate::subscriber::{ChannelSelector, NoChannels};

/// How long [`SseServer::shutdown`] waits for background tasks to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configures and binds an [`SseServer`].
pub struct ServerBuilder {
    config: ServerConfig,
    selector: Arc<dyn ChannelSelector>,
    metrics: Arc<dyn BrokerMetrics>,
}

impl ServerBuilder {
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            selector: Arc::new(NoChannels),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Chooses how a handshake maps onto channel subscriptions. Defaults
    /// to [`NoChannels`].
    #[must_use]
    pub fn channel_selector(mut self, selector: impl ChannelSelector + 'static) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    /// Installs a metrics sink for the broker. Defaults to
    /// [`NoopMetrics`].
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn BrokerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Spawns the broker, binds the listener, and starts accepting.
    pub async fn bind(self) -> Result<SseServer, ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let shutdown = CancellationToken::new();
        let (broker, broker_task) =
            Broker::spawn(self.config.broker.clone(), self.metrics, shutdown.clone());
        let state = Arc::new(ConnState {
            broker: broker.clone(),
            selector: self.selector,
            sse: self.config.sse.clone(),
            client_queue: self.config.broker.client_queue,
            write_timeout: self.config.broker.write_timeout(),
        });
        let accept_task = tokio::spawn(accept_loop(listener, state, shutdown.clone()));
        info!(%local_addr, "listening for event-stream clients");

        Ok(SseServer {
            broker,
            local_addr,
            shutdown,
            accept_task,
            broker_task,
        })
    }
}

/// A running SSE endpoint: listener, broker, and their shutdown switch.
#[derive(Debug)]
pub struct SseServer {
    broker: BrokerHandle,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    broker_task: JoinHandle<()>,
}

impl SseServer {
    /// Starts configuring a server.
    #[must_use]
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// The address the listener actually bound, useful with port `0`.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Publishes an event to clients subscribed to its channels.
    pub async fn send(&self, event: Event) -> Result<(), ServerError> {
        self.broker.publish(event).await.map_err(ServerError::from)
    }

    /// Publishes an event to every connected client.
    pub async fn broadcast(&self, event: Event) -> Result<(), ServerError> {
        self.broker.broadcast(event).await.map_err(ServerError::from)
    }

    /// A cloneable publishing handle that outlives borrows of the server.
    #[must_use]
    pub fn handle(&self) -> BrokerHandle {
        self.broker.clone()
    }

    /// Stops accepting, disconnects all clients, and joins the
    /// background tasks, waiting at most [`SHUTDOWN_GRACE`].
    pub async fn shutdown(self) -> Result<(), ServerError> {
        info!("shutting down");
        self.shutdown.cancel();
        match timeout(SHUTDOWN_GRACE, join_all([self.accept_task, self.broker_task])).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        warn!(error = %err, "server task ended abnormally");
                    }
                }
                Ok(())
            }
            Err(_) => Err(ServerError::ShutdownTimeout),
        }
    }
}

/// Everything a connection task needs, shared by the accept loop.
struct ConnState {
    broker: BrokerHandle,
    selector: Arc<dyn ChannelSelector>,
    sse: SseOptions,
    client_queue: usize,
    write_timeout: Duration,
}

async fn accept_loop(listener: TcpListener, state: Arc<ConnState>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = state.clone();
                    let _ = tokio::spawn(async move {
                        if let Err(err) = serve_connection(stream, peer, state).await {
                            debug!(%peer, error = %err, "connection ended with error");
                        }
                    });
                }
                Err(err) => {
                    // Transient resource exhaustion (EMFILE and friends);
                    // back off instead of spinning.
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            () = shutdown.cancelled() => break,
        }
    }
    debug!("accept loop stopped");
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ConnState>,
) -> Result<(), ServerError> {
    let request = match HandshakeRequest::read_from(&mut stream).await {
        Ok(request) => request,
        Err(err) => {
            debug!(%peer, error = %err, "handshake failed");
            let _ = stream.write_all(err.response().as_bytes()).await;
            let _ = stream.shutdown().await;
            return Err(err.into());
        }
    };

    let channels = state.selector.channels(&request);
    let preamble = state.sse.preamble(request.header("origin"));
    stream.write_all(&preamble).await?;
    stream.flush().await?;

    let (read_half, write_half) = stream.into_split();
    let (client, frames) = ClientHandle::new(channels, state.client_queue);
    let id = client.id();
    let cancel = client.cancel_token();
    debug!(%peer, client = %id, path = request.path(), "stream established");

    // Register first so no published event can slip between the
    // preamble and the client becoming addressable.
    state.broker.register(client).await;
    let _ = tokio::spawn(watch_peer(read_half, cancel.clone()));
    run_writer(
        id,
        frames,
        write_half,
        cancel,
        state.broker.clone(),
        state.write_timeout,
    )
    .await;
    Ok(())
}

/// Watches the read half of an established stream.
///
/// SSE clients never send application data, so the only reads that
/// matter are `Ok(0)` and errors, both meaning the peer is gone. Firing
/// the cancellation token here lets the writer notice immediately
/// instead of on its next failed write.
async fn watch_peer(mut read_half: OwnedReadHalf, cancel: CancellationToken) {
    let mut scratch = [0_u8; 256];
    loop {
        tokio::select! {
            read = read_half.read(&mut scratch) => match read {
                Ok(0) | Err(_) => {
                    cancel.cancel();
                    break;
                }
                Ok(_) => {}
            },
            () = cancel.cancelled() => break,
        }
    }
}
