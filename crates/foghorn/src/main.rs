//! # foghorn
//!
//! Standalone SSE hub binary: binds the server, wires up channel
//! selection and metrics, and runs until interrupted.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;

use foghorn_server::{Event, QueryParamChannels, RecorderMetrics, ServerConfig, SseServer};

/// Foghorn SSE broadcast hub.
#[derive(Parser, Debug)]
#[command(name = "foghorn", about = "Server-sent-events broadcast hub", version)]
struct Cli {
    /// Host to bind (overrides the config file).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON config file; flags win over its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Query parameter carrying comma-separated channel subscriptions.
    #[arg(long, default_value = "channels")]
    channels_param: String,

    /// Expose Prometheus metrics on this address (e.g. 127.0.0.1:9100).
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Broadcast a numbered `tick` event every second, so `curl -N`
    /// shows a live stream.
    #[arg(long)]
    demo: bool,
}

fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => ServerConfig::default(),
    };
    if let Some(host) = &cli.host {
        config.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let mut builder = SseServer::builder(config)
        .channel_selector(QueryParamChannels::new(cli.channels_param.clone()));
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        builder = builder.metrics(Arc::new(RecorderMetrics));
        info!(%addr, "Prometheus metrics exposed");
    }

    let server = builder.bind().await.context("starting server")?;
    let addr = server.local_addr();
    info!("Foghorn listening; stream with: curl -N http://{addr}/events");

    if cli.demo {
        let publisher = server.handle();
        let _ = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            let mut seq: u64 = 0;
            loop {
                let _ = ticker.tick().await;
                seq += 1;
                let event = Event::new(format!("{{\"seq\": {seq}}}"))
                    .with_name("tick")
                    .with_id(seq);
                if publisher.broadcast(event).await.is_err() {
                    break;
                }
            }
        });
        info!("demo publisher started (1s tick events)");
    }

    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("signal received, shutting down");
    server.shutdown().await.context("graceful shutdown")?;
    Ok(())
}
