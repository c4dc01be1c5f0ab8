//! End-to-end tests over real loopback sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;

use foghorn_core::LIMIT_FRAME;
use foghorn_server::{
    BrokerMetrics, Event, QueryParamChannels, ServerConfig, SseServer,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes every registry size change into a watch channel, so tests
/// can wait for registration instead of sleeping.
struct CountWatch {
    tx: watch::Sender<usize>,
}

impl BrokerMetrics for CountWatch {
    fn client_count(&self, n: usize) {
        let _ = self.tx.send(n);
    }
}

fn count_watch() -> (Arc<CountWatch>, watch::Receiver<usize>) {
    let (tx, rx) = watch::channel(0);
    (Arc::new(CountWatch { tx }), rx)
}

/// Quiet config: no legacy padding, heartbeat far away from assertions.
fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.sse.padding_for_old_browsers = false;
    config.broker.heartbeat_interval_secs = 3600;
    config
}

async fn boot(config: ServerConfig) -> (SseServer, watch::Receiver<usize>) {
    let (metrics, clients) = count_watch();
    let server = SseServer::builder(config)
        .metrics(metrics)
        .bind()
        .await
        .expect("bind test server");
    (server, clients)
}

async fn wait_clients(clients: &mut watch::Receiver<usize>, n: usize) {
    let _ = timeout(TIMEOUT, clients.wait_for(|&count| count == n))
        .await
        .expect("timeout waiting for client count")
        .expect("count watch closed");
}

/// Opens a raw connection and sends a plain SSE handshake.
async fn connect(addr: SocketAddr, target: &str, origin: Option<&str>) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let mut request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n");
    if let Some(origin) = origin {
        request.push_str(&format!("Origin: {origin}\r\n"));
    }
    request.push_str("\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("send handshake");
    stream
}

/// Reads up to and including the next `\n\n`. With padding disabled the
/// first read returns the whole preamble; after that, one event frame
/// per call.
async fn read_chunk(stream: &mut TcpStream) -> Vec<u8> {
    let mut chunk = Vec::new();
    let mut byte = [0_u8; 1];
    timeout(TIMEOUT, async {
        while !chunk.ends_with(b"\n\n") {
            let n = stream.read(&mut byte).await.expect("read stream");
            assert_eq!(n, 1, "stream closed mid-chunk");
            chunk.push(byte[0]);
        }
    })
    .await
    .expect("timeout reading chunk");
    chunk
}

/// Reads until EOF, asserting it arrives within the timeout.
async fn read_eof(stream: &mut TcpStream) {
    let mut sink = [0_u8; 256];
    timeout(TIMEOUT, async {
        loop {
            match stream.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await
    .expect("timeout waiting for EOF");
}

#[tokio::test]
async fn serves_preamble_then_broadcasts() {
    let (server, mut clients) = boot(test_config()).await;
    let mut stream = connect(server.local_addr(), "/events", None).await;

    let preamble = read_chunk(&mut stream).await;
    assert!(preamble.starts_with(b"HTTP/1.1 200 OK\r\n"));
    let head = String::from_utf8(preamble).expect("utf-8 preamble");
    assert!(head.contains("Content-Type: text/event-stream\r\n"));
    assert!(head.contains("Cache-Control: no-cache\r\n"));
    assert!(head.ends_with("retry: 2000\n\n"));
    assert!(!head.contains("Access-Control-Allow-Origin"));

    wait_clients(&mut clients, 1).await;
    server
        .broadcast(Event::new("{\"n\":1}").with_name("tick"))
        .await
        .expect("broadcast");
    assert_eq!(
        read_chunk(&mut stream).await,
        b"event: tick\ndata: {\"n\":1}\n\n"
    );

    // Compression survives the trip byte-for-byte.
    server
        .broadcast(Event::new("{id: 1}").compressed())
        .await
        .expect("broadcast compressed");
    assert_eq!(
        read_chunk(&mut stream).await,
        b"data: eJyrzkyxUjCsBQAJ9QJR\n\n"
    );

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn origin_is_echoed_when_enabled() {
    let (server, _clients) = boot(test_config()).await;
    let mut stream = connect(server.local_addr(), "/events", Some("https://app.example")).await;

    let head = String::from_utf8(read_chunk(&mut stream).await).expect("utf-8 preamble");
    assert!(head.contains("Access-Control-Allow-Origin: https://app.example\r\n"));

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn channel_filtering_routes_events() {
    let (metrics, mut clients) = count_watch();
    let server = SseServer::builder(test_config())
        .channel_selector(QueryParamChannels::new("channels"))
        .metrics(metrics)
        .bind()
        .await
        .expect("bind test server");
    let addr = server.local_addr();

    let mut news = connect(addr, "/events?channels=news", None).await;
    let _ = read_chunk(&mut news).await;
    let mut sports = connect(addr, "/events?channels=sports,scores", None).await;
    let _ = read_chunk(&mut sports).await;
    wait_clients(&mut clients, 2).await;

    server
        .send(Event::new("goal").with_name("flash").with_channels(["sports"]))
        .await
        .expect("send");
    server.broadcast(Event::new("hello")).await.expect("broadcast");

    // The sports stream sees both, in publish order.
    assert_eq!(read_chunk(&mut sports).await, b"event: flash\ndata: goal\n\n");
    assert_eq!(read_chunk(&mut sports).await, b"data: hello\n\n");
    // The news stream's first frame is the broadcast: dispatches are
    // serialized, so the flash event reaching it would have come first.
    assert_eq!(read_chunk(&mut news).await, b"data: hello\n\n");

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn client_limit_sends_notice_and_closes() {
    let mut config = test_config();
    config.broker.max_clients = Some(1);
    let (server, mut clients) = boot(config).await;
    let addr = server.local_addr();

    let mut first = connect(addr, "/events", None).await;
    let _ = read_chunk(&mut first).await;
    wait_clients(&mut clients, 1).await;

    // The second client gets a preamble, the limit notice, then EOF.
    let mut second = connect(addr, "/events", None).await;
    let _ = read_chunk(&mut second).await;
    assert_eq!(read_chunk(&mut second).await, LIMIT_FRAME);
    read_eof(&mut second).await;

    // The first client is unaffected.
    server.broadcast(Event::new("still here")).await.expect("broadcast");
    assert_eq!(read_chunk(&mut first).await, b"data: still here\n\n");

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn disconnect_is_noticed_and_cleaned_up() {
    let (server, mut clients) = boot(test_config()).await;
    let mut stream = connect(server.local_addr(), "/events", None).await;
    let _ = read_chunk(&mut stream).await;
    wait_clients(&mut clients, 1).await;

    // Closing the socket trips the read watcher, which cancels the
    // writer, which deregisters the client.
    drop(stream);
    wait_clients(&mut clients, 0).await;

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn shutdown_closes_active_streams() {
    let (server, mut clients) = boot(test_config()).await;
    let mut stream = connect(server.local_addr(), "/events", None).await;
    let _ = read_chunk(&mut stream).await;
    wait_clients(&mut clients, 1).await;

    let handle = server.handle();
    server.shutdown().await.expect("shutdown");

    read_eof(&mut stream).await;
    assert!(handle.publish(Event::new("late")).await.is_err());
}

#[tokio::test]
async fn padded_preamble_has_advertised_shape() {
    let mut config = ServerConfig::default();
    config.broker.heartbeat_interval_secs = 3600;
    let (server, _clients) = boot(config).await;
    let mut stream = connect(server.local_addr(), "/events", None).await;

    let head = read_chunk(&mut stream).await;
    assert!(head.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(head.ends_with(b"retry: 2000\n\n"));

    let padding = read_chunk(&mut stream).await;
    assert_eq!(padding.first(), Some(&b':'));
    assert_eq!(padding.len(), 1 + 2048 + 2);
    assert!(padding[1..padding.len() - 2].iter().all(|&b| b == b' '));

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn non_get_is_refused_with_405() {
    let (server, _clients) = boot(test_config()).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.expect("connect");
    stream
        .write_all(b"POST /events HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .expect("send request");

    let mut response = Vec::new();
    let _ = timeout(TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("timeout reading response")
        .expect("read response");
    assert!(response.starts_with(b"HTTP/1.1 405 Method Not Allowed\r\n"));

    server.shutdown().await.expect("shutdown");
}
