//! Per-client state and the connection writer task.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::BrokerHandle;

/// Unique identity of a connected client (time-ordered UUID).
pub type ClientId = Uuid;

/// Receiving side of a client's frame queue, drained by its writer task.
pub type FrameReceiver = mpsc::Receiver<Bytes>;

/// Registry-side handle to one connected client.
///
/// Holds the sending side of the client's bounded frame queue and the
/// cancellation token that every party (writer, read watcher, broker)
/// uses to signal or observe that the client is gone.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    channels: Vec<String>,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Creates a handle plus the frame receiver its writer will drain.
    ///
    /// `queue` is clamped to at least one frame.
    #[must_use]
    pub fn new(channels: Vec<String>, queue: usize) -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let handle = Self {
            id: Uuid::now_v7(),
            channels,
            tx,
            cancel: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// The client's id.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Channels this client subscribed to at registration.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// A clone of the client's cancellation token, for the read watcher
    /// and writer of the same connection.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Marks the client gone. Idempotent; safe to call from any side.
    pub fn deactivate(&self) {
        self.cancel.cancel();
    }

    /// Waits for the frame to be accepted into the client's queue.
    pub(crate) async fn send(&self, frame: Bytes) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    /// Offers a frame without waiting; `false` when the queue is full or
    /// closed.
    pub(crate) fn try_send(&self, frame: Bytes) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    /// Resolves once the client has been deactivated.
    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Drains a client's frame queue into its socket.
///
/// Runs until one of three things happens:
///
/// - the registry closes the queue (limit rejection or broker shutdown):
///   close the socket and exit quietly, the registry already forgot us;
/// - the cancellation token fires (the read watcher saw the peer vanish):
///   close and deregister;
/// - a write fails or misses `write_deadline`: deactivate (cancel the
///   token), close, and deregister.
///
/// Each write is wrapped in the deadline individually, so one stuck
/// client never holds its frames for more than `write_deadline`. Frames
/// still queued when the writer exits are dropped.
pub async fn run_writer<W>(
    id: ClientId,
    mut frames: FrameReceiver,
    mut sink: W,
    cancel: CancellationToken,
    broker: BrokerHandle,
    write_deadline: Duration,
) where
    W: AsyncWrite + Unpin,
{
    let self_remove = loop {
        tokio::select! {
            maybe = frames.recv() => match maybe {
                Some(frame) => match timeout(write_deadline, write_frame(&mut sink, &frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(client = %id, error = %err, "client write failed, dropping connection");
                        cancel.cancel();
                        break true;
                    }
                    Err(_) => {
                        warn!(
                            client = %id,
                            deadline_ms = write_deadline.as_millis() as u64,
                            "client write missed deadline, dropping connection"
                        );
                        cancel.cancel();
                        break true;
                    }
                },
                None => {
                    cancel.cancel();
                    break false;
                }
            },
            () = cancel.cancelled() => {
                debug!(client = %id, "client connection closed");
                break true;
            }
        }
    };

    let _ = sink.shutdown().await;
    if self_remove {
        broker.deregister(id).await;
    }
}

async fn write_frame<W>(sink: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(frame).await?;
    sink.flush().await
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::io::AsyncReadExt as _;
    use tokio::sync::mpsc;

    use crate::broker::Command;

    use super::*;

    fn test_broker() -> (BrokerHandle, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(8);
        (BrokerHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn zero_queue_capacity_is_clamped() {
        let (handle, mut rx) = ClientHandle::new(vec![], 0);
        assert!(handle.send(Bytes::from_static(b"data: x\n\n")).await);
        assert_eq!(
            rx.recv().await.expect("queue open"),
            Bytes::from_static(b"data: x\n\n")
        );
    }

    #[tokio::test]
    async fn writes_frames_in_queue_order() {
        let (handle, rx) = ClientHandle::new(vec![], 8);
        let (broker, _commands) = test_broker();
        let (local, mut remote) = tokio::io::duplex(1024);
        let writer = tokio::spawn(run_writer(
            handle.id(),
            rx,
            local,
            handle.cancel_token(),
            broker,
            Duration::from_secs(2),
        ));

        assert!(handle.send(Bytes::from_static(b"data: one\n\n")).await);
        assert!(handle.send(Bytes::from_static(b"data: two\n\n")).await);
        drop(handle);

        let mut wire = Vec::new();
        let _ = remote.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, b"data: one\n\ndata: two\n\n");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn registry_close_exits_without_deregister() {
        let (handle, rx) = ClientHandle::new(vec![], 8);
        let (broker, mut commands) = test_broker();
        let (local, mut remote) = tokio::io::duplex(1024);
        let cancel = handle.cancel_token();
        let writer = tokio::spawn(run_writer(
            handle.id(),
            rx,
            local,
            cancel.clone(),
            broker,
            Duration::from_secs(2),
        ));

        drop(handle);
        writer.await.unwrap();

        // Socket closed, token cancelled, and no deregister was issued.
        let mut rest = Vec::new();
        let _ = remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(cancel.is_cancelled());
        assert!(commands.recv().await.is_none());
    }

    #[tokio::test]
    async fn peer_gone_deregisters() {
        let (handle, rx) = ClientHandle::new(vec![], 8);
        let (broker, mut commands) = test_broker();
        let (local, _remote) = tokio::io::duplex(1024);
        let id = handle.id();
        let writer = tokio::spawn(run_writer(
            id,
            rx,
            local,
            handle.cancel_token(),
            broker,
            Duration::from_secs(2),
        ));

        handle.deactivate();
        writer.await.unwrap();

        assert_matches!(commands.recv().await, Some(Command::Deregister { id: got }) if got == id);
    }

    #[tokio::test(start_paused = true)]
    async fn missed_deadline_deactivates_and_deregisters() {
        let (handle, rx) = ClientHandle::new(vec![], 8);
        let (broker, mut commands) = test_broker();
        // Tiny duplex buffer and no reader: the write can never complete.
        let (local, remote) = tokio::io::duplex(4);
        let id = handle.id();
        let cancel = handle.cancel_token();
        let writer = tokio::spawn(run_writer(
            id,
            rx,
            local,
            cancel.clone(),
            broker,
            Duration::from_secs(2),
        ));

        assert!(handle.send(Bytes::from(vec![b'x'; 64])).await);
        writer.await.unwrap();

        assert!(cancel.is_cancelled());
        assert_matches!(commands.recv().await, Some(Command::Deregister { id: got }) if got == id);
        drop(remote);
    }

    #[tokio::test]
    async fn broken_pipe_deregisters() {
        let (handle, rx) = ClientHandle::new(vec![], 8);
        let (broker, mut commands) = test_broker();
        let (local, remote) = tokio::io::duplex(1024);
        drop(remote);
        let id = handle.id();
        let writer = tokio::spawn(run_writer(
            id,
            rx,
            local,
            handle.cancel_token(),
            broker,
            Duration::from_secs(2),
        ));

        assert!(handle.send(Bytes::from_static(b"data: x\n\n")).await);
        writer.await.unwrap();

        assert_matches!(commands.recv().await, Some(Command::Deregister { id: got }) if got == id);
    }
}
