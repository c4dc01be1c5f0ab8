//! Concurrent per-client delivery of one encoded frame.

use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::time::Instant;

use foghorn_core::channels_match;

use crate::client::{ClientHandle, ClientId};

/// Outcome of one client's delivery attempt.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Client the frame was offered to.
    pub client: ClientId,
    /// Whether the frame was accepted into the client's queue.
    pub ok: bool,
    /// Time from dispatch start until this outcome was known.
    pub elapsed: Duration,
}

/// Summary of one fan-out, handed to [`crate::BrokerMetrics`].
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Clients whose subscriptions matched the event.
    pub matched: usize,
    /// Per-client outcomes, in completion order.
    pub outcomes: Vec<Delivery>,
    /// Wall time of the whole fan-out.
    pub elapsed: Duration,
}

impl DispatchReport {
    /// Deliveries accepted into a client queue.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|d| d.ok).count()
    }

    /// Deliveries that failed: the client was gone, or went away before
    /// queue space opened up.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    /// Mean enqueue latency over successful deliveries, if any.
    #[must_use]
    pub fn mean_latency(&self) -> Option<Duration> {
        let (sum, count) = self
            .outcomes
            .iter()
            .filter(|d| d.ok)
            .fold((Duration::ZERO, 0u32), |(sum, count), d| {
                (sum + d.elapsed, count + 1)
            });
        (count > 0).then(|| sum / count)
    }
}

/// Offers `frame` to every client matching `event_channels`.
///
/// Deliveries run concurrently; each one races the queue send against the
/// client's cancellation token, so a dead or dying client can never stall
/// the fan-out. Returns only once every outcome is known. Success means
/// the frame was accepted into the client's queue; the writer's deadline
/// bounds everything past that point.
pub(crate) async fn dispatch<'a, I>(
    frame: &Bytes,
    event_channels: &[String],
    clients: I,
) -> DispatchReport
where
    I: IntoIterator<Item = &'a ClientHandle>,
{
    let started = Instant::now();
    let deliveries: Vec<_> = clients
        .into_iter()
        .filter(|client| channels_match(client.channels(), event_channels))
        .map(|client| deliver(client, frame.clone()))
        .collect();
    let matched = deliveries.len();
    let outcomes = join_all(deliveries).await;
    DispatchReport {
        matched,
        outcomes,
        elapsed: started.elapsed(),
    }
}

async fn deliver(client: &ClientHandle, frame: Bytes) -> Delivery {
    let started = Instant::now();
    // Biased so a client that is already gone always loses, even when its
    // queue still has room.
    let ok = tokio::select! {
        biased;
        () = client.cancelled() => false,
        accepted = client.send(frame) => accepted,
    };
    Delivery {
        client: client.id(),
        ok,
        elapsed: started.elapsed(),
    }
}
