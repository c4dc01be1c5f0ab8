//! Channel subscription matching.

/// Returns whether a client subscribed to `subscribed` should receive an
/// event addressed to `event_channels`.
///
/// An event with no channels is a broadcast and matches every client.
/// Otherwise the client must share at least one channel with the event.
/// Comparison is exact string equality; order and duplicates are
/// irrelevant.
#[must_use]
pub fn channels_match(subscribed: &[String], event_channels: &[String]) -> bool {
    if event_channels.is_empty() {
        return true;
    }
    subscribed
        .iter()
        .any(|channel| event_channels.iter().any(|target| target == channel))
}
