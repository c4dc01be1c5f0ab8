//! Mapping a handshake onto channel subscriptions.

use crate::http::HandshakeRequest;

/// Decides which channels a connecting client subscribes to.
///
/// Runs once per connection, between the handshake and registration. An
/// empty return subscribes the client to broadcasts only.
pub trait ChannelSelector: Send + Sync {
    /// Channels for the client behind `request`.
    fn channels(&self, request: &HandshakeRequest) -> Vec<String>;
}

/// Subscribes every client to nothing, so each sees only broadcast
/// events. The default selector.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChannels;

impl ChannelSelector for NoChannels {
    fn channels(&self, _request: &HandshakeRequest) -> Vec<String> {
        Vec::new()
    }
}

/// Reads channels from a query parameter holding a comma-separated list,
/// e.g. `?channels=news,sports`. Empty segments are dropped; a missing
/// or empty parameter subscribes to nothing.
#[derive(Debug, Clone)]
pub struct QueryParamChannels {
    param: String,
}

impl QueryParamChannels {
    /// Selects channels from the query parameter named `param`.
    #[must_use]
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl ChannelSelector for QueryParamChannels {
    fn channels(&self, request: &HandshakeRequest) -> Vec<String> {
        request
            .query_param(&self.param)
            .map(|raw| {
                raw.split(',')
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}
