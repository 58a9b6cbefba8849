//! Tuning knobs an embedding host can set. Neither field changes the wire
//! contract observed by a client — both are batching/performance knobs, not
//! correctness ones.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IncrementalDeliveryConfig {
    /// Caps how many synchronously-ready stream items are coalesced into one
    /// batch before it is flushed, even if more are ready. `0` means no cap:
    /// everything ready before the first await is coalesced.
    pub stream_initial_batch_size: usize,

    /// Whether stream draining yields one cooperative tick
    /// (`tokio::task::yield_now`) after awaiting a pending item, to let
    /// sibling ready values land in the same batch. Disabling this trades
    /// batch size for latency.
    pub yield_between_stream_items: bool,
}

impl Default for IncrementalDeliveryConfig {
    fn default() -> Self {
        Self {
            stream_initial_batch_size: 0,
            yield_between_stream_items: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = IncrementalDeliveryConfig::default();
        assert_eq!(config.stream_initial_batch_size, 0);
        assert!(config.yield_between_stream_items);
    }
}
