// SPDX-License-Identifier: Apache-2.0

//! Event framing between harvesters and the downstream consumer.

use serde_json::{Map, Value};
use std::time::SystemTime;

use crate::bounded_channel::BoundedSender;
use crate::registry::State;

/// One shipped unit: an optional line payload plus the state snapshot that
/// commits its bytes. State-only events (filtered lines, final harvester
/// updates) carry no message but still move the persisted offset forward.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: SystemTime,
    /// Decoded line, absent for state-only events
    pub message: Option<String>,
    /// Structured fields from the reader pipeline
    pub fields: Option<Map<String, Value>>,
    /// Snapshot to commit once the event is accepted
    pub state: State,
}

impl Event {
    pub fn state_only(state: State) -> Self {
        Self {
            timestamp: SystemTime::now(),
            message: None,
            fields: None,
            state,
        }
    }
}

/// Downstream acceptor. Returns false to reject; a rejected event must not
/// advance the sender's tracked offset, retrying it later is safe.
pub trait Outlet: Send + Sync {
    fn on_event(&self, event: Event) -> bool;
}

/// Outlet backed by the bounded channel to the async consumer. Blocks for
/// capacity (that backpressure is what throttles harvesters) and rejects
/// once the consumer is gone.
pub struct ChannelOutlet {
    tx: BoundedSender<Event>,
}

impl ChannelOutlet {
    pub fn new(tx: BoundedSender<Event>) -> Self {
        Self { tx }
    }
}

impl Outlet for ChannelOutlet {
    fn on_event(&self, event: Event) -> bool {
        self.tx.send_blocking(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::input::identity::FileIdent;
    use std::path::PathBuf;

    fn state() -> State {
        State::new(
            "id".to_string(),
            PathBuf::from("/tmp/a.log"),
            FileIdent::default(),
            "native",
        )
    }

    #[test]
    fn channel_outlet_delivers_and_rejects_after_close() {
        let (tx, rx) = bounded(4);
        let outlet = ChannelOutlet::new(tx);

        assert!(outlet.on_event(Event::state_only(state())));
        assert!(rx.try_recv().is_some());

        drop(rx);
        assert!(!outlet.on_event(Event::state_only(state())));
    }
}
