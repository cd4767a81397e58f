//! Engine events and the subscriber fan-out channel.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::client::ConnectionState;
use crate::state::LabelTables;

// Which side of the matrix a label belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Input,
    Output,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Input => f.write_str("input"),
            PortKind::Output => f.write_str("output"),
        }
    }
}

// Everything the engine reports to subscribers. Route and label events are
// sourced exclusively from device input; a command that was merely sent never
// produces one.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    // Connection state transition
    Connection { state: ConnectionState },
    // Auto-reconnect gave up; a fresh connect() call is required
    ReconnectsExhausted { attempts: u32 },
    // One output was routed to an input
    RouteChanged { output: u32, input: u32 },
    // One port label changed
    LabelChanged { kind: PortKind, index: u32, label: String },
    // Full label tables, emitted after every labels section
    LabelsSnapshot { labels: LabelTables },
    // Device acknowledged a command
    Ack,
}

// Broadcast fan-out to any number of subscribers. Publishing never waits on
// a receiver; a subscriber that falls behind observes `Lagged` and can
// resynchronize from the state snapshots.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    // Dropping the receiver unsubscribes
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: HubEvent) {
        // A send with no subscribers is not an error worth reporting
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new(8);
        bus.publish(HubEvent::Ack);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(HubEvent::RouteChanged { output: 3, input: 9 });
        match rx.recv().await.unwrap() {
            HubEvent::RouteChanged { output, input } => {
                assert_eq!((output, input), (3, 9));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let json = serde_json::to_string(&HubEvent::LabelChanged {
            kind: PortKind::Input,
            index: 5,
            label: "Camera 6".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"label_changed\""));
        assert!(json.contains("\"kind\":\"input\""));
    }
}
