//! Event-bus publication for connection lifecycle events.
//!
//! The provider publishes coarse lifecycle notifications to an external
//! event bus (UI, telemetry). The bus itself is outside this crate; the
//! [`EventPublisher`] is a thin adapter that forwards payloads to a
//! caller-registered sink.

use crate::state::ConnectionState;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Topic under which all realtime lifecycle events are published.
pub const HUB_TOPIC: &str = "api";

/// A single event-bus payload.
#[derive(Debug, Clone)]
pub struct HubPayload {
    /// Event name, e.g. `ConnectionStateChange`
    pub event: String,
    /// Structured event data
    pub data: JsonValue,
    /// Human-readable message
    pub message: String,
}

/// Sink invoked for every published payload, with the topic first.
pub type HubSink = Arc<dyn Fn(&str, HubPayload) + Send + Sync>;

/// Forwards connection-state changes and subscription acks to the external
/// event bus. With no sink registered, publication is a no-op.
#[derive(Clone, Default)]
pub struct EventPublisher {
    sink: Option<HubSink>,
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl EventPublisher {
    /// Create a publisher with no sink (publication is a no-op).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher forwarding to the given sink.
    pub fn with_sink(sink: HubSink) -> Self {
        Self { sink: Some(sink) }
    }

    /// Publish a connection-state change.
    pub(crate) fn emit_connection_state_change(&self, provider: &str, state: ConnectionState) {
        self.dispatch(HubPayload {
            event: "ConnectionStateChange".to_string(),
            data: serde_json::json!({
                "provider": provider,
                "connectionState": state.to_string(),
            }),
            message: format!("Connection state is {}", state),
        });
    }

    /// Publish a subscription acknowledgment.
    pub(crate) fn emit_subscription_ack(&self, query: &str, variables: &JsonValue) {
        self.dispatch(HubPayload {
            event: "SubscriptionAck".to_string(),
            data: serde_json::json!({
                "query": query,
                "variables": variables,
            }),
            message: "Connection established for subscription".to_string(),
        });
    }

    fn dispatch(&self, payload: HubPayload) {
        if let Some(sink) = &self.sink {
            sink(HUB_TOPIC, payload);
        }
    }
}
