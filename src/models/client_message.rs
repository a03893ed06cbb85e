use serde::Serialize;
use std::collections::HashMap;

/// WebSocket message types sent from client to server.
///
/// The `start` payload carries the GraphQL operation as a pre-serialized
/// JSON string under `data`, with the per-subscription authorization header
/// object under `extensions.authorization`, per the AppSync realtime
/// protocol.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientMessage {
    /// Protocol handshake, sent once after the socket opens
    ConnectionInit,

    /// Register a subscription under the given id
    Start {
        /// Client-generated subscription id (the wire correlation key)
        id: String,
        /// Operation payload plus authorization extensions
        payload: StartPayload,
    },

    /// Stop the subscription with the given id
    Stop {
        /// The subscription id to stop
        id: String,
    },
}

/// Payload of a `start` frame.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StartPayload {
    /// JSON-serialized `{"query": ..., "variables": ...}` string
    pub data: String,
    /// Authorization extensions
    pub extensions: StartExtensions,
}

/// `extensions` object of a `start` frame.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StartExtensions {
    /// The per-mode authorization header object
    pub authorization: HashMap<String, String>,
}
