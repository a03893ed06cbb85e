use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// WebSocket message types sent from server to client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted; carries the keep-alive window to honor
    ConnectionAck {
        /// Ack payload, absent on some broker implementations
        payload: Option<ConnectionAckPayload>,
    },

    /// Handshake rejected
    ConnectionError {
        /// `{errors: [{errorType, errorCode}]}`
        payload: Option<ConnectionErrorPayload>,
    },

    /// Periodic keep-alive ping
    Ka,

    /// A subscription has been registered and will begin delivering data
    StartAck {
        /// The subscription id that was acknowledged
        id: String,
    },

    /// Subscription data delivery
    Data {
        /// The subscription id this data is for
        id: String,
        /// The GraphQL result payload
        payload: JsonValue,
    },

    /// Subscription-level error; when `id` is absent the error is
    /// connection-scoped
    Error {
        /// The subscription id this error is for, if any
        #[serde(default)]
        id: Option<String>,
        /// GraphQL-shaped error payload
        payload: JsonValue,
    },

    /// Server-side end-of-stream for a subscription
    Complete {
        /// The subscription id that completed
        id: String,
    },
}

/// Payload of a `connection_ack` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionAckPayload {
    /// Keep-alive window in milliseconds; absence of `ka` frames for longer
    /// than this is fatal
    #[serde(rename = "connectionTimeoutMs")]
    pub connection_timeout_ms: Option<u64>,
}

/// Payload of a `connection_error` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionErrorPayload {
    /// The reported errors, usually exactly one
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

/// A single GraphQL-shaped error as reported by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQlError {
    /// Service error type, e.g. `UnauthorizedException`
    #[serde(rename = "errorType", default)]
    pub error_type: Option<String>,
    /// Numeric error code, e.g. 401
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<u16>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}
