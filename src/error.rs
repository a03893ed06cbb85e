//! Error types for appsync-realtime client operations.
//!
//! Provides a single error enum covering validation, handshake,
//! authorization, per-subscription, and transport failures, plus the
//! non-retryable marker consumed by the retry utility.

use std::fmt;

/// Result type alias using [`RealtimeError`]
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors that can occur while establishing or using a realtime connection.
///
/// Failures that affect a single subscription (`SubscriptionStart`) terminate
/// only that subscription's stream; failures that affect the shared
/// connection (`Handshake`, `KeepAliveTimeout`, `WebSocket`) feed the
/// published connection-state lifecycle and, when transient, the
/// reconnection flow.
#[derive(Debug)]
pub enum RealtimeError {
    /// Missing or malformed subscribe options (endpoint, query)
    Validation(String),

    /// Authorization header construction failed or a required token is absent
    Authentication(String),

    /// Connection handshake failed: refused, closed before ack, ack timeout,
    /// or an explicit `connection_error` from the service
    Handshake {
        /// Human-readable description
        message: String,
        /// Service-provided error type, e.g. `UnauthorizedException`
        error_type: Option<String>,
        /// Service-provided error code, e.g. 401
        error_code: Option<u16>,
    },

    /// A specific subscription failed to start (`error` frame for its id or
    /// start-ack timeout); the shared connection remains usable
    SubscriptionStart {
        /// Human-readable description
        message: String,
        /// The raw GraphQL-shaped error payload when the server provided one
        errors: Option<serde_json::Value>,
    },

    /// No keep-alive arrived within the connection timeout window
    KeepAliveTimeout(String),

    /// A frame could not be written to the socket
    Send(String),

    /// JSON serialization/deserialization errors
    Serialization(String),

    /// WebSocket transport or protocol errors
    WebSocket(String),

    /// An operation did not complete in time
    Timeout(String),

    /// Wrapper marking the inner error as not worth retrying; the retry
    /// utility aborts as soon as it sees one
    NonRetryable(Box<RealtimeError>),
}

impl RealtimeError {
    /// Wrap this error in the non-retryable marker.
    pub fn non_retryable(self) -> Self {
        match self {
            Self::NonRetryable(_) => self,
            other => Self::NonRetryable(Box::new(other)),
        }
    }

    /// Whether the retry utility is allowed to retry after this error.
    ///
    /// Validation and authentication failures are deterministic, so retrying
    /// them would only repeat the same outcome.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NonRetryable(_) | Self::Validation(_) | Self::Authentication(_)
        )
    }

    /// Strip the non-retryable marker, if present.
    pub fn into_inner(self) -> Self {
        match self {
            Self::NonRetryable(inner) => *inner,
            other => other,
        }
    }

    /// A GraphQL-shaped `{"errors": [...]}` rendering of this error, used
    /// when surfacing failures on a caller's subscription stream.
    pub fn to_graphql_errors(&self) -> serde_json::Value {
        if let Self::SubscriptionStart {
            errors: Some(errors),
            ..
        } = self
        {
            return serde_json::json!({ "errors": errors });
        }
        serde_json::json!({
            "errors": [ { "message": self.to_string() } ]
        })
    }
}

impl fmt::Display for RealtimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
            Self::Authentication(msg) => write!(f, "Authentication failed: {}", msg),
            Self::Handshake {
                message,
                error_type,
                error_code,
            } => {
                write!(f, "Handshake failed: {}", message)?;
                if let Some(t) = error_type {
                    write!(f, " ({})", t)?;
                }
                if let Some(c) = error_code {
                    write!(f, " [code {}]", c)?;
                }
                Ok(())
            },
            Self::SubscriptionStart { message, .. } => {
                write!(f, "Subscription failed to start: {}", message)
            },
            Self::KeepAliveTimeout(msg) => write!(f, "Keep-alive timeout: {}", msg),
            Self::Send(msg) => write!(f, "Send failed: {}", msg),
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::WebSocket(msg) => write!(f, "WebSocket error: {}", msg),
            Self::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Self::NonRetryable(inner) => write!(f, "{} (non-retryable)", inner),
        }
    }
}

impl std::error::Error for RealtimeError {}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RealtimeError::WebSocket("connection refused".to_string());
        assert_eq!(err.to_string(), "WebSocket error: connection refused");

        let err = RealtimeError::Handshake {
            message: "rejected".to_string(),
            error_type: Some("UnauthorizedException".to_string()),
            error_code: Some(401),
        };
        assert_eq!(
            err.to_string(),
            "Handshake failed: rejected (UnauthorizedException) [code 401]"
        );
    }

    #[test]
    fn test_non_retryable_marker() {
        let err = RealtimeError::Handshake {
            message: "rejected".to_string(),
            error_type: None,
            error_code: Some(401),
        };
        assert!(err.is_retryable());

        let err = err.non_retryable();
        assert!(!err.is_retryable());

        // Wrapping twice stays a single layer deep.
        let err = err.non_retryable();
        assert!(matches!(
            err.into_inner(),
            RealtimeError::Handshake { .. }
        ));
    }

    #[test]
    fn test_validation_is_never_retryable() {
        let err = RealtimeError::Validation("query is required".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_graphql_shaped_errors() {
        let err = RealtimeError::SubscriptionStart {
            message: "rejected".to_string(),
            errors: Some(serde_json::json!([{ "errorType": "Unauthorized" }])),
        };
        let shaped = err.to_graphql_errors();
        assert_eq!(shaped["errors"][0]["errorType"], "Unauthorized");

        let err = RealtimeError::Validation("query is required".to_string());
        let shaped = err.to_graphql_errors();
        assert!(shaped["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("query is required"));
    }
}
