use serde::{Deserialize, Serialize};

/// Connection-level options for the shared WebSocket.
///
/// These control handshake retry behavior and the reconnection cadence.
/// Separate from [`SubscribeOptions`](super::SubscribeOptions), which
/// configure individual subscriptions.
///
/// # Example
///
/// ```rust
/// use appsync_realtime::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_max_handshake_attempts(8)
///     .with_non_retryable_codes(vec![401, 403]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Initial delay in milliseconds between handshake retry attempts.
    /// Uses exponential backoff up to `handshake_retry_max_delay_ms`.
    /// Default: 100ms
    #[serde(default = "default_handshake_retry_base_ms")]
    pub handshake_retry_base_ms: u64,

    /// Maximum delay between handshake retry attempts.
    /// Default: 5000ms (5 seconds)
    #[serde(default = "default_handshake_retry_max_delay_ms")]
    pub handshake_retry_max_delay_ms: u64,

    /// Maximum number of handshake attempts before giving up.
    /// Default: 5
    #[serde(default = "default_max_handshake_attempts")]
    pub max_handshake_attempts: u32,

    /// Handshake `connection_error` codes for which retry is abandoned
    /// immediately (authorization-class failures).
    /// Default: [400, 401, 403]
    #[serde(default = "default_non_retryable_codes")]
    pub non_retryable_codes: Vec<u16>,

    /// Initial delay in milliseconds between reconnection notifications
    /// after a disrupted connection. Uses exponential backoff up to
    /// `reconnect_max_delay_ms`.
    /// Default: 1000ms (1 second)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum delay between reconnection notifications.
    /// Default: 30000ms (30 seconds)
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_handshake_retry_base_ms() -> u64 {
    100
}

fn default_handshake_retry_max_delay_ms() -> u64 {
    5000
}

fn default_max_handshake_attempts() -> u32 {
    5
}

fn default_non_retryable_codes() -> Vec<u16> {
    vec![400, 401, 403]
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30000
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            handshake_retry_base_ms: default_handshake_retry_base_ms(),
            handshake_retry_max_delay_ms: default_handshake_retry_max_delay_ms(),
            max_handshake_attempts: default_max_handshake_attempts(),
            non_retryable_codes: default_non_retryable_codes(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial handshake retry delay (in milliseconds).
    pub fn with_handshake_retry_base_ms(mut self, delay_ms: u64) -> Self {
        self.handshake_retry_base_ms = delay_ms;
        self
    }

    /// Set the maximum handshake retry delay (in milliseconds).
    pub fn with_handshake_retry_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.handshake_retry_max_delay_ms = max_delay_ms;
        self
    }

    /// Set the maximum number of handshake attempts.
    pub fn with_max_handshake_attempts(mut self, attempts: u32) -> Self {
        self.max_handshake_attempts = attempts;
        self
    }

    /// Set the non-retryable handshake error codes.
    pub fn with_non_retryable_codes(mut self, codes: Vec<u16>) -> Self {
        self.non_retryable_codes = codes;
        self
    }

    /// Set the initial reconnection notification delay (in milliseconds).
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the maximum reconnection notification delay (in milliseconds).
    pub fn with_reconnect_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.reconnect_max_delay_ms = max_delay_ms;
        self
    }
}
