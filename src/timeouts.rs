//! Timeout configuration for realtime client operations.
//!
//! Centralizes every timer the provider arms: TCP/TLS connect, the
//! `connection_ack` wait, per-subscription start-ack deadlines, keep-alive
//! supervision, and the idle grace before an unused socket is closed.

use std::time::Duration;

/// Timeout configuration for the realtime provider.
///
/// All values have sensible defaults matching the AppSync service contract;
/// the keep-alive window is additionally overridden at runtime by the
/// `connectionTimeoutMs` the service returns in its `connection_ack`.
///
/// # Examples
///
/// ```rust
/// use appsync_realtime::RealtimeTimeouts;
/// use std::time::Duration;
///
/// // Defaults (recommended)
/// let timeouts = RealtimeTimeouts::default();
///
/// // Custom start-ack deadline
/// let timeouts = RealtimeTimeouts::builder()
///     .start_ack_timeout(Duration::from_secs(30))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct RealtimeTimeouts {
    /// Timeout for establishing the WebSocket (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Timeout for receiving `connection_ack` after `connection_init`.
    /// Default: 15 seconds
    pub connection_init_timeout: Duration,

    /// Timeout for receiving `start_ack` after a `start` frame.
    /// Default: 15 seconds
    pub start_ack_timeout: Duration,

    /// Hard keep-alive window: if no `ka` arrives within it, the socket is
    /// considered dead and torn down. Overridden by the service's
    /// `connectionTimeoutMs` once the handshake completes.
    /// Default: 5 minutes
    pub keep_alive_timeout: Duration,

    /// Soft keep-alive alert: if no `ka` arrives within it, a
    /// keep-alive-missed state is published without closing the socket.
    /// Default: 65 seconds
    pub keep_alive_alert_timeout: Duration,

    /// Grace period after the last subscription is removed before the idle
    /// socket is closed. New subscriptions arriving inside the window keep
    /// the socket alive.
    /// Default: 1 second
    pub idle_close_grace: Duration,
}

impl Default for RealtimeTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            connection_init_timeout: Duration::from_secs(15),
            start_ack_timeout: Duration::from_secs(15),
            keep_alive_timeout: Duration::from_secs(5 * 60),
            keep_alive_alert_timeout: Duration::from_secs(65),
            idle_close_grace: Duration::from_secs(1),
        }
    }
}

impl RealtimeTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> RealtimeTimeoutsBuilder {
        RealtimeTimeoutsBuilder::new()
    }

    /// Timeouts suitable for tests against a local endpoint.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            connection_init_timeout: Duration::from_secs(2),
            start_ack_timeout: Duration::from_secs(2),
            keep_alive_timeout: Duration::from_secs(30),
            keep_alive_alert_timeout: Duration::from_secs(10),
            idle_close_grace: Duration::from_millis(100),
        }
    }
}

/// Builder for [`RealtimeTimeouts`].
#[derive(Debug, Clone)]
pub struct RealtimeTimeoutsBuilder {
    timeouts: RealtimeTimeouts,
}

impl RealtimeTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: RealtimeTimeouts::default(),
        }
    }

    /// Set the WebSocket connect timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the `connection_ack` wait timeout.
    pub fn connection_init_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_init_timeout = timeout;
        self
    }

    /// Set the `start_ack` wait timeout.
    pub fn start_ack_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.start_ack_timeout = timeout;
        self
    }

    /// Set the hard keep-alive window (pre-handshake default).
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.keep_alive_timeout = timeout;
        self
    }

    /// Set the soft keep-alive alert window.
    pub fn keep_alive_alert_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.keep_alive_alert_timeout = timeout;
        self
    }

    /// Set the idle grace before closing an unused socket.
    pub fn idle_close_grace(mut self, grace: Duration) -> Self {
        self.timeouts.idle_close_grace = grace;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> RealtimeTimeouts {
        self.timeouts
    }
}
