//! Published connection-state lifecycle.
//!
//! A deterministic state machine maps low-level events (socket open/close,
//! keep-alive health, network reachability, intentional shutdown) to the
//! coarse [`ConnectionState`] that external observers see. The projection
//! is computed from four internal flags and emitted through a broadcast
//! channel whenever it changes, so every observer sees the identical
//! sequence.

use std::fmt;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel carrying state changes. Slow
/// observers that fall further behind than this lag and skip ahead.
const STATE_CHANNEL_CAPACITY: usize = 64;

/// The published connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket, by request
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Socket established and healthy
    Connected,
    /// Connected, but the keep-alive window was missed
    ConnectedPendingKeepAlive,
    /// Connected, but the network is reported offline
    ConnectedPendingNetwork,
    /// Connected, and an intentional shutdown has begun
    ConnectedPendingDisconnect,
    /// The socket was lost unexpectedly
    ConnectionDisrupted,
    /// The socket was lost and the network is offline
    ConnectionDisruptedPendingNetwork,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::ConnectedPendingKeepAlive => "ConnectedPendingKeepAlive",
            Self::ConnectedPendingNetwork => "ConnectedPendingNetwork",
            Self::ConnectedPendingDisconnect => "ConnectedPendingDisconnect",
            Self::ConnectionDisrupted => "ConnectionDisrupted",
            Self::ConnectionDisruptedPendingNetwork => "ConnectionDisruptedPendingNetwork",
        };
        write!(f, "{}", name)
    }
}

/// Input alphabet of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStateEvent {
    /// Handshake started
    OpeningConnection,
    /// Handshake completed
    ConnectionEstablished,
    /// Intentional shutdown started
    ClosingConnection,
    /// Socket is gone
    Closed,
    /// Handshake or socket failed
    ConnectionFailed,
    /// A keep-alive arrived
    KeepAlive,
    /// The keep-alive alert window elapsed
    KeepAliveMissed,
    /// Platform reports the network reachable
    Online,
    /// Platform reports the network unreachable
    Offline,
}

/// Socket axis of the internal flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketFlag {
    Disconnected,
    Connecting,
    Connected,
}

/// Internal flags; the published state is a pure projection of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flags {
    socket: SocketFlag,
    network_online: bool,
    keepalive_healthy: bool,
    intended_close: bool,
}

impl Flags {
    fn initial() -> Self {
        Self {
            socket: SocketFlag::Disconnected,
            network_online: true,
            keepalive_healthy: true,
            intended_close: true,
        }
    }

    /// Apply one event. Each event touches exactly one axis, except
    /// `OpeningConnection`, which also resets the health and intent flags
    /// for the new connection attempt.
    fn apply(&mut self, event: ConnectionStateEvent) {
        match event {
            ConnectionStateEvent::OpeningConnection => {
                self.socket = SocketFlag::Connecting;
                self.keepalive_healthy = true;
                self.intended_close = false;
            },
            ConnectionStateEvent::ConnectionEstablished => {
                self.socket = SocketFlag::Connected;
            },
            ConnectionStateEvent::ClosingConnection => {
                self.intended_close = true;
            },
            ConnectionStateEvent::Closed | ConnectionStateEvent::ConnectionFailed => {
                self.socket = SocketFlag::Disconnected;
            },
            ConnectionStateEvent::KeepAlive => {
                self.keepalive_healthy = true;
            },
            ConnectionStateEvent::KeepAliveMissed => {
                self.keepalive_healthy = false;
            },
            ConnectionStateEvent::Online => {
                self.network_online = true;
            },
            ConnectionStateEvent::Offline => {
                self.network_online = false;
            },
        }
    }

    /// Project the flags to the published state.
    ///
    /// Within the connected family the precedence is: intent to disconnect,
    /// then network reachability, then keep-alive health.
    fn project(&self) -> ConnectionState {
        match self.socket {
            SocketFlag::Connecting => ConnectionState::Connecting,
            SocketFlag::Connected => {
                if self.intended_close {
                    ConnectionState::ConnectedPendingDisconnect
                } else if !self.network_online {
                    ConnectionState::ConnectedPendingNetwork
                } else if !self.keepalive_healthy {
                    ConnectionState::ConnectedPendingKeepAlive
                } else {
                    ConnectionState::Connected
                }
            },
            SocketFlag::Disconnected => {
                if self.intended_close {
                    ConnectionState::Disconnected
                } else if !self.network_online {
                    ConnectionState::ConnectionDisruptedPendingNetwork
                } else {
                    ConnectionState::ConnectionDisrupted
                }
            },
        }
    }
}

struct MonitorInner {
    flags: Flags,
    current: ConnectionState,
}

/// Deterministic monitor publishing the connection-state lifecycle.
///
/// [`record`](ConnectionStateMonitor::record) applies an event and, when
/// the projection changes, broadcasts the new state. Duplicate projections
/// are suppressed. Observers subscribed at the same logical instant see
/// the identical sequence.
pub struct ConnectionStateMonitor {
    inner: Mutex<MonitorInner>,
    tx: broadcast::Sender<ConnectionState>,
}

impl Default for ConnectionStateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMonitor {
    /// Create a monitor in the `Disconnected` state.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let flags = Flags::initial();
        Self {
            inner: Mutex::new(MonitorInner {
                current: flags.project(),
                flags,
            }),
            tx,
        }
    }

    /// Apply an event; broadcasts the new state if the projection changed.
    pub(crate) fn record(&self, event: ConnectionStateEvent) {
        let mut inner = self.inner.lock().expect("state monitor lock poisoned");
        inner.flags.apply(event);
        let next = inner.flags.project();
        if next != inner.current {
            log::debug!(
                "[appsync-realtime] Connection state {} -> {} ({:?})",
                inner.current,
                next,
                event
            );
            inner.current = next;
            // Erroring means no receivers are listening, which is fine.
            let _ = self.tx.send(next);
        }
    }

    /// The most recently published state.
    pub fn current(&self) -> ConnectionState {
        self.inner.lock().expect("state monitor lock poisoned").current
    }

    /// Subscribe to subsequent state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}
