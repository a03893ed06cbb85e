//! The public realtime provider.
//!
//! Wires the connection actor, the connection-state monitor, the
//! reconnection monitor, and the event publisher together behind a small
//! surface: [`subscribe`](RealtimeProvider::subscribe),
//! [`close`](RealtimeProvider::close), and the published connection-state
//! stream.

use crate::{
    connection::SharedConnection,
    events::{EventPublisher, HubSink},
    models::{ConnectionOptions, SubscribeOptions},
    reconnect::{ReconnectEvent, ReconnectionMonitor},
    state::{ConnectionState, ConnectionStateEvent, ConnectionStateMonitor},
    subscription::Subscription,
    timeouts::RealtimeTimeouts,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Stable provider identifier used in event-bus payloads.
pub const PROVIDER_NAME: &str = "AWSAppSyncRealTimeProvider";

/// Network reachability events from a platform-provided source.
///
/// On platforms without such a source the provider assumes always-online
/// and relies solely on socket errors for disruption detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The network became reachable
    Online,
    /// The network became unreachable
    Offline,
}

/// Client-side realtime subscription provider for AppSync's
/// GraphQL-over-WebSocket protocol.
///
/// One provider owns at most one WebSocket; every subscription created
/// through [`subscribe`](Self::subscribe) is multiplexed over it.
///
/// # Examples
///
/// ```rust,no_run
/// use appsync_realtime::{AuthMode, RealtimeProvider, SubscribeOptions};
///
/// # async fn example() {
/// let provider = RealtimeProvider::builder().build();
///
/// let mut todos = provider.subscribe(
///     SubscribeOptions::new(
///         "https://abcdefghijklmnopqrstuvwxyz.appsync-api.us-east-1.amazonaws.com/graphql",
///         "subscription S { onCreateTodo { id name } }",
///     )
///     .with_auth_mode(AuthMode::ApiKey)
///     .with_api_key("da2-example"),
/// );
///
/// while let Some(event) = todos.next().await {
///     println!("{:?}", event);
/// }
/// provider.close().await;
/// # }
/// ```
pub struct RealtimeProvider {
    conn: SharedConnection,
    monitor: Arc<ConnectionStateMonitor>,
    reconnect: Arc<ReconnectionMonitor>,
    state_driver: JoinHandle<()>,
    state_driver_stop: Mutex<Option<oneshot::Sender<()>>>,
    network_driver: Option<JoinHandle<()>>,
    closed: AtomicBool,
}

impl RealtimeProvider {
    /// Create a builder with default configuration.
    pub fn builder() -> RealtimeProviderBuilder {
        RealtimeProviderBuilder::new()
    }

    /// The stable provider name reported on the event bus.
    pub fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    /// Create a cold subscription stream. No work happens until the stream
    /// is first polled; two identical calls produce independent ids and
    /// independent streams.
    pub fn subscribe(&self, options: SubscribeOptions) -> Subscription {
        Subscription::new(self.conn.cmd_tx(), self.reconnect.clone(), options)
    }

    /// The most recently published connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.current()
    }

    /// Subscribe to subsequent connection-state changes. All receivers see
    /// the identical sequence.
    pub fn connection_state_stream(&self) -> broadcast::Receiver<ConnectionState> {
        self.monitor.subscribe()
    }

    /// Shut the provider down: stop every subscription, close the socket
    /// with a normal close code, complete the reconnection monitor, and
    /// detach from the event bus. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("[appsync-realtime] Provider closing");
        self.reconnect.close();
        self.conn.shutdown().await;

        // Let the state driver publish the final transitions, then stop it.
        if let Some(stop_tx) = self
            .state_driver_stop
            .lock()
            .expect("state driver stop lock poisoned")
            .take()
        {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = &self.network_driver {
            handle.abort();
        }
    }
}

impl Drop for RealtimeProvider {
    fn drop(&mut self) {
        // SharedConnection's own drop sends the shutdown signal; here we
        // only stop the auxiliary tasks.
        self.reconnect.close();
        self.state_driver.abort();
        if let Some(handle) = &self.network_driver {
            handle.abort();
        }
    }
}

/// Builder for [`RealtimeProvider`].
pub struct RealtimeProviderBuilder {
    connection_options: ConnectionOptions,
    timeouts: RealtimeTimeouts,
    event_sink: Option<HubSink>,
    network_events: Option<mpsc::Receiver<NetworkEvent>>,
}

impl Default for RealtimeProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeProviderBuilder {
    fn new() -> Self {
        Self {
            connection_options: ConnectionOptions::default(),
            timeouts: RealtimeTimeouts::default(),
            event_sink: None,
            network_events: None,
        }
    }

    /// Set connection-level options (handshake retry, reconnect cadence).
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    /// Set the timeout configuration.
    pub fn timeouts(mut self, timeouts: RealtimeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Register the external event-bus sink.
    pub fn event_sink(mut self, sink: HubSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Attach a platform network-reachability event source.
    pub fn network_events(mut self, events: mpsc::Receiver<NetworkEvent>) -> Self {
        self.network_events = Some(events);
        self
    }

    /// Build the provider. The socket is opened lazily by the first
    /// subscription.
    pub fn build(self) -> RealtimeProvider {
        let monitor = Arc::new(ConnectionStateMonitor::new());
        let reconnect = Arc::new(ReconnectionMonitor::new(
            Duration::from_millis(self.connection_options.reconnect_delay_ms),
            Duration::from_millis(self.connection_options.reconnect_max_delay_ms),
        ));
        let publisher = match self.event_sink {
            Some(sink) => EventPublisher::with_sink(sink),
            None => EventPublisher::new(),
        };

        let conn = SharedConnection::spawn(
            monitor.clone(),
            publisher.clone(),
            self.connection_options,
            self.timeouts,
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let state_driver = tokio::spawn(drive_state(
            monitor.subscribe(),
            publisher,
            reconnect.clone(),
            stop_rx,
        ));

        let network_driver = self.network_events.map(|events| {
            let monitor = monitor.clone();
            tokio::spawn(drive_network(events, monitor))
        });

        RealtimeProvider {
            conn,
            monitor,
            reconnect,
            state_driver,
            state_driver_stop: Mutex::new(Some(stop_tx)),
            network_driver,
            closed: AtomicBool::new(false),
        }
    }
}

/// Forward published states to the event bus and drive the reconnection
/// monitor's start/halt control.
async fn drive_state(
    mut rx: broadcast::Receiver<ConnectionState>,
    publisher: EventPublisher,
    reconnect: Arc<ReconnectionMonitor>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            state = rx.recv() => match state {
                Ok(state) => handle_state(state, &publisher, &reconnect),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "[appsync-realtime] State observer lagged, skipped {} updates",
                        skipped
                    );
                },
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut stop_rx => {
                // Drain whatever the shutdown already published, then exit.
                while let Ok(state) = rx.try_recv() {
                    handle_state(state, &publisher, &reconnect);
                }
                return;
            },
        }
    }
}

fn handle_state(
    state: ConnectionState,
    publisher: &EventPublisher,
    reconnect: &ReconnectionMonitor,
) {
    publisher.emit_connection_state_change(PROVIDER_NAME, state);
    match state {
        ConnectionState::ConnectionDisrupted => {
            reconnect.record(ReconnectEvent::StartReconnect);
        },
        ConnectionState::Connecting => {},
        ConnectionState::Connected
        | ConnectionState::ConnectedPendingDisconnect
        | ConnectionState::ConnectedPendingKeepAlive
        | ConnectionState::ConnectedPendingNetwork
        | ConnectionState::ConnectionDisruptedPendingNetwork
        | ConnectionState::Disconnected => {
            reconnect.record(ReconnectEvent::HaltReconnect);
        },
    }
}

/// Forward platform reachability events into the state monitor.
async fn drive_network(
    mut events: mpsc::Receiver<NetworkEvent>,
    monitor: Arc<ConnectionStateMonitor>,
) {
    while let Some(event) = events.recv().await {
        monitor.record(match event {
            NetworkEvent::Online => ConnectionStateEvent::Online,
            NetworkEvent::Offline => ConnectionStateEvent::Offline,
        });
    }
}
