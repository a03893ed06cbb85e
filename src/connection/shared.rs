//! Shared WebSocket connection actor.
//!
//! A single background task owns the socket, the subscription table, and
//! every provider timer. Handles:
//!
//! - One connection for all subscriptions (no per-subscription sockets)
//! - Lazy, single-flight handshake with bounded jittered retry
//! - Demultiplexing inbound frames to subscriptions by id
//! - Start-ack, keep-alive (hard and soft), and idle-close deadlines
//! - Teardown that never writes to an unready socket
//!
//! All mutation of the table and socket status happens on this task; the
//! public API communicates exclusively through the command mailbox, so
//! subscribe/teardown races are serialized rather than locked away.

use crate::{
    auth,
    connection::{
        websocket::{self, WsStream},
        COMMAND_CHANNEL_CAPACITY, MAX_WS_TEXT_MESSAGE_BYTES,
    },
    error::{RealtimeError, Result},
    events::EventPublisher,
    models::{ClientMessage, ConnectionOptions, ServerMessage, StartExtensions, StartPayload,
        SubscribeOptions},
    retry::retry_with_backoff,
    state::{ConnectionStateEvent, ConnectionStateMonitor},
    timeouts::RealtimeTimeouts,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::{
    frame::coding::CloseCode, frame::CloseFrame, Message,
};
use futures_util::{SinkExt, StreamExt};

/// Sleep horizon standing in for "timer disarmed".
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background connection task.
pub(crate) enum ConnCmd {
    /// Register a new subscription and start it.
    Subscribe {
        id: String,
        options: Box<SubscribeOptions>,
        event_tx: mpsc::Sender<Result<JsonValue>>,
        result_tx: oneshot::Sender<Result<()>>,
    },
    /// Re-issue the start action for an existing entry (reconnection).
    Restart { id: String },
    /// Tear down a subscription. Safe for unknown ids.
    Unsubscribe {
        id: String,
        done_tx: Option<oneshot::Sender<()>>,
    },
    /// Stop all subscriptions and close the socket.
    Shutdown {
        done_tx: Option<oneshot::Sender<()>>,
    },
}

// ── Per-subscription state ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubState {
    /// Start sent (or queued), ack not yet received
    Pending,
    /// Start acknowledged; data may flow
    Connected,
}

/// Internal state for each active subscription.
struct SubEntry {
    options: SubscribeOptions,
    event_tx: mpsc::Sender<Result<JsonValue>>,
    state: SubState,
    /// Armed while a start is awaiting its ack; cleared on ack, failure,
    /// and socket loss.
    start_ack_deadline: Option<Instant>,
    /// Teardown arrived while the start ack was still in flight. The
    /// entry stays in the table until the ack, error, or timeout resolves
    /// it: a stop frame is written when it resolved to connected, and the
    /// removal happens only then.
    pending_unsubscribe: bool,
    /// Resolves the caller's teardown wait once the deferred removal runs.
    teardown_done: Option<oneshot::Sender<()>>,
}

/// Socket status owned by the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketStatus {
    Closed,
    Connecting,
    Ready,
}

// ── SharedConnection (crate-internal handle) ────────────────────────────────

/// Handle to the background connection task.
pub(crate) struct SharedConnection {
    cmd_tx: mpsc::Sender<ConnCmd>,
    _task: JoinHandle<()>,
}

impl SharedConnection {
    /// Spawn the connection actor. No socket is opened until the first
    /// subscription asks for one.
    pub(crate) fn spawn(
        monitor: Arc<ConnectionStateMonitor>,
        publisher: EventPublisher,
        options: ConnectionOptions,
        timeouts: RealtimeTimeouts,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let task = tokio::spawn(connection_task(
            cmd_rx, monitor, publisher, options, timeouts,
        ));
        Self {
            cmd_tx,
            _task: task,
        }
    }

    /// Clone the command sender for subscription surfaces.
    pub(crate) fn cmd_tx(&self) -> mpsc::Sender<ConnCmd> {
        self.cmd_tx.clone()
    }

    /// Gracefully stop all subscriptions and close the socket.
    pub(crate) async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ConnCmd::Shutdown {
                done_tx: Some(done_tx),
            })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}

impl Drop for SharedConnection {
    fn drop(&mut self) {
        // Best-effort shutdown signal.
        let _ = self.cmd_tx.try_send(ConnCmd::Shutdown { done_tx: None });
    }
}

// ── Handshake ───────────────────────────────────────────────────────────────

/// One handshake attempt: headers, URL derivation, socket open,
/// `connection_init`, `connection_ack`.
async fn handshake_once(
    auth_options: &SubscribeOptions,
    conn_options: &ConnectionOptions,
    timeouts: &RealtimeTimeouts,
) -> Result<(WsStream, Option<u64>)> {
    let headers = auth::build_headers(auth_options, "/connect", "{}", "", false).await?;
    let realtime = websocket::realtime_endpoint(&auth_options.endpoint)?;
    let url = websocket::handshake_url(&realtime, &headers)?;

    log::debug!("[appsync-realtime] Opening realtime socket to {}", realtime);
    let mut ws = websocket::connect(&url, timeouts.connection_timeout).await?;
    let timeout_ms = websocket::init_and_await_ack(
        &mut ws,
        timeouts.connection_init_timeout,
        &conn_options.non_retryable_codes,
    )
    .await?;
    Ok((ws, timeout_ms))
}

/// Establish the socket, retrying with jittered exponential backoff.
/// Non-retryable handshake errors abort immediately.
async fn establish_socket(
    auth_options: &SubscribeOptions,
    conn_options: &ConnectionOptions,
    timeouts: &RealtimeTimeouts,
    monitor: &ConnectionStateMonitor,
) -> Result<(WsStream, Option<u64>)> {
    retry_with_backoff(
        || async {
            monitor.record(ConnectionStateEvent::OpeningConnection);
            match handshake_once(auth_options, conn_options, timeouts).await {
                Ok(ok) => Ok(ok),
                Err(err) => {
                    monitor.record(ConnectionStateEvent::ConnectionFailed);
                    Err(err)
                },
            }
        },
        Duration::from_millis(conn_options.handshake_retry_base_ms),
        Duration::from_millis(conn_options.handshake_retry_max_delay_ms),
        conn_options.max_handshake_attempts,
    )
    .await
}

// ── Start / stop frames ─────────────────────────────────────────────────────

/// Build headers and write the `start` frame for `id`. The ack deadline is
/// armed before the frame is written.
async fn send_start(
    ws: &mut WsStream,
    id: &str,
    entry: &mut SubEntry,
    timeouts: &RealtimeTimeouts,
) -> Result<()> {
    let payload = entry.options.operation_payload();
    let headers =
        auth::build_headers(&entry.options, "", &payload, &entry.options.query, true).await?;

    let frame = ClientMessage::Start {
        id: id.to_string(),
        payload: StartPayload {
            data: payload,
            extensions: StartExtensions {
                authorization: headers,
            },
        },
    };

    entry.state = SubState::Pending;
    entry.start_ack_deadline = Some(Instant::now() + timeouts.start_ack_timeout);
    websocket::send_message(ws, &frame).await
}

/// Best-effort `stop` frame; only written when the socket is ready. A stop
/// that cannot be sent is harmless because the service drops the session
/// on socket close.
async fn send_stop(ws: &mut WsStream, id: &str) {
    if let Err(e) = websocket::send_message(
        ws,
        &ClientMessage::Stop { id: id.to_string() },
    )
    .await
    {
        log::debug!("[appsync-realtime] Dropping stop for {}: {}", id, e);
    }
}

/// Deliver a terminal error to a subscription stream.
async fn fail_entry(entry: SubEntry, err: RealtimeError) {
    // Dropping the sender afterwards ends the stream.
    let _ = entry.event_tx.send(Err(err)).await;
}

// ── Background connection task ──────────────────────────────────────────────

/// The actor owning the socket and the subscription table.
async fn connection_task(
    mut cmd_rx: mpsc::Receiver<ConnCmd>,
    monitor: Arc<ConnectionStateMonitor>,
    publisher: EventPublisher,
    options: ConnectionOptions,
    timeouts: RealtimeTimeouts,
) {
    let mut subs: HashMap<String, SubEntry> = HashMap::new();
    let mut ws_stream: Option<WsStream> = None;
    let mut status = SocketStatus::Closed;

    // Keep-alive supervision. The hard window defaults from configuration
    // and is replaced by the service's connectionTimeoutMs on ack.
    let mut ka_window = timeouts.keep_alive_timeout;
    let mut ka_hard_deadline = Instant::now() + FAR_FUTURE;
    let mut ka_alert_deadline = Instant::now() + FAR_FUTURE;
    let mut ka_alert_armed = false;

    // Armed when the table empties; disarmed when it repopulates.
    let mut idle_deadline: Option<Instant> = None;

    loop {
        if let Some(ref mut ws) = ws_stream {
            let start_ack_due = subs.values().filter_map(|e| e.start_ack_deadline).min();

            let start_ack_sleep = tokio::time::sleep_until(
                start_ack_due.unwrap_or_else(|| Instant::now() + FAR_FUTURE),
            );
            tokio::pin!(start_ack_sleep);

            let ka_hard_sleep = tokio::time::sleep_until(ka_hard_deadline);
            tokio::pin!(ka_hard_sleep);

            let ka_alert_sleep = tokio::time::sleep_until(ka_alert_deadline);
            tokio::pin!(ka_alert_sleep);

            let idle_sleep = tokio::time::sleep_until(
                idle_deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE),
            );
            tokio::pin!(idle_sleep);

            tokio::select! {
                biased;

                // Commands from the public API.
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCmd::Subscribe { id, options: sub_options, event_tx, result_tx }) => {
                            let mut entry = SubEntry {
                                options: *sub_options,
                                event_tx,
                                state: SubState::Pending,
                                start_ack_deadline: None,
                                pending_unsubscribe: false,
                                teardown_done: None,
                            };
                            idle_deadline = None;
                            let _ = result_tx.send(Ok(()));
                            match send_start(ws, &id, &mut entry, &timeouts).await {
                                Ok(()) => { subs.insert(id, entry); },
                                Err(err @ RealtimeError::Authentication(_))
                                | Err(err @ RealtimeError::Validation(_)) => {
                                    fail_entry(entry, err).await;
                                },
                                Err(err) => {
                                    // Transport failure: keep the entry, drop the
                                    // socket, and let reconnection restart it.
                                    log::warn!("[appsync-realtime] Start for {} failed: {}", id, err);
                                    subs.insert(id, entry);
                                    socket_loss(&mut ws_stream, &mut status, &mut subs, &monitor,
                                        &mut ka_hard_deadline, &mut ka_alert_deadline, &mut ka_alert_armed,
                                        ConnectionStateEvent::ConnectionFailed).await;
                                    continue;
                                },
                            }
                        },
                        Some(ConnCmd::Restart { id }) => {
                            if let Some(entry) = subs.get_mut(&id) {
                                let in_flight = entry.state == SubState::Pending
                                    && entry.start_ack_deadline.is_some();
                                if entry.state == SubState::Connected
                                    || in_flight
                                    || entry.pending_unsubscribe
                                {
                                    // Already connected, a start is awaiting
                                    // its ack, or the entry is tearing down;
                                    // nothing to re-issue.
                                } else if let Err(err) = send_start(ws, &id, entry, &timeouts).await {
                                    match err {
                                        RealtimeError::Authentication(_) | RealtimeError::Validation(_) => {
                                            if let Some(entry) = subs.remove(&id) {
                                                fail_entry(entry, err).await;
                                            }
                                            if subs.is_empty() {
                                                idle_deadline = Some(Instant::now() + timeouts.idle_close_grace);
                                            }
                                        },
                                        err => {
                                            log::warn!("[appsync-realtime] Restart for {} failed: {}", id, err);
                                            socket_loss(&mut ws_stream, &mut status, &mut subs, &monitor,
                                                &mut ka_hard_deadline, &mut ka_alert_deadline, &mut ka_alert_armed,
                                                ConnectionStateEvent::ConnectionFailed).await;
                                            continue;
                                        },
                                    }
                                }
                            }
                        },
                        Some(ConnCmd::Unsubscribe { id, mut done_tx }) => {
                            let mut deferred = false;
                            if let Some(entry) = subs.get_mut(&id) {
                                if entry.state == SubState::Pending
                                    && entry.start_ack_deadline.is_some()
                                {
                                    // The start ack is still in flight. Keep
                                    // the entry and let the ack, error, or
                                    // timeout finish the teardown, so the
                                    // stop frame is written if the server
                                    // did register the subscription.
                                    entry.pending_unsubscribe = true;
                                    entry.teardown_done = done_tx.take();
                                    deferred = true;
                                }
                            }
                            if !deferred {
                                if let Some(entry) = subs.remove(&id) {
                                    if entry.state == SubState::Connected
                                        && status == SocketStatus::Ready
                                    {
                                        send_stop(ws, &id).await;
                                    }
                                }
                                if subs.is_empty() {
                                    idle_deadline = Some(Instant::now() + timeouts.idle_close_grace);
                                }
                                if let Some(done_tx) = done_tx {
                                    let _ = done_tx.send(());
                                }
                            }
                        },
                        Some(ConnCmd::Shutdown { done_tx }) => {
                            shutdown_socket(&mut ws_stream, &mut status, &mut subs, &monitor).await;
                            if let Some(done_tx) = done_tx {
                                let _ = done_tx.send(());
                            }
                            return;
                        },
                        None => {
                            shutdown_socket(&mut ws_stream, &mut status, &mut subs, &monitor).await;
                            return;
                        },
                    }
                }

                // Hard keep-alive window elapsed: the connection is dead.
                _ = &mut ka_hard_sleep => {
                    let err = RealtimeError::KeepAliveTimeout(format!(
                        "no keep-alive within {:?}", ka_window,
                    ));
                    log::warn!("[appsync-realtime] {}, closing socket", err);
                    let _ = ws.close(None).await;
                    socket_loss(&mut ws_stream, &mut status, &mut subs, &monitor,
                        &mut ka_hard_deadline, &mut ka_alert_deadline, &mut ka_alert_armed,
                        ConnectionStateEvent::Closed).await;
                    continue;
                }

                // Soft keep-alive alert: publish only, never close.
                _ = &mut ka_alert_sleep, if ka_alert_armed => {
                    ka_alert_armed = false;
                    monitor.record(ConnectionStateEvent::KeepAliveMissed);
                }

                // A start went unacknowledged.
                _ = &mut start_ack_sleep, if start_ack_due.is_some() => {
                    let now = Instant::now();
                    let expired: Vec<String> = subs
                        .iter()
                        .filter(|(_, e)| e.start_ack_deadline.map_or(false, |d| d <= now))
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in expired {
                        if let Some(mut entry) = subs.remove(&id) {
                            if entry.pending_unsubscribe {
                                // The entry never got registered server-side,
                                // so its deferred teardown needs no stop.
                                log::debug!(
                                    "[appsync-realtime] Start ack timeout for {} resolves its teardown",
                                    id
                                );
                                if let Some(done_tx) = entry.teardown_done.take() {
                                    let _ = done_tx.send(());
                                }
                            } else {
                                log::warn!("[appsync-realtime] Start ack timeout for {}", id);
                                fail_entry(entry, RealtimeError::SubscriptionStart {
                                    message: format!(
                                        "No start_ack within {:?}",
                                        timeouts.start_ack_timeout
                                    ),
                                    errors: None,
                                }).await;
                            }
                        }
                    }
                    if subs.is_empty() {
                        idle_deadline = Some(Instant::now() + timeouts.idle_close_grace);
                    }
                }

                // No subscriptions remained through the grace period.
                _ = &mut idle_sleep, if idle_deadline.is_some() => {
                    idle_deadline = None;
                    // Re-check against the live table; a subscription may have
                    // arrived while the timer was pending.
                    if subs.is_empty() {
                        log::debug!("[appsync-realtime] Closing idle socket");
                        shutdown_socket(&mut ws_stream, &mut status, &mut subs, &monitor).await;
                        continue;
                    }
                }

                // Inbound frames.
                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > MAX_WS_TEXT_MESSAGE_BYTES {
                                log::warn!(
                                    "[appsync-realtime] Dropping oversized frame ({} bytes)",
                                    text.len()
                                );
                                continue;
                            }
                            match websocket::parse_message(text.as_str()) {
                                Ok(Some(message)) => {
                                    handle_server_message(
                                        message, ws, &mut subs, &monitor, &publisher,
                                        ka_window, &mut ka_hard_deadline,
                                        &mut ka_alert_deadline, &mut ka_alert_armed,
                                        &timeouts, &mut idle_deadline,
                                    ).await;
                                },
                                Ok(None) => {},
                                Err(e) => {
                                    log::warn!("[appsync-realtime] Bad frame: {}", e);
                                },
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            socket_loss(&mut ws_stream, &mut status, &mut subs, &monitor,
                                &mut ka_hard_deadline, &mut ka_alert_deadline, &mut ka_alert_armed,
                                ConnectionStateEvent::Closed).await;
                            continue;
                        },
                        Some(Ok(_)) => {
                            // Binary/ping/pong frames are not part of the
                            // protocol; the transport answers pings itself.
                        },
                        Some(Err(e)) => {
                            log::warn!("[appsync-realtime] Socket error: {}", e);
                            socket_loss(&mut ws_stream, &mut status, &mut subs, &monitor,
                                &mut ka_hard_deadline, &mut ka_alert_deadline, &mut ka_alert_armed,
                                ConnectionStateEvent::ConnectionFailed).await;
                            continue;
                        },
                    }
                }
            }
        } else {
            // ── No socket: wait for work ────────────────────────────────────
            match cmd_rx.recv().await {
                Some(ConnCmd::Subscribe { id, options: sub_options, event_tx, result_tx }) => {
                    let entry = SubEntry {
                        options: *sub_options,
                        event_tx,
                        state: SubState::Pending,
                        start_ack_deadline: None,
                        pending_unsubscribe: false,
                        teardown_done: None,
                    };
                    idle_deadline = None;
                    subs.insert(id.clone(), entry);
                    let _ = result_tx.send(Ok(()));
                    connect_and_start(
                        &id, true, &mut ws_stream, &mut status, &mut subs, &monitor,
                        &options, &timeouts, &mut ka_window,
                        &mut ka_hard_deadline, &mut ka_alert_deadline, &mut ka_alert_armed,
                    ).await;
                },
                Some(ConnCmd::Restart { id }) => {
                    if subs.contains_key(&id) {
                        connect_and_start(
                            &id, false, &mut ws_stream, &mut status, &mut subs, &monitor,
                            &options, &timeouts, &mut ka_window,
                            &mut ka_hard_deadline, &mut ka_alert_deadline, &mut ka_alert_armed,
                        ).await;
                    }
                },
                Some(ConnCmd::Unsubscribe { id, done_tx }) => {
                    // No socket, so no stop frame; the server session is
                    // already gone.
                    if let Some(mut entry) = subs.remove(&id) {
                        if let Some(done_tx) = entry.teardown_done.take() {
                            let _ = done_tx.send(());
                        }
                    }
                    if let Some(done_tx) = done_tx {
                        let _ = done_tx.send(());
                    }
                },
                Some(ConnCmd::Shutdown { done_tx }) => {
                    shutdown_socket(&mut ws_stream, &mut status, &mut subs, &monitor).await;
                    if let Some(done_tx) = done_tx {
                        let _ = done_tx.send(());
                    }
                    return;
                },
                None => {
                    shutdown_socket(&mut ws_stream, &mut status, &mut subs, &monitor).await;
                    return;
                },
            }
        }
    }
}

/// Establish the socket if needed, then (re-)issue the start for `id`.
///
/// `fail_waiters_on_error` distinguishes the two callers: a fresh
/// subscribe rejects every queued waiter when the handshake budget is
/// exhausted, while a reconnection restart keeps the entries pending so
/// the next reconnection notification can try again.
#[allow(clippy::too_many_arguments)]
async fn connect_and_start(
    id: &str,
    fail_waiters_on_error: bool,
    ws_stream: &mut Option<WsStream>,
    status: &mut SocketStatus,
    subs: &mut HashMap<String, SubEntry>,
    monitor: &ConnectionStateMonitor,
    options: &ConnectionOptions,
    timeouts: &RealtimeTimeouts,
    ka_window: &mut Duration,
    ka_hard_deadline: &mut Instant,
    ka_alert_deadline: &mut Instant,
    ka_alert_armed: &mut bool,
) {
    if ws_stream.is_none() {
        let auth_options = match subs.get(id) {
            Some(entry) => entry.options.clone(),
            None => return,
        };
        *status = SocketStatus::Connecting;
        match establish_socket(&auth_options, options, timeouts, monitor).await {
            Ok((ws, timeout_ms)) => {
                if let Some(ms) = timeout_ms {
                    *ka_window = Duration::from_millis(ms);
                }
                *ka_hard_deadline = Instant::now() + *ka_window;
                *ka_alert_deadline = Instant::now() + timeouts.keep_alive_alert_timeout;
                *ka_alert_armed = true;
                *ws_stream = Some(ws);
                *status = SocketStatus::Ready;
                monitor.record(ConnectionStateEvent::ConnectionEstablished);
                log::info!("[appsync-realtime] Realtime socket established");
            },
            Err(err) => {
                *status = SocketStatus::Closed;
                let definitive = fail_waiters_on_error || !err.is_retryable();
                let err = err.into_inner();
                log::warn!("[appsync-realtime] Handshake failed: {}", err);
                if definitive {
                    // Reject every queued waiter with the same failure.
                    let failed: Vec<String> = subs.keys().cloned().collect();
                    for failed_id in failed {
                        if let Some(entry) = subs.remove(&failed_id) {
                            fail_entry(
                                entry,
                                RealtimeError::SubscriptionStart {
                                    message: err.to_string(),
                                    errors: None,
                                },
                            )
                            .await;
                        }
                    }
                }
                return;
            },
        }
    }

    if let (Some(ws), Some(entry)) = (ws_stream.as_mut(), subs.get_mut(id)) {
        let in_flight =
            entry.state == SubState::Pending && entry.start_ack_deadline.is_some();
        if entry.state == SubState::Connected || in_flight || entry.pending_unsubscribe {
            return;
        }
        match send_start(ws, id, entry, timeouts).await {
            Ok(()) => {},
            Err(err @ RealtimeError::Authentication(_))
            | Err(err @ RealtimeError::Validation(_)) => {
                if let Some(entry) = subs.remove(id) {
                    fail_entry(entry, err).await;
                }
            },
            Err(err) => {
                log::warn!("[appsync-realtime] Start for {} failed: {}", id, err);
                socket_loss(
                    ws_stream, status, subs, monitor,
                    ka_hard_deadline, ka_alert_deadline, ka_alert_armed,
                    ConnectionStateEvent::ConnectionFailed,
                )
                .await;
            },
        }
    }
}

/// Dispatch one parsed server frame.
#[allow(clippy::too_many_arguments)]
async fn handle_server_message(
    message: ServerMessage,
    ws: &mut WsStream,
    subs: &mut HashMap<String, SubEntry>,
    monitor: &ConnectionStateMonitor,
    publisher: &EventPublisher,
    ka_window: Duration,
    ka_hard_deadline: &mut Instant,
    ka_alert_deadline: &mut Instant,
    ka_alert_armed: &mut bool,
    timeouts: &RealtimeTimeouts,
    idle_deadline: &mut Option<Instant>,
) {
    match message {
        ServerMessage::Ka => {
            *ka_hard_deadline = Instant::now() + ka_window;
            *ka_alert_deadline = Instant::now() + timeouts.keep_alive_alert_timeout;
            *ka_alert_armed = true;
            monitor.record(ConnectionStateEvent::KeepAlive);
        },
        ServerMessage::StartAck { id } => {
            let resolved = match subs.get_mut(&id) {
                Some(entry) if entry.state == SubState::Pending => {
                    entry.state = SubState::Connected;
                    entry.start_ack_deadline = None;
                    Some(entry.pending_unsubscribe)
                },
                // A late ack after a timeout or teardown has no entry (or a
                // connected one) to act on.
                _ => None,
            };
            match resolved {
                Some(true) => {
                    // The entry reached connected with a teardown queued
                    // behind it: write the stop now and finish the removal.
                    if let Some(mut entry) = subs.remove(&id) {
                        send_stop(ws, &id).await;
                        if let Some(done_tx) = entry.teardown_done.take() {
                            let _ = done_tx.send(());
                        }
                    }
                    if subs.is_empty() {
                        *idle_deadline = Some(Instant::now() + timeouts.idle_close_grace);
                    }
                },
                Some(false) => {
                    if let Some(entry) = subs.get(&id) {
                        publisher.emit_subscription_ack(
                            &entry.options.query,
                            &JsonValue::Object(entry.options.variables.clone()),
                        );
                    }
                    log::debug!("[appsync-realtime] Subscription {} acknowledged", id);
                },
                None => log::debug!("[appsync-realtime] Ignoring stray start_ack for {}", id),
            }
        },
        ServerMessage::Data { id, payload } => {
            match subs.get(&id) {
                Some(entry) if entry.pending_unsubscribe => {
                    log::debug!("[appsync-realtime] Dropping data for tearing-down id {}", id);
                },
                Some(entry) => {
                    if entry.event_tx.send(Ok(payload)).await.is_err() {
                        log::debug!("[appsync-realtime] Subscription {} receiver dropped", id);
                    }
                },
                None => {
                    log::debug!("[appsync-realtime] Dropping data for unknown id {}", id);
                },
            }
        },
        ServerMessage::Error { id, payload } => {
            match id {
                Some(id) => {
                    if let Some(mut entry) = subs.remove(&id) {
                        if let Some(done_tx) = entry.teardown_done.take() {
                            let _ = done_tx.send(());
                        }
                        if !entry.pending_unsubscribe {
                            fail_entry(
                                entry,
                                RealtimeError::SubscriptionStart {
                                    message: format!("Subscription {} rejected", id),
                                    errors: Some(payload),
                                },
                            )
                            .await;
                        }
                    }
                    if subs.is_empty() {
                        *idle_deadline = Some(Instant::now() + timeouts.idle_close_grace);
                    }
                },
                None => {
                    log::warn!("[appsync-realtime] Connection-scoped error: {}", payload);
                },
            }
        },
        ServerMessage::Complete { id } => {
            // End-of-stream: removing the entry drops its sender.
            if let Some(mut entry) = subs.remove(&id) {
                if let Some(done_tx) = entry.teardown_done.take() {
                    let _ = done_tx.send(());
                }
                log::debug!("[appsync-realtime] Subscription {} completed by server", id);
            }
            if subs.is_empty() {
                *idle_deadline = Some(Instant::now() + timeouts.idle_close_grace);
            }
        },
        ServerMessage::ConnectionAck { .. } | ServerMessage::ConnectionError { .. } => {
            // Handshake frames after the handshake are out of protocol.
            log::debug!("[appsync-realtime] Ignoring handshake frame after handshake");
        },
    }
}

/// React to an unexpected socket loss: drop the stream, disarm keep-alive,
/// and reset every entry to a fresh pending state so reconnection can
/// re-issue its start.
#[allow(clippy::too_many_arguments)]
async fn socket_loss(
    ws_stream: &mut Option<WsStream>,
    status: &mut SocketStatus,
    subs: &mut HashMap<String, SubEntry>,
    monitor: &ConnectionStateMonitor,
    ka_hard_deadline: &mut Instant,
    ka_alert_deadline: &mut Instant,
    ka_alert_armed: &mut bool,
    event: ConnectionStateEvent,
) {
    *ws_stream = None;
    *status = SocketStatus::Closed;
    *ka_hard_deadline = Instant::now() + FAR_FUTURE;
    *ka_alert_deadline = Instant::now() + FAR_FUTURE;
    *ka_alert_armed = false;
    subs.retain(|_, entry| {
        if entry.pending_unsubscribe {
            // The socket (and with it the server session) is gone, which
            // completes any teardown that was waiting on an ack.
            if let Some(done_tx) = entry.teardown_done.take() {
                let _ = done_tx.send(());
            }
            false
        } else {
            entry.state = SubState::Pending;
            entry.start_ack_deadline = None;
            true
        }
    });
    monitor.record(event);
}

/// Intentional shutdown: stop every connected subscription, close the
/// socket with a normal close code, and end every stream.
async fn shutdown_socket(
    ws_stream: &mut Option<WsStream>,
    status: &mut SocketStatus,
    subs: &mut HashMap<String, SubEntry>,
    monitor: &ConnectionStateMonitor,
) {
    monitor.record(ConnectionStateEvent::ClosingConnection);
    if let Some(mut ws) = ws_stream.take() {
        for (id, entry) in subs.iter() {
            if entry.state == SubState::Connected {
                send_stop(&mut ws, id).await;
            }
        }
        let _ = ws.flush().await;
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }))
            .await;
    }
    *status = SocketStatus::Closed;
    // Dropping the senders ends every subscription stream.
    subs.clear();
    monitor.record(ConnectionStateEvent::Closed);
}
