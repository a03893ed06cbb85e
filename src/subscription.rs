//! Per-caller subscription stream.
//!
//! [`Subscription`] is cold: creating one does no work. The first call to
//! [`next`](Subscription::next) activates it: validates the options,
//! allocates the wire id, registers the entry with the connection actor,
//! and hooks the subscription into the reconnection monitor. Teardown is
//! idempotent and also runs on drop.

use crate::{
    connection::{ConnCmd, EVENT_CHANNEL_CAPACITY},
    error::{RealtimeError, Result},
    models::SubscribeOptions,
    reconnect::ReconnectionMonitor,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A lazy stream of subscription payloads.
///
/// Yields `Ok(payload)` for each `data` frame routed to this subscription,
/// `Err` exactly once if the subscription fails, and `None` once the
/// stream has terminated (server completion, failure, or teardown).
///
/// # Examples
///
/// ```rust,no_run
/// use appsync_realtime::{AuthMode, RealtimeProvider, SubscribeOptions};
///
/// # async fn example() -> appsync_realtime::Result<()> {
/// let provider = RealtimeProvider::builder().build();
/// let options = SubscribeOptions::new(
///     "https://abcdefghijklmnopqrstuvwxyz.appsync-api.us-east-1.amazonaws.com/graphql",
///     "subscription S { onCreateTodo { id name } }",
/// )
/// .with_auth_mode(AuthMode::ApiKey)
/// .with_api_key("da2-example");
///
/// let mut subscription = provider.subscribe(options);
/// while let Some(event) = subscription.next().await {
///     match event {
///         Ok(payload) => println!("data: {}", payload),
///         Err(e) => eprintln!("error: {}", e),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Subscription {
    cmd_tx: mpsc::Sender<ConnCmd>,
    reconnect: Arc<ReconnectionMonitor>,
    /// Taken on activation.
    options: Option<SubscribeOptions>,
    /// Assigned on activation; the wire correlation key.
    id: Option<String>,
    /// Present once activated.
    event_rx: Option<mpsc::Receiver<Result<JsonValue>>>,
    /// Reconnection observer handle, removed on teardown.
    observer_id: Option<u64>,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(
        cmd_tx: mpsc::Sender<ConnCmd>,
        reconnect: Arc<ReconnectionMonitor>,
        options: SubscribeOptions,
    ) -> Self {
        Self {
            cmd_tx,
            reconnect,
            options: Some(options),
            id: None,
            event_rx: None,
            observer_id: None,
            closed: false,
        }
    }

    /// Receive the next payload.
    ///
    /// The first call activates the subscription. Returns `None` once the
    /// stream has terminated; failures surface as a single `Err` before
    /// the end of the stream (use
    /// [`RealtimeError::to_graphql_errors`] for the GraphQL-shaped form).
    pub async fn next(&mut self) -> Option<Result<JsonValue>> {
        if self.closed {
            return None;
        }

        if self.event_rx.is_none() {
            if let Err(err) = self.activate().await {
                self.closed = true;
                return Some(Err(err));
            }
        }

        match self.event_rx.as_mut()?.recv().await {
            Some(item) => Some(item),
            None => {
                // Terminated upstream; nothing left to restart.
                if let Some(observer_id) = self.observer_id.take() {
                    self.reconnect.remove_observer(observer_id);
                }
                self.closed = true;
                None
            },
        }
    }

    /// Register with the connection actor and arm the reconnection hook.
    ///
    /// All local state is committed before the first suspension point, so
    /// a caller cancelling the activating poll (e.g. via a timeout) leaves
    /// the subscription in a consistent state.
    async fn activate(&mut self) -> Result<()> {
        let options = self
            .options
            .take()
            .expect("subscription activated twice");
        options.validate()?;

        let id = Uuid::new_v4().to_string();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = oneshot::channel();

        // Register the restart hook before the first start so a disruption
        // racing the handshake still re-issues this subscription.
        let observer_id = {
            let cmd_tx = self.cmd_tx.clone();
            let id = id.clone();
            self.reconnect.add_observer(Arc::new(move || {
                let _ = cmd_tx.try_send(ConnCmd::Restart { id: id.clone() });
            }))
        };

        self.id = Some(id.clone());
        self.event_rx = Some(event_rx);
        self.observer_id = Some(observer_id);

        let send_result = self
            .cmd_tx
            .send(ConnCmd::Subscribe {
                id,
                options: Box::new(options),
                event_tx,
                result_tx,
            })
            .await;

        if send_result.is_err() {
            self.reconnect.remove_observer(observer_id);
            self.observer_id = None;
            return Err(RealtimeError::WebSocket(
                "Realtime provider is closed".to_string(),
            ));
        }

        match result_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.reconnect.remove_observer(observer_id);
                self.observer_id = None;
                Err(err)
            },
            Err(_) => {
                self.reconnect.remove_observer(observer_id);
                self.observer_id = None;
                Err(RealtimeError::WebSocket(
                    "Realtime provider stopped before confirming the subscription".to_string(),
                ))
            },
        }
    }

    /// The wire id, once activated.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether the stream has terminated or been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Tear the subscription down.
    ///
    /// Waits for the provider to process the teardown, so a teardown racing
    /// an in-flight start completes only after the entry is resolved. Safe
    /// to call multiple times, and before activation.
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;

        if let Some(observer_id) = self.observer_id.take() {
            self.reconnect.remove_observer(observer_id);
        }

        // Drop the receiver first so a provider blocked on a full event
        // channel unblocks before the teardown command is processed.
        self.event_rx = None;

        if let Some(id) = self.id.take() {
            let (done_tx, done_rx) = oneshot::channel();
            if self
                .cmd_tx
                .send(ConnCmd::Unsubscribe {
                    id,
                    done_tx: Some(done_tx),
                })
                .await
                .is_ok()
            {
                let _ = done_rx.await;
            }
        }

        Ok(())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observer_id) = self.observer_id.take() {
            self.reconnect.remove_observer(observer_id);
        }
        // Fire-and-forget teardown.
        if let Some(id) = self.id.take() {
            let _ = self.cmd_tx.try_send(ConnCmd::Unsubscribe { id, done_tx: None });
        }
    }
}
