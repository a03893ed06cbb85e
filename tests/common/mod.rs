#![allow(dead_code)]
//! In-process mock of the AppSync realtime endpoint.
//!
//! Accepts WebSocket connections, speaks just enough of the protocol for
//! the integration tests (connection_init/ack, start/start_ack, stop,
//! ka, data), records every client frame, and lets tests inject arbitrary
//! server frames into the most recent connection.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::Message;

/// How the server answers `connection_init`.
#[derive(Debug, Clone)]
pub enum InitResponse {
    /// Reply with `connection_ack` carrying this keep-alive window.
    Ack { connection_timeout_ms: u64 },
    /// Reply with `connection_error` carrying these errors.
    Error { errors: Value },
    /// Never reply (forces the client's ack timeout).
    Silent,
}

/// Scripted server behavior.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub init_response: InitResponse,
    /// Acknowledge `start` frames with `start_ack`.
    pub ack_starts: bool,
    /// Answer `stop` frames with `complete`.
    pub complete_stops: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            init_response: InitResponse::Ack {
                connection_timeout_ms: 300_000,
            },
            ack_starts: true,
            complete_stops: true,
        }
    }
}

pub struct MockServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    handshake_paths: Arc<Mutex<Vec<String>>>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
    total_connections: Arc<AtomicUsize>,
    open_connections: Arc<AtomicUsize>,
    _accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock server bind");
        let addr = listener.local_addr().expect("mock server addr");

        let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let handshake_paths: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let total_connections = Arc::new(AtomicUsize::new(0));
        let open_connections = Arc::new(AtomicUsize::new(0));

        let accept_task = {
            let received = received.clone();
            let handshake_paths = handshake_paths.clone();
            let clients = clients.clone();
            let total_connections = total_connections.clone();
            let open_connections = open_connections.clone();
            tokio::spawn(async move {
                loop {
                    let (stream, _) = match listener.accept().await {
                        Ok(accepted) => accepted,
                        Err(_) => return,
                    };
                    total_connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(
                        stream,
                        behavior.clone(),
                        received.clone(),
                        handshake_paths.clone(),
                        clients.clone(),
                        open_connections.clone(),
                    ));
                }
            })
        };

        Self {
            addr,
            received,
            handshake_paths,
            clients,
            total_connections,
            open_connections,
            _accept_task: accept_task,
        }
    }

    /// Endpoint for the provider; a custom-domain URL pointing at the mock.
    pub fn endpoint(&self) -> String {
        format!("http://{}/graphql", self.addr)
    }

    /// Inject a server frame into the most recent connection.
    pub fn send_json(&self, value: Value) {
        let clients = self.clients.lock().unwrap();
        let sender = clients.last().expect("no connected client");
        sender
            .send(Message::Text(value.to_string().into()))
            .expect("client connection gone");
    }

    pub fn send_data(&self, id: &str, payload: Value) {
        self.send_json(json!({ "type": "data", "id": id, "payload": payload }));
    }

    pub fn send_ka(&self) {
        self.send_json(json!({ "type": "ka" }));
    }

    /// All recorded frames of the given type.
    pub fn frames(&self, frame_type: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f["type"] == frame_type)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` frames of `frame_type` have arrived.
    pub async fn wait_for_frames(
        &self,
        frame_type: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frames = self.frames(frame_type);
            if frames.len() >= count {
                return frames;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {} '{}' frame(s); saw {:?}",
                    count,
                    frame_type,
                    self.received.lock().unwrap()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until the client has opened `total` connections overall.
    pub async fn wait_for_connections(&self, total: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.total_connections.load(Ordering::SeqCst) < total {
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {} connection(s); saw {}",
                    total,
                    self.total_connections.load(Ordering::SeqCst)
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until no connection remains open.
    pub async fn wait_for_no_open_connections(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.open_connections.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for connections to close; {} still open",
                    self.open_connections.load(Ordering::SeqCst)
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn total_connections(&self) -> usize {
        self.total_connections.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    /// Request paths (including the query string) of every WebSocket
    /// upgrade this server accepted.
    pub fn handshake_paths(&self) -> Vec<String> {
        self.handshake_paths.lock().unwrap().clone()
    }
}

async fn serve_connection(
    stream: TcpStream,
    behavior: MockBehavior,
    received: Arc<Mutex<Vec<Value>>>,
    handshake_paths: Arc<Mutex<Vec<String>>>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
    open_connections: Arc<AtomicUsize>,
) {
    let paths = handshake_paths.clone();
    let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        paths.lock().unwrap().push(req.uri().to_string());
        // Echo the requested subprotocol so the client accepts the upgrade.
        if let Some(proto) = req.headers().get("sec-websocket-protocol") {
            resp.headers_mut()
                .insert("sec-websocket-protocol", proto.clone());
        }
        Ok(resp)
    };

    let mut ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    clients.lock().unwrap().push(out_tx);
    open_connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            out = out_rx.recv() => match out {
                Some(message) => {
                    if ws.send(message).await.is_err() {
                        break;
                    }
                },
                None => break,
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = match serde_json::from_str(text.as_str()) {
                        Ok(value) => value,
                        Err(_) => continue,
                    };
                    received.lock().unwrap().push(value.clone());
                    respond(&mut ws, &behavior, &value).await;
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {},
                Some(Err(_)) => break,
            },
        }
    }

    open_connections.fetch_sub(1, Ordering::SeqCst);
}

async fn respond(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    behavior: &MockBehavior,
    frame: &Value,
) {
    let reply = match frame["type"].as_str() {
        Some("connection_init") => match &behavior.init_response {
            InitResponse::Ack {
                connection_timeout_ms,
            } => Some(json!({
                "type": "connection_ack",
                "payload": { "connectionTimeoutMs": connection_timeout_ms },
            })),
            InitResponse::Error { errors } => Some(json!({
                "type": "connection_error",
                "payload": { "errors": errors },
            })),
            InitResponse::Silent => None,
        },
        Some("start") if behavior.ack_starts => Some(json!({
            "type": "start_ack",
            "id": frame["id"],
        })),
        Some("stop") if behavior.complete_stops => Some(json!({
            "type": "complete",
            "id": frame["id"],
        })),
        _ => None,
    };

    if let Some(reply) = reply {
        let _ = ws.send(Message::Text(reply.to_string().into())).await;
    }
}

/// Initialize test logging once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
