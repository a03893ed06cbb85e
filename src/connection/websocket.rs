//! Low-level WebSocket helpers for the AppSync realtime protocol.
//!
//! URL derivation, handshake query-string assembly, subprotocol request
//! construction, and frame send/parse. The shared-connection actor in
//! [`super::shared`] builds on these.

use crate::error::{RealtimeError, Result};
use crate::models::{ClientMessage, ServerMessage};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        error::Error as WsError,
        http::HeaderValue,
        protocol::{frame::coding::CloseCode, frame::CloseFrame, Message},
    },
};

/// The WebSocket stream type used throughout the crate.
pub(crate) type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Subprotocol required by the service.
const REALTIME_SUBPROTOCOL: &str = "graphql-ws";

/// Close code used when aborting a failed handshake.
pub(crate) const CLOSE_CODE_HANDSHAKE_ABORT: u16 = 3001;

/// Derive the realtime WebSocket URL from a GraphQL HTTP(S) endpoint.
///
/// Standard AppSync endpoints
/// (`https://{26-char id}.appsync-api.{region}.amazonaws.com[.cn]/graphql`)
/// get their service label substituted (`appsync-api` →
/// `appsync-realtime-api`, beta alias `gogi-beta` → `grt-beta`). Custom
/// domains get `/realtime` appended instead. The scheme always flips to
/// the WebSocket equivalent.
pub(crate) fn realtime_endpoint(endpoint: &str) -> Result<String> {
    let (ws_scheme, rest) = if let Some(rest) = endpoint.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        ("ws", rest)
    } else {
        return Err(RealtimeError::Validation(format!(
            "endpoint must be an http(s) URL: {}",
            endpoint
        )));
    };

    let rest = rest.trim_end_matches('/');
    let (host, path) = match rest.split_once('/') {
        Some((host, path)) => (host, path),
        None => (rest, ""),
    };
    if host.is_empty() {
        return Err(RealtimeError::Validation(format!(
            "endpoint has no host: {}",
            endpoint
        )));
    }

    if let Some(realtime_host) = standard_realtime_host(host, path) {
        return Ok(format!("{}://{}/graphql", ws_scheme, realtime_host));
    }

    // Custom domain: the realtime handler lives under the /realtime path.
    if path.is_empty() {
        Ok(format!("{}://{}/realtime", ws_scheme, host))
    } else {
        Ok(format!("{}://{}/{}/realtime", ws_scheme, host, path))
    }
}

/// If `host`/`path` match the standard AppSync endpoint shape, return the
/// substituted realtime host.
fn standard_realtime_host(host: &str, path: &str) -> Option<String> {
    if path != "graphql" {
        return None;
    }

    let (labels, suffix_len) = if host.ends_with(".amazonaws.com.cn") {
        (host.split('.').collect::<Vec<_>>(), 3)
    } else if host.ends_with(".amazonaws.com") {
        (host.split('.').collect::<Vec<_>>(), 2)
    } else {
        return None;
    };

    // {api id}.{service}.{region}.amazonaws.com[.cn]
    if labels.len() != 3 + suffix_len {
        return None;
    }
    let api_id = labels[0];
    let service = labels[1];
    let region = labels[2];

    if api_id.len() != 26 || !api_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    if !region.contains('-')
        || region.len() < 4
        || !region.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return None;
    }

    let realtime_service = match service {
        "appsync-api" => "appsync-realtime-api",
        "gogi-beta" => "grt-beta",
        _ => return None,
    };

    let mut labels = labels;
    labels[1] = realtime_service;
    Some(labels.join("."))
}

/// Assemble the handshake URL:
/// `{realtime}?header=<base64(headers JSON)>&payload=<base64("{}")>`.
pub(crate) fn handshake_url(
    realtime_endpoint: &str,
    headers: &HashMap<String, String>,
) -> Result<String> {
    let header_json = serde_json::to_string(headers)?;
    Ok(format!(
        "{}?header={}&payload={}",
        realtime_endpoint,
        BASE64.encode(header_json.as_bytes()),
        BASE64.encode(b"{}"),
    ))
}

/// Open the WebSocket with the `graphql-ws` subprotocol, bounded by
/// `connect_timeout`.
pub(crate) async fn connect(url: &str, connect_timeout: Duration) -> Result<WsStream> {
    let mut request = url.into_client_request().map_err(|e| {
        RealtimeError::WebSocket(format!("Failed to build WebSocket request: {}", e))
    })?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(REALTIME_SUBPROTOCOL),
    );

    let connect_result = tokio::time::timeout(connect_timeout, connect_async(request)).await;

    match connect_result {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(WsError::Http(response))) => {
            let status = response.status();
            let body_text = response
                .into_body()
                .as_ref()
                .and_then(|b| {
                    if b.is_empty() {
                        None
                    } else {
                        Some(String::from_utf8_lossy(b).into_owned())
                    }
                })
                .unwrap_or_default();
            let message = if body_text.is_empty() {
                format!("WebSocket upgrade rejected: HTTP {}", status.as_u16())
            } else {
                format!(
                    "WebSocket upgrade rejected: HTTP {}: {}",
                    status.as_u16(),
                    body_text
                )
            };
            Err(RealtimeError::Handshake {
                message,
                error_type: None,
                error_code: None,
            })
        },
        Ok(Err(e)) => Err(RealtimeError::Handshake {
            message: format!("Connection failed: {}", e),
            error_type: None,
            error_code: None,
        }),
        Err(_) => Err(RealtimeError::Timeout(format!(
            "Connection timeout ({:?})",
            connect_timeout
        ))),
    }
}

/// Serialize and send a client frame.
pub(crate) async fn send_message(ws: &mut WsStream, message: &ClientMessage) -> Result<()> {
    let payload = serde_json::to_string(message)
        .map_err(|e| RealtimeError::Serialization(format!("Failed to serialize frame: {}", e)))?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| RealtimeError::Send(format!("Failed to send frame: {}", e)))
}

/// Parse a text frame into a [`ServerMessage`].
///
/// Frames with an unrecognized `type` are ignored (returns `Ok(None)`);
/// malformed JSON is an error.
pub(crate) fn parse_message(text: &str) -> Result<Option<ServerMessage>> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        RealtimeError::Serialization(format!("Failed to parse server frame: {}", e))
    })?;

    match serde_json::from_value::<ServerMessage>(value.clone()) {
        Ok(message) => Ok(Some(message)),
        Err(_) => {
            log::debug!(
                "[appsync-realtime] Ignoring unrecognized frame type: {:?}",
                value.get("type")
            );
            Ok(None)
        },
    }
}

/// Send `connection_init` and wait for `connection_ack`, bounded by
/// `ack_timeout`.
///
/// Returns the service-provided `connectionTimeoutMs`, if any. On
/// `connection_error` with a code in `non_retryable_codes`, the returned
/// error carries the non-retryable marker so the retry wrapper aborts.
/// Any failure closes the socket with the handshake-abort code.
pub(crate) async fn init_and_await_ack(
    ws: &mut WsStream,
    ack_timeout: Duration,
    non_retryable_codes: &[u16],
) -> Result<Option<u64>> {
    send_message(ws, &ClientMessage::ConnectionInit).await?;

    let deadline = tokio::time::Instant::now() + ack_timeout;
    loop {
        let frame = match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                abort_handshake(ws).await;
                return Err(RealtimeError::Handshake {
                    message: format!("No connection_ack within {:?}", ack_timeout),
                    error_type: None,
                    error_code: None,
                });
            },
        };

        match frame {
            Some(Ok(Message::Text(text))) => match parse_message(text.as_str())? {
                Some(ServerMessage::ConnectionAck { payload }) => {
                    return Ok(payload.and_then(|p| p.connection_timeout_ms));
                },
                Some(ServerMessage::ConnectionError { payload }) => {
                    abort_handshake(ws).await;
                    let first = payload.and_then(|p| p.errors.into_iter().next());
                    let error_type = first.as_ref().and_then(|e| e.error_type.clone());
                    let error_code = first.as_ref().and_then(|e| e.error_code);
                    let message = first
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "Connection rejected by service".to_string());
                    let err = RealtimeError::Handshake {
                        message,
                        error_type,
                        error_code,
                    };
                    return Err(match error_code {
                        Some(code) if non_retryable_codes.contains(&code) => err.non_retryable(),
                        _ => err,
                    });
                },
                // Keep-alives may arrive ahead of the ack; anything else
                // before the ack is out of protocol and skipped.
                Some(_) | None => continue,
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(RealtimeError::Handshake {
                    message: "Socket closed before connection_ack".to_string(),
                    error_type: None,
                    error_code: None,
                });
            },
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(RealtimeError::Handshake {
                    message: format!("WebSocket error before connection_ack: {}", e),
                    error_type: None,
                    error_code: None,
                });
            },
        }
    }
}

/// Best-effort abort of a half-open handshake.
async fn abort_handshake(ws: &mut WsStream) {
    let _ = ws
        .close(Some(CloseFrame {
            code: CloseCode::from(CLOSE_CODE_HANDSHAKE_ABORT),
            reason: "handshake failed".into(),
        }))
        .await;
}
