//! Authorization header construction for the realtime protocol.
//!
//! Every frame that needs credentials (the connection handshake and each
//! `start` frame) embeds a per-mode header object. This module owns the
//! [`AuthMode`] dispatch plus the seams for the external collaborators:
//! the session token provider and the SigV4 request signer, both opaque
//! to this crate.

use crate::error::{RealtimeError, Result};
use crate::models::SubscribeOptions;
use chrono::Utc;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Header carrying the client user agent inside start-frame authorization.
pub(crate) const USER_AGENT_HEADER: &str = "x-amz-user-agent";

/// Base user-agent value for this client.
const BASE_USER_AGENT: &str = "aws-appsync-realtime-client/rust";

/// Fixed headers attached to the synthetic request handed to the IAM signer.
const REALTIME_SIGNING_HEADERS: [(&str, &str); 3] = [
    ("accept", "application/json, text/javascript"),
    ("content-encoding", "amz-1.0"),
    ("content-type", "application/json; charset=UTF-8"),
];

/// Authorization modes supported by the service.
///
/// The dispatcher is a pure function from mode to header builder; the
/// credentials themselves come from [`SubscribeOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// API key auth: `{host, x-amz-date, x-api-key}`
    ApiKey,
    /// SigV4 auth via the caller-supplied [`RequestSigner`]
    Iam,
    /// OIDC token from the caller-supplied [`TokenProvider`]
    Oidc,
    /// Cognito User Pools token from the caller-supplied [`TokenProvider`]
    UserPool,
    /// Caller-supplied Lambda authorizer token
    Lambda,
    /// No configured mode; a caller-supplied token is still required
    None,
}

/// Supplies the current access token for [`AuthMode::Oidc`] and
/// [`AuthMode::UserPool`]. Token acquisition and refresh are outside this
/// crate; the provider is awaited before each frame that needs headers.
pub trait TokenProvider: Send + Sync {
    /// Return the current access token.
    fn access_token(&self) -> BoxFuture<'_, Result<String>>;
}

/// Signs the synthetic request used for [`AuthMode::Iam`] and returns the
/// complete signed header map. The signing algorithm is opaque to this
/// crate.
pub trait RequestSigner: Send + Sync {
    /// Sign `request` and return the headers to embed.
    fn sign(&self, request: &SignableRequest) -> Result<HashMap<String, String>>;
}

/// The synthetic POST request handed to the [`RequestSigner`].
#[derive(Debug, Clone)]
pub struct SignableRequest {
    /// Always `POST`
    pub method: String,
    /// GraphQL endpoint plus the canonical URI (`/connect` for handshake)
    pub url: String,
    /// The payload being signed
    pub body: String,
    /// Fixed realtime headers included in the signature
    pub headers: HashMap<String, String>,
    /// Signing region
    pub region: Option<String>,
    /// Signing service name, always `appsync`
    pub service: String,
}

/// Arguments passed to a dynamic extra-header supplier.
#[derive(Debug, Clone)]
pub struct HeaderSupplierArgs {
    /// The GraphQL endpoint URL
    pub url: String,
    /// The GraphQL operation for the frame being authorized, empty for the
    /// connection handshake
    pub query_string: String,
}

/// Async supplier of additional headers.
pub type HeaderSupplier =
    Arc<dyn Fn(HeaderSupplierArgs) -> BoxFuture<'static, Result<HashMap<String, String>>> + Send + Sync>;

/// Caller-supplied extra headers: either a static map or an async supplier
/// awaited before each frame that needs headers.
#[derive(Clone)]
pub enum CustomHeaders {
    /// Fixed headers merged into every frame
    Static(HashMap<String, String>),
    /// Supplier invoked per frame
    Dynamic(HeaderSupplier),
}

impl fmt::Debug for CustomHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(map) => f.debug_tuple("Static").field(&map.len()).finish(),
            Self::Dynamic(_) => f.debug_tuple("Dynamic").field(&"<fn>").finish(),
        }
    }
}

/// Extract the `host[:port]` component of an HTTP(S) endpoint URL.
///
/// The authorization object always names the HTTPS endpoint's host, never
/// the derived WebSocket host.
pub(crate) fn host_of(endpoint: &str) -> Result<String> {
    let rest = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .ok_or_else(|| {
            RealtimeError::Validation(format!("endpoint must be an http(s) URL: {}", endpoint))
        })?;
    let host = rest.split(['/', '?']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(RealtimeError::Validation(format!(
            "endpoint has no host: {}",
            endpoint
        )));
    }
    Ok(host.to_string())
}

/// Compact ISO-8601 UTC timestamp, e.g. `20260802T101530Z`.
fn amz_date() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// The user-agent value placed in start-frame authorization objects.
pub(crate) fn user_agent(detail: Option<&str>) -> String {
    match detail {
        Some(detail) if !detail.is_empty() => format!("{} {}", BASE_USER_AGENT, detail),
        _ => BASE_USER_AGENT.to_string(),
    }
}

/// Build the per-mode authorization header object for one frame.
///
/// `canonical_uri` is `/connect` for the handshake and empty for start
/// frames; `payload` is the string being signed (`{}` for the handshake,
/// the serialized `{query, variables}` for start frames).
///
/// Merge order: mode headers, then library-config headers, then caller
/// extra headers; an explicit `auth_token` always wins the `Authorization`
/// slot. `with_user_agent` adds `x-amz-user-agent` (start frames only).
pub(crate) async fn build_headers(
    options: &SubscribeOptions,
    canonical_uri: &str,
    payload: &str,
    query_string: &str,
    with_user_agent: bool,
) -> Result<HashMap<String, String>> {
    let mut headers = mode_headers(options, canonical_uri, payload).await?;

    if let Some(supplier) = &options.library_config_headers {
        let args = HeaderSupplierArgs {
            url: options.endpoint.clone(),
            query_string: query_string.to_string(),
        };
        headers.extend(supplier(args).await?);
    }

    match &options.extra_headers {
        Some(CustomHeaders::Static(map)) => headers.extend(map.clone()),
        Some(CustomHeaders::Dynamic(supplier)) => {
            let args = HeaderSupplierArgs {
                url: options.endpoint.clone(),
                query_string: query_string.to_string(),
            };
            headers.extend(supplier(args).await?);
        },
        None => {},
    }

    // An explicit bearer token takes precedence over any supplier-provided
    // Authorization header.
    if let Some(token) = &options.auth_token {
        headers.insert("Authorization".to_string(), token.clone());
    }

    if with_user_agent {
        headers.insert(
            USER_AGENT_HEADER.to_string(),
            user_agent(options.user_agent_detail.as_deref()),
        );
    }

    Ok(headers)
}

/// Pure per-mode dispatch.
async fn mode_headers(
    options: &SubscribeOptions,
    canonical_uri: &str,
    payload: &str,
) -> Result<HashMap<String, String>> {
    let host = host_of(&options.endpoint)?;
    let mut headers = HashMap::new();

    match options.auth_mode {
        AuthMode::ApiKey => {
            let api_key = options.api_key.as_ref().ok_or_else(|| {
                RealtimeError::Authentication("apiKey auth mode requires an api key".to_string())
            })?;
            headers.insert("host".to_string(), host);
            headers.insert("x-amz-date".to_string(), amz_date());
            headers.insert("x-api-key".to_string(), api_key.clone());
        },
        AuthMode::Iam => {
            let signer = options.signer.as_ref().ok_or_else(|| {
                RealtimeError::Authentication("iam auth mode requires a request signer".to_string())
            })?;
            let mut signing_headers: HashMap<String, String> = REALTIME_SIGNING_HEADERS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            signing_headers.insert("host".to_string(), host);
            let request = SignableRequest {
                method: "POST".to_string(),
                url: format!("{}{}", options.endpoint.trim_end_matches('/'), canonical_uri),
                body: payload.to_string(),
                headers: signing_headers,
                region: options.region.clone(),
                service: "appsync".to_string(),
            };
            headers = signer.sign(&request)?;
        },
        AuthMode::Oidc | AuthMode::UserPool => {
            let token = if let Some(token) = &options.auth_token {
                token.clone()
            } else if let Some(provider) = &options.token_provider {
                provider.access_token().await?
            } else {
                return Err(RealtimeError::Authentication(
                    "oidc/userPool auth mode requires a token provider".to_string(),
                ));
            };
            headers.insert("Authorization".to_string(), token);
            headers.insert("host".to_string(), host);
        },
        AuthMode::Lambda | AuthMode::None => {
            let token = options.auth_token.as_ref().ok_or_else(|| {
                RealtimeError::Authentication(
                    "an explicit auth token is required for this auth mode".to_string(),
                )
            })?;
            headers.insert("Authorization".to_string(), token.clone());
            headers.insert("host".to_string(), host);
        },
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscribeOptions;

    const ENDPOINT: &str =
        "https://abcdefghijklmnopqrstuvwxyz.appsync-api.us-east-1.amazonaws.com/graphql";

    fn base_options(auth_mode: AuthMode) -> SubscribeOptions {
        SubscribeOptions::new(ENDPOINT, "subscription S { onCreateTodo { id } }")
            .with_auth_mode(auth_mode)
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(
            host_of(ENDPOINT).unwrap(),
            "abcdefghijklmnopqrstuvwxyz.appsync-api.us-east-1.amazonaws.com"
        );
        assert_eq!(host_of("http://127.0.0.1:8080/graphql").unwrap(), "127.0.0.1:8080");
        assert!(host_of("ftp://example.com").is_err());
    }

    #[tokio::test]
    async fn test_api_key_headers() {
        let options = base_options(AuthMode::ApiKey).with_api_key("FAKE");
        let headers = build_headers(&options, "/connect", "{}", "", false)
            .await
            .unwrap();

        assert_eq!(
            headers.get("host").map(String::as_str),
            Some("abcdefghijklmnopqrstuvwxyz.appsync-api.us-east-1.amazonaws.com")
        );
        assert_eq!(headers.get("x-api-key").map(String::as_str), Some("FAKE"));
        let date = headers.get("x-amz-date").unwrap();
        assert_eq!(date.len(), 16);
        assert!(date.ends_with('Z'));
        assert_eq!(date.as_bytes()[8], b'T');
    }

    #[tokio::test]
    async fn test_api_key_missing_key_fails() {
        let options = base_options(AuthMode::ApiKey);
        let err = build_headers(&options, "/connect", "{}", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_lambda_requires_token() {
        let options = base_options(AuthMode::Lambda);
        let err = build_headers(&options, "/connect", "{}", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Authentication(_)));

        let options = base_options(AuthMode::Lambda).with_auth_token("custom-token");
        let headers = build_headers(&options, "/connect", "{}", "", false)
            .await
            .unwrap();
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("custom-token")
        );
        assert!(headers.contains_key("host"));
    }

    #[tokio::test]
    async fn test_iam_uses_signer_output_verbatim() {
        struct FakeSigner;
        impl RequestSigner for FakeSigner {
            fn sign(&self, request: &SignableRequest) -> Result<HashMap<String, String>> {
                assert_eq!(request.method, "POST");
                assert!(request.url.ends_with("/graphql/connect"));
                assert_eq!(request.service, "appsync");
                assert_eq!(
                    request.headers.get("content-encoding").map(String::as_str),
                    Some("amz-1.0")
                );
                let mut headers = HashMap::new();
                headers.insert("Authorization".to_string(), "AWS4-HMAC-SHA256 ...".to_string());
                headers.insert("host".to_string(), "signed-host".to_string());
                Ok(headers)
            }
        }

        let options = base_options(AuthMode::Iam)
            .with_region("us-east-1")
            .with_signer(Arc::new(FakeSigner));
        let headers = build_headers(&options, "/connect", "{}", "", false)
            .await
            .unwrap();
        assert_eq!(headers.get("host").map(String::as_str), Some("signed-host"));
        assert!(headers.get("Authorization").unwrap().starts_with("AWS4-HMAC-SHA256"));
    }

    #[tokio::test]
    async fn test_explicit_token_beats_extra_headers() {
        let mut extra = HashMap::new();
        extra.insert("Authorization".to_string(), "from-extra".to_string());
        extra.insert("x-custom".to_string(), "1".to_string());

        let options = base_options(AuthMode::Lambda)
            .with_auth_token("explicit-token")
            .with_extra_headers(CustomHeaders::Static(extra));

        let headers = build_headers(&options, "", "{}", "", false).await.unwrap();
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("explicit-token")
        );
        assert_eq!(headers.get("x-custom").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_dynamic_headers_are_awaited_with_query() {
        let supplier: HeaderSupplier = Arc::new(|args: HeaderSupplierArgs| {
            Box::pin(async move {
                let mut map = HashMap::new();
                map.insert("x-query-len".to_string(), args.query_string.len().to_string());
                Ok(map)
            })
        });

        let options = base_options(AuthMode::ApiKey)
            .with_api_key("FAKE")
            .with_extra_headers(CustomHeaders::Dynamic(supplier));

        let headers = build_headers(&options, "", "{}", "subscription S { f }", true)
            .await
            .unwrap();
        assert_eq!(headers.get("x-query-len").map(String::as_str), Some("20"));
        assert!(headers
            .get(USER_AGENT_HEADER)
            .unwrap()
            .starts_with(BASE_USER_AGENT));
    }

    #[tokio::test]
    async fn test_token_provider_is_consulted() {
        struct FakeProvider;
        impl TokenProvider for FakeProvider {
            fn access_token(&self) -> BoxFuture<'_, Result<String>> {
                Box::pin(async { Ok("session-token".to_string()) })
            }
        }

        let options = base_options(AuthMode::UserPool).with_token_provider(Arc::new(FakeProvider));
        let headers = build_headers(&options, "/connect", "{}", "", false)
            .await
            .unwrap();
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("session-token")
        );
    }
}
