use crate::auth::{AuthMode, CustomHeaders, HeaderSupplier, RequestSigner, TokenProvider};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::Arc;

/// Per-subscription configuration accepted by
/// [`RealtimeProvider::subscribe`](crate::RealtimeProvider::subscribe).
///
/// `endpoint` and `query` are required; everything else has a sensible
/// default. The endpoint selects the host and realtime URL transform, the
/// auth mode selects the header builder, and the token/key fields feed
/// their respective builders.
///
/// # Example
///
/// ```rust
/// use appsync_realtime::{AuthMode, SubscribeOptions};
///
/// let options = SubscribeOptions::new(
///     "https://abcdefghijklmnopqrstuvwxyz.appsync-api.us-east-1.amazonaws.com/graphql",
///     "subscription S { onCreateTodo { id name } }",
/// )
/// .with_auth_mode(AuthMode::ApiKey)
/// .with_api_key("da2-example");
/// ```
#[derive(Clone)]
pub struct SubscribeOptions {
    /// GraphQL HTTPS endpoint (required)
    pub endpoint: String,

    /// Signing region, required for IAM auth
    pub region: Option<String>,

    /// GraphQL subscription document (required)
    pub query: String,

    /// Operation variables
    pub variables: Map<String, JsonValue>,

    /// Authorization mode for the handshake and start frames
    pub auth_mode: AuthMode,

    /// API key for [`AuthMode::ApiKey`]
    pub api_key: Option<String>,

    /// Explicit bearer token; wins over any supplier-provided Authorization
    pub auth_token: Option<String>,

    /// Caller-supplied extra headers (static map or async supplier)
    pub extra_headers: Option<CustomHeaders>,

    /// Library-level header supplier merged before per-request headers
    pub library_config_headers: Option<HeaderSupplier>,

    /// Extra detail appended to the `x-amz-user-agent` value
    pub user_agent_detail: Option<String>,

    /// Session token provider for [`AuthMode::Oidc`] / [`AuthMode::UserPool`]
    pub token_provider: Option<Arc<dyn TokenProvider>>,

    /// Request signer for [`AuthMode::Iam`]
    pub signer: Option<Arc<dyn RequestSigner>>,
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("query", &self.query)
            .field("variables", &self.variables)
            .field("auth_mode", &self.auth_mode)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("extra_headers", &self.extra_headers)
            .field("library_config_headers", &self.library_config_headers.is_some())
            .field("user_agent_detail", &self.user_agent_detail)
            .field("token_provider", &self.token_provider.is_some())
            .field("signer", &self.signer.is_some())
            .finish()
    }
}

impl SubscribeOptions {
    /// Create options for the given endpoint and subscription document.
    pub fn new(endpoint: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            region: None,
            query: query.into(),
            variables: Map::new(),
            auth_mode: AuthMode::ApiKey,
            api_key: None,
            auth_token: None,
            extra_headers: None,
            library_config_headers: None,
            user_agent_detail: None,
            token_provider: None,
            signer: None,
        }
    }

    /// Set the signing region (required for IAM auth).
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the operation variables.
    pub fn with_variables(mut self, variables: Map<String, JsonValue>) -> Self {
        self.variables = variables;
        self
    }

    /// Set a single operation variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Select the authorization mode.
    pub fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    /// Set the API key for [`AuthMode::ApiKey`].
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set an explicit bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set caller-supplied extra headers.
    pub fn with_extra_headers(mut self, headers: CustomHeaders) -> Self {
        self.extra_headers = Some(headers);
        self
    }

    /// Set the library-level header supplier.
    pub fn with_library_config_headers(mut self, supplier: HeaderSupplier) -> Self {
        self.library_config_headers = Some(supplier);
        self
    }

    /// Append detail to the user-agent value.
    pub fn with_user_agent_detail(mut self, detail: impl Into<String>) -> Self {
        self.user_agent_detail = Some(detail.into());
        self
    }

    /// Set the session token provider.
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Set the IAM request signer.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Validate the required fields; called on subscription activation.
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(crate::error::RealtimeError::Validation(
                "endpoint is required".to_string(),
            ));
        }
        if self.query.trim().is_empty() {
            return Err(crate::error::RealtimeError::Validation(
                "query is required".to_string(),
            ));
        }
        Ok(())
    }

    /// The serialized `{"query": ..., "variables": ...}` payload placed in
    /// start frames and signed for IAM auth.
    pub(crate) fn operation_payload(&self) -> String {
        serde_json::json!({
            "query": self.query,
            "variables": self.variables,
        })
        .to_string()
    }
}
