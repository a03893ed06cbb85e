//! Client-side realtime subscription provider for AWS AppSync's
//! GraphQL-over-WebSocket protocol.
//!
//! A single [`RealtimeProvider`] multiplexes many logical GraphQL
//! subscriptions over one shared WebSocket. It negotiates a pluggable
//! authorization scheme per subscription, observes connection health
//! through the service's keep-alive messages, and orchestrates
//! reconnection with bounded jittered retry when the network or socket
//! fails.
//!
//! Each subscription surfaces as an asynchronous event stream
//! ([`Subscription`]); server messages are delivered to the owning stream
//! in order, teardown is idempotent, and the coarse connection lifecycle
//! ([`ConnectionState`]) is published both on a broadcast stream and to an
//! optional external event bus.
//!
//! # Example
//!
//! ```rust,no_run
//! use appsync_realtime::{AuthMode, RealtimeProvider, SubscribeOptions};
//!
//! # async fn example() {
//! let provider = RealtimeProvider::builder().build();
//!
//! let mut subscription = provider.subscribe(
//!     SubscribeOptions::new(
//!         "https://abcdefghijklmnopqrstuvwxyz.appsync-api.us-east-1.amazonaws.com/graphql",
//!         "subscription S { onCreateTodo { id name } }",
//!     )
//!     .with_auth_mode(AuthMode::ApiKey)
//!     .with_api_key("da2-example"),
//! );
//!
//! while let Some(event) = subscription.next().await {
//!     match event {
//!         Ok(payload) => println!("data: {}", payload),
//!         Err(e) => eprintln!("subscription error: {}", e),
//!     }
//! }
//!
//! provider.close().await;
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod events;
pub mod models;
pub mod provider;
pub mod state;
pub mod subscription;
pub mod timeouts;

mod connection;
mod reconnect;
mod retry;

pub use auth::{
    AuthMode, CustomHeaders, HeaderSupplier, HeaderSupplierArgs, RequestSigner, SignableRequest,
    TokenProvider,
};
pub use error::{RealtimeError, Result};
pub use events::{EventPublisher, HubPayload, HubSink, HUB_TOPIC};
pub use models::{ConnectionOptions, SubscribeOptions};
pub use provider::{NetworkEvent, RealtimeProvider, RealtimeProviderBuilder, PROVIDER_NAME};
pub use state::ConnectionState;
pub use subscription::Subscription;
pub use timeouts::RealtimeTimeouts;
