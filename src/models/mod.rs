//! Data models for the realtime protocol and client configuration.

mod client_message;
mod connection_options;
mod server_message;
mod subscribe_options;

pub(crate) use client_message::{ClientMessage, StartExtensions, StartPayload};
pub use connection_options::ConnectionOptions;
pub use server_message::{
    ConnectionAckPayload, ConnectionErrorPayload, GraphQlError, ServerMessage,
};
pub use subscribe_options::SubscribeOptions;
