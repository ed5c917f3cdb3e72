//! Concrete `VzConnClient` implementations.
//!
//! - `WebSocketClient` talks to a real cloud connector.
//! - `ChannelClient` keeps both ends in-process.

pub mod channel;
pub mod websocket;

pub use channel::{ChannelAcceptor, ChannelClient, RemoteEndpoint};
pub use websocket::WebSocketClient;
