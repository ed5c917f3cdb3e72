//! vzconn-bridge: relay between a cluster's local bus and the cloud.
//!
//! A `Bridge` opens one bidirectional stream to the cloud connector,
//! registers the cluster, forwards `v2c.<topic>` bus traffic up the stream,
//! republishes stream traffic on `c2v.<topic>`, and reports cluster health
//! with periodic heartbeats until it is stopped or the stream ends.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use uuid::Uuid;
//! use vzconn_bridge::{
//!     new_session_id, Bridge, LocalBus, StatusChecker, VizierInfo, WebSocketClient,
//! };
//!
//! # async fn example(
//! #     vz_info: Arc<dyn VizierInfo>,
//! #     checker: Arc<dyn StatusChecker>,
//! # ) -> vzconn_core::VzResult<()> {
//! let client = Arc::new(WebSocketClient::new("wss://cloud.example.com/vzconn")?);
//! let bus = Arc::new(LocalBus::new());
//! let bridge = Bridge::new(
//!     Uuid::nil(),
//!     "cluster-token",
//!     None,
//!     new_session_id(),
//!     client,
//!     vz_info,
//!     bus,
//!     checker,
//! )?;
//! bridge.run_stream().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod bus;
pub mod config;
pub mod heartbeat;
pub mod inbound;
pub mod outbound;
pub mod registration;
pub mod session;
pub mod transport;
pub mod vizier;

#[cfg(test)]
mod test_support;

// Re-export primary public types.
pub use bridge::Bridge;
pub use bus::{BusMessage, LocalBus, MessageBus, Subscription};
pub use config::{BridgeConfig, RegistrationPolicy};
pub use registration::RegistrationState;
pub use session::{new_session_id, BridgeState};
pub use transport::{ChannelAcceptor, ChannelClient, RemoteEndpoint, WebSocketClient};
pub use vizier::{K8sState, StatusChecker, VizierInfo};
