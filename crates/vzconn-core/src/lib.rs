//! vzconn-core: shared protocol library for the cloud connector bridge.
//!
//! Provides the opaque typed payload container, CBOR codec, stream and bus
//! envelope types, reserved topics, and the abstract client interface to the
//! cloud bridge endpoint.

pub mod any;
pub mod codec;
pub mod error;
pub mod messages;
pub mod topics;
pub mod transport;

// Re-export commonly used items at crate root.
pub use any::{AnyMessage, TypedMessage};
pub use codec::{cbor_decode, cbor_encode};
pub use error::{VzError, VzResult};
pub use transport::{BridgeStream, BridgeStreamSink, BridgeStreamSource, VzConnClient};
