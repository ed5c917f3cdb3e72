//! Abstract client interface to the cloud bridge endpoint.
//!
//! The stream is handed out already split: the sink has a single writer and
//! the source a single reader, so neither side needs a lock.

use async_trait::async_trait;

use crate::error::VzResult;
use crate::messages::{
    C2VBridgeMessage, RegisterVizierDeploymentRequest, RegisterVizierDeploymentResponse,
    V2CBridgeMessage,
};

/// Write half of the bridge stream.
#[async_trait]
pub trait BridgeStreamSink: Send {
    /// Send one envelope. Any error is fatal to the stream.
    async fn send(&mut self, msg: V2CBridgeMessage) -> VzResult<()>;

    /// Half-close the stream from the cluster side.
    async fn close(&mut self) -> VzResult<()>;
}

/// Read half of the bridge stream.
#[async_trait]
pub trait BridgeStreamSource: Send {
    /// Receive the next envelope. `Ok(None)` is a clean end of stream.
    async fn recv(&mut self) -> VzResult<Option<C2VBridgeMessage>>;
}

/// An open bidirectional bridge stream.
pub struct BridgeStream {
    pub sink: Box<dyn BridgeStreamSink>,
    pub source: Box<dyn BridgeStreamSource>,
}

/// Client for the cloud connector service.
#[async_trait]
pub trait VzConnClient: Send + Sync {
    /// Open the long-lived bridge stream, authenticated with `jwt`.
    async fn open_bridge(&self, jwt: &str) -> VzResult<BridgeStream>;

    /// Ask the cloud to assign a vizier ID to this cluster.
    async fn register_vizier_deployment(
        &self,
        jwt: &str,
        req: RegisterVizierDeploymentRequest,
    ) -> VzResult<RegisterVizierDeploymentResponse>;
}
