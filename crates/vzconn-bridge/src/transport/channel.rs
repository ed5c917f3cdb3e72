//! In-memory bridge endpoint over tokio channels.
//!
//! `ChannelClient` is the cluster side; every `open_bridge` hands the cloud
//! side of the new stream to the paired `ChannelAcceptor` as a
//! `RemoteEndpoint`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use vzconn_core::messages::{
    C2VBridgeMessage, RegisterVizierDeploymentRequest, RegisterVizierDeploymentResponse,
    V2CBridgeMessage,
};
use vzconn_core::topics::HEARTBEAT;
use vzconn_core::{
    BridgeStream, BridgeStreamSink, BridgeStreamSource, VzConnClient, VzError, VzResult,
};

/// Default depth of each stream direction.
const DEFAULT_CAPACITY: usize = 256;

type DeploymentHandler = Arc<
    dyn Fn(&RegisterVizierDeploymentRequest) -> VzResult<RegisterVizierDeploymentResponse>
        + Send
        + Sync,
>;

/// Cluster-side client backed by channels.
pub struct ChannelClient {
    accept_tx: mpsc::UnboundedSender<RemoteEndpoint>,
    deployment: Option<DeploymentHandler>,
    capacity: usize,
}

/// Receives the cloud side of every stream the client opens.
pub struct ChannelAcceptor {
    accept_rx: mpsc::UnboundedReceiver<RemoteEndpoint>,
}

impl ChannelAcceptor {
    /// Wait for the next stream. `None` once the client is gone.
    pub async fn accept(&mut self) -> Option<RemoteEndpoint> {
        self.accept_rx.recv().await
    }
}

impl ChannelClient {
    pub fn new() -> (Self, ChannelAcceptor) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, ChannelAcceptor) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                deployment: None,
                capacity: capacity.max(1),
            },
            ChannelAcceptor { accept_rx },
        )
    }

    /// Answer deployment registrations with `handler`.
    pub fn with_deployment_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RegisterVizierDeploymentRequest) -> VzResult<RegisterVizierDeploymentResponse>
            + Send
            + Sync
            + 'static,
    {
        self.deployment = Some(Arc::new(handler));
        self
    }
}

#[async_trait]
impl VzConnClient for ChannelClient {
    async fn open_bridge(&self, jwt: &str) -> VzResult<BridgeStream> {
        let (up_tx, up_rx) = mpsc::channel(self.capacity);
        let (down_tx, down_rx) = mpsc::channel(self.capacity);

        let remote = RemoteEndpoint {
            jwt: jwt.to_string(),
            rx: up_rx,
            tx: down_tx,
        };
        self.accept_tx
            .send(remote)
            .map_err(|_| VzError::Transport("bridge endpoint unavailable".into()))?;
        debug!("channel bridge stream opened");

        Ok(BridgeStream {
            sink: Box::new(ChannelSink { tx: Some(up_tx) }),
            source: Box::new(ChannelSource { rx: down_rx }),
        })
    }

    async fn register_vizier_deployment(
        &self,
        _jwt: &str,
        req: RegisterVizierDeploymentRequest,
    ) -> VzResult<RegisterVizierDeploymentResponse> {
        match &self.deployment {
            Some(handler) => handler(&req),
            None => Err(VzError::Transport(
                "deployment registration not supported by this endpoint".into(),
            )),
        }
    }
}

struct ChannelSink {
    tx: Option<mpsc::Sender<V2CBridgeMessage>>,
}

#[async_trait]
impl BridgeStreamSink for ChannelSink {
    async fn send(&mut self, msg: V2CBridgeMessage) -> VzResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| VzError::Transport("stream already closed".into()))?;
        tx.send(msg)
            .await
            .map_err(|_| VzError::Transport("remote endpoint went away".into()))
    }

    async fn close(&mut self) -> VzResult<()> {
        self.tx = None;
        Ok(())
    }
}

struct ChannelSource {
    rx: mpsc::Receiver<VzResult<C2VBridgeMessage>>,
}

#[async_trait]
impl BridgeStreamSource for ChannelSource {
    async fn recv(&mut self) -> VzResult<Option<C2VBridgeMessage>> {
        match self.rx.recv().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// The cloud side of one bridge stream.
pub struct RemoteEndpoint {
    jwt: String,
    rx: mpsc::Receiver<V2CBridgeMessage>,
    tx: mpsc::Sender<VzResult<C2VBridgeMessage>>,
}

impl RemoteEndpoint {
    /// Token the bridge opened the stream with.
    pub fn jwt(&self) -> &str {
        &self.jwt
    }

    /// Next envelope from the cluster. `None` once the bridge closed the stream.
    pub async fn recv(&mut self) -> Option<V2CBridgeMessage> {
        self.rx.recv().await
    }

    /// Next envelope that is not a heartbeat.
    pub async fn recv_skipping_heartbeats(&mut self) -> Option<V2CBridgeMessage> {
        loop {
            let msg = self.rx.recv().await?;
            if msg.topic != HEARTBEAT {
                return Some(msg);
            }
        }
    }

    /// Send an envelope to the cluster.
    pub async fn send(&self, msg: C2VBridgeMessage) -> VzResult<()> {
        self.tx
            .send(Ok(msg))
            .await
            .map_err(|_| VzError::Transport("bridge went away".into()))
    }

    /// Make the cluster's next receive fail with `err`.
    pub async fn fail(&self, err: VzError) {
        let _ = self.tx.send(Err(err)).await;
    }

    /// End the stream cleanly from the cloud side.
    pub fn close(self) {
        drop(self);
    }
}
