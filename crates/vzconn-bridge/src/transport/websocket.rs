//! WebSocket client for the cloud connector.
//!
//! The bridge stream lives at `<base>/bridge`; deployment registration is a
//! single request/response exchange on `<base>/register`. Every binary
//! WebSocket message carries exactly one CBOR-encoded wire message and the
//! token travels as a bearer `Authorization` header.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use vzconn_core::messages::{
    C2VBridgeMessage, RegisterVizierDeploymentRequest, RegisterVizierDeploymentResponse,
    V2CBridgeMessage,
};
use vzconn_core::{
    cbor_decode, cbor_encode, BridgeStream, BridgeStreamSink, BridgeStreamSource, VzConnClient,
    VzError, VzResult,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

const BRIDGE_PATH: &str = "bridge";
const REGISTER_PATH: &str = "register";

/// Cloud connector client over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketClient {
    base_url: String,
}

impl WebSocketClient {
    /// `base_url` must use the `ws://` or `wss://` scheme.
    pub fn new(base_url: impl Into<String>) -> VzResult<Self> {
        let base_url = base_url.into();
        let lower = base_url.to_lowercase();
        if !(lower.starts_with("ws://") || lower.starts_with("wss://")) {
            return Err(VzError::InvalidArgument(format!(
                "unsupported URL scheme: {base_url} (expected ws:// or wss://)"
            )));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Full URL for an endpoint path.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn connect(&self, path: &str, jwt: &str) -> VzResult<WsStream> {
        let url = self.endpoint(path);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| VzError::Transport(format!("bad WebSocket request for {url}: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {jwt}"))
            .map_err(|e| VzError::InvalidArgument(format!("token is not a valid header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| VzError::Transport(format!("WebSocket connect error: {e}")))?;
        info!(url = %url, "WebSocket connected");
        Ok(ws)
    }
}

#[async_trait]
impl VzConnClient for WebSocketClient {
    async fn open_bridge(&self, jwt: &str) -> VzResult<BridgeStream> {
        let ws = self.connect(BRIDGE_PATH, jwt).await?;
        let (sink, stream) = ws.split();
        let sink = Arc::new(Mutex::new(sink));
        Ok(BridgeStream {
            sink: Box::new(WebSocketSink { sink: sink.clone() }),
            source: Box::new(WebSocketSource { stream, sink }),
        })
    }

    async fn register_vizier_deployment(
        &self,
        jwt: &str,
        req: RegisterVizierDeploymentRequest,
    ) -> VzResult<RegisterVizierDeploymentResponse> {
        let mut ws = self.connect(REGISTER_PATH, jwt).await?;
        ws.send(Message::Binary(cbor_encode(&req)?))
            .await
            .map_err(|e| VzError::Transport(format!("WS register send error: {e}")))?;

        let response = loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => break cbor_decode(&data)?,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(VzError::Transport(
                        "connection closed before registration response".into(),
                    ))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(VzError::Transport(format!("WS register read error: {e}")))
                }
            }
        };
        let _ = ws.close(None).await;
        Ok(response)
    }
}

struct WebSocketSink {
    sink: WsSink,
}

#[async_trait]
impl BridgeStreamSink for WebSocketSink {
    async fn send(&mut self, msg: V2CBridgeMessage) -> VzResult<()> {
        let frame = cbor_encode(&msg)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(frame))
            .await
            .map_err(|e| VzError::Transport(format!("WS write error: {e}")))
    }

    async fn close(&mut self) -> VzResult<()> {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        Ok(())
    }
}

struct WebSocketSource {
    stream: SplitStream<WsStream>,
    sink: WsSink,
}

#[async_trait]
impl BridgeStreamSource for WebSocketSource {
    async fn recv(&mut self) -> VzResult<Option<C2VBridgeMessage>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Binary(data)) => match cbor_decode::<C2VBridgeMessage>(&data) {
                    Ok(envelope) => return Ok(Some(envelope)),
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable bridge frame");
                    }
                },
                Ok(Message::Ping(payload)) => {
                    let mut sink = self.sink.lock().await;
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(_)) => {
                    debug!("WebSocket close frame received");
                    return Ok(None);
                }
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return Ok(None),
                Err(e) => return Err(VzError::Transport(format!("WS read error: {e}"))),
            }
        }
        Ok(None)
    }
}
