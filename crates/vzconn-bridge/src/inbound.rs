//! Inbound relay: bridge stream → local bus.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vzconn_core::messages::{C2VBridgeMessage, C2VMessage, RegisterVizierAck};
use vzconn_core::topics::{subject, REGISTER_ACK};
use vzconn_core::{cbor_encode, BridgeStreamSource, VzResult};

use crate::bus::MessageBus;
use crate::registration::{record_ack, RegistrationState};

/// What the relay does with one envelope.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// Registration ack, consumed by the bridge.
    RegisterAck,
    /// Republish on this bus subject.
    Publish(String),
    /// Unroutable, dropped.
    Drop,
}

/// Decide where an envelope goes.
pub fn route(prefix: &str, topic: &str) -> Route {
    match topic {
        REGISTER_ACK => Route::RegisterAck,
        "" => Route::Drop,
        t if t.contains(['*', '>']) => Route::Drop,
        t => Route::Publish(subject(prefix, t)),
    }
}

pub(crate) struct InboundRelay {
    pub prefix: String,
    pub vizier_id: String,
    pub bus: Arc<dyn MessageBus>,
    pub registration: watch::Sender<RegistrationState>,
}

impl InboundRelay {
    /// Read the stream until it ends, fails, or the session is cancelled.
    ///
    /// End of stream returns `Ok`; a receive error is returned as is.
    pub(crate) async fn run(
        self,
        mut source: Box<dyn BridgeStreamSource>,
        cancel: CancellationToken,
    ) -> VzResult<()> {
        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => break,
                r = source.recv() => r,
            };
            match received {
                Ok(Some(msg)) => {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = self.handle(msg) => {}
                    }
                }
                Ok(None) => {
                    info!("bridge stream closed by remote");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "bridge stream receive failed");
                    return Err(e);
                }
            }
        }
        debug!("inbound relay ended");
        Ok(())
    }

    async fn handle(&self, msg: C2VBridgeMessage) {
        match route(&self.prefix, &msg.topic) {
            Route::RegisterAck => match msg.decode::<RegisterVizierAck>() {
                Ok(ack) => record_ack(&self.registration, &ack),
                Err(e) => warn!(error = %e, "dropping malformed registration ack"),
            },
            Route::Publish(subject) => {
                debug!(topic = %msg.topic, "relaying inbound message");
                let envelope = C2VMessage {
                    vizier_id: self.vizier_id.clone(),
                    msg: msg.msg,
                };
                let published = match cbor_encode(&envelope) {
                    Ok(data) => self.bus.publish(&subject, data).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = published {
                    warn!(subject = %subject, error = %e, "dropping inbound message");
                }
            }
            Route::Drop => {
                warn!(topic = %msg.topic, "dropping inbound message with unusable topic");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::transport::ChannelClient;
    use std::time::Duration;
    use vzconn_core::messages::{AckStatus, VLogMessage};
    use vzconn_core::{cbor_decode, VzConnClient, VzError};

    #[test]
    fn routing() {
        assert_eq!(route("c2v", "registerAck"), Route::RegisterAck);
        assert_eq!(
            route("c2v", "randomtopicNeedsResponseAck"),
            Route::Publish("c2v.randomtopicNeedsResponseAck".into())
        );
        assert_eq!(route("c2v", ""), Route::Drop);
        assert_eq!(route("c2v", "a.*"), Route::Drop);
    }

    struct Harness {
        bus: LocalBus,
        registration: watch::Receiver<RegistrationState>,
        remote: crate::transport::RemoteEndpoint,
        handle: tokio::task::JoinHandle<VzResult<()>>,
        cancel: CancellationToken,
    }

    async fn start() -> Harness {
        let bus = LocalBus::new();
        let (client, mut acceptor) = ChannelClient::new();
        let stream = client.open_bridge("jwt").await.unwrap();
        let remote = acceptor.accept().await.unwrap();
        let (reg_tx, reg_rx) = watch::channel(RegistrationState::Pending);
        let relay = InboundRelay {
            prefix: "c2v".into(),
            vizier_id: "vz-1".into(),
            bus: Arc::new(bus.clone()),
            registration: reg_tx,
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay.run(stream.source, cancel.clone()));
        Harness {
            bus,
            registration: reg_rx,
            remote,
            handle,
            cancel,
        }
    }

    #[tokio::test]
    async fn republishes_application_messages() {
        let h = start().await;
        let mut sub = h.bus.subscribe("c2v.*").await.unwrap();
        let log = VLogMessage {
            data: b"Foobar".to_vec(),
        };
        h.remote
            .send(C2VBridgeMessage::encode("randomtopicNeedsResponseAck", &log).unwrap())
            .await
            .unwrap();

        let got = sub.next().await.unwrap();
        assert_eq!(got.subject, "c2v.randomtopicNeedsResponseAck");
        let c2v: C2VMessage = cbor_decode(&got.data).unwrap();
        assert_eq!(c2v.vizier_id, "vz-1");
        assert_eq!(c2v.msg.unpack::<VLogMessage>().unwrap(), log);

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn consumes_register_ack() {
        let mut h = start().await;
        let mut sub = h.bus.subscribe("c2v.>").await.unwrap();
        h.remote
            .send(
                C2VBridgeMessage::encode(
                    "registerAck",
                    &RegisterVizierAck {
                        status: AckStatus::Ok,
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap();

        h.registration
            .wait_for(|s| s.is_registered())
            .await
            .unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(50), sub.next())
            .await
            .is_err());

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_ack_is_dropped() {
        let h = start().await;
        h.remote
            .send(C2VBridgeMessage::encode("registerAck", &VLogMessage { data: vec![] }).unwrap())
            .await
            .unwrap();
        // Follow with a routable message to know the ack was processed.
        let mut sub = h.bus.subscribe("c2v.*").await.unwrap();
        h.remote
            .send(C2VBridgeMessage::encode("after", &VLogMessage { data: vec![1] }).unwrap())
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().subject, "c2v.after");
        assert_eq!(*h.registration.borrow(), RegistrationState::Pending);

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn republishes_in_receive_order() {
        let h = start().await;
        let mut sub = h.bus.subscribe("c2v.*").await.unwrap();
        for i in 0u8..5 {
            let log = VLogMessage { data: vec![i] };
            let env = C2VBridgeMessage::encode(&format!("t{i}"), &log).unwrap();
            h.remote.send(env).await.unwrap();
        }
        for i in 0u8..5 {
            let got = sub.next().await.unwrap();
            assert_eq!(got.subject, format!("c2v.t{i}"));
            let c2v: C2VMessage = cbor_decode(&got.data).unwrap();
            assert_eq!(c2v.msg.unpack::<VLogMessage>().unwrap().data, vec![i]);
        }

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancel_unblocks_a_stuck_publish() {
        let bus = LocalBus::with_capacity(1);
        let (client, mut acceptor) = ChannelClient::new();
        let stream = client.open_bridge("jwt").await.unwrap();
        let remote = acceptor.accept().await.unwrap();
        let (reg_tx, _reg_rx) = watch::channel(RegistrationState::Pending);
        let relay = InboundRelay {
            prefix: "c2v".into(),
            vizier_id: "vz-1".into(),
            bus: Arc::new(bus.clone()),
            registration: reg_tx,
        };
        // Never read, so the second publish waits on a full queue.
        let _slow = bus.subscribe("c2v.*").await.unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay.run(stream.source, cancel.clone()));

        for _ in 0..2 {
            remote
                .send(C2VBridgeMessage::encode("busy", &VLogMessage { data: vec![] }).unwrap())
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn end_of_stream_is_clean() {
        let h = start().await;
        h.remote.close();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn receive_error_is_returned() {
        let h = start().await;
        h.remote
            .fail(VzError::Transport("connection reset".into()))
            .await;
        let result = h.handle.await.unwrap();
        assert!(matches!(result, Err(VzError::Transport(_))));
    }
}
