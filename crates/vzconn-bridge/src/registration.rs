//! Registration handshake bookkeeping.
//!
//! The bridge sends its registration and moves on without waiting; the ack
//! arrives later through the inbound relay and lands in a `watch` channel.
//! The optional watchdog resends the registration when no OK ack shows up.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vzconn_core::messages::{AckStatus, RegisterVizierAck, RegisterVizierRequest, V2CBridgeMessage};
use vzconn_core::topics::REGISTER;
use vzconn_core::VzResult;

use crate::config::RegistrationPolicy;
use crate::vizier::VizierInfo;

/// Where the registration handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Sent (or about to be), no ack yet.
    Pending,
    /// The cloud accepted the registration.
    Registered,
    /// The cloud answered with a non-OK status. The session keeps running.
    Rejected(AckStatus),
}

impl RegistrationState {
    pub fn is_registered(self) -> bool {
        self == RegistrationState::Registered
    }
}

/// Builds registration envelopes from live cluster metadata.
#[derive(Clone)]
pub struct RegistrationBuilder {
    vizier_id: Uuid,
    jwt: String,
    session_id: i64,
    vz_info: Arc<dyn VizierInfo>,
}

impl RegistrationBuilder {
    pub fn new(
        vizier_id: Uuid,
        jwt: String,
        session_id: i64,
        vz_info: Arc<dyn VizierInfo>,
    ) -> Self {
        Self {
            vizier_id,
            jwt,
            session_id,
            vz_info,
        }
    }

    /// Query the provider now and build the request.
    pub fn request(&self) -> VzResult<RegisterVizierRequest> {
        let (address, port) = self.vz_info.address()?;
        let cluster_info = self.vz_info.cluster_info()?;
        Ok(RegisterVizierRequest {
            vizier_id: self.vizier_id,
            jwt_key: self.jwt.clone(),
            address,
            port,
            cluster_info,
        })
    }

    /// The `register` envelope for this session.
    pub fn envelope(&self) -> VzResult<V2CBridgeMessage> {
        V2CBridgeMessage::encode(REGISTER, self.session_id, &self.request()?)
    }
}

/// Record an ack received on the stream.
pub(crate) fn record_ack(state: &watch::Sender<RegistrationState>, ack: &RegisterVizierAck) {
    let next = match ack.status {
        AckStatus::Ok => {
            info!("vizier registered");
            RegistrationState::Registered
        }
        status => {
            warn!(?status, "registration rejected");
            RegistrationState::Rejected(status)
        }
    };
    state.send_replace(next);
}

/// Resend the registration until it is acknowledged or retries run out.
pub(crate) async fn run_watchdog(
    builder: RegistrationBuilder,
    policy: RegistrationPolicy,
    mut state: watch::Receiver<RegistrationState>,
    tx: mpsc::Sender<V2CBridgeMessage>,
    cancel: CancellationToken,
) {
    for attempt in 1..=policy.max_retries {
        let acked = tokio::select! {
            () = cancel.cancelled() => return,
            waited = time::timeout(policy.ack_timeout, state.wait_for(|s| s.is_registered())) => {
                matches!(waited, Ok(Ok(_)))
            }
        };
        if acked {
            return;
        }
        if cancel.is_cancelled() {
            return;
        }

        let envelope = match builder.envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(attempt, error = %e, "cannot rebuild registration");
                continue;
            }
        };
        warn!(attempt, max = policy.max_retries, "no registration ack, resending");
        tokio::select! {
            () = cancel.cancelled() => return,
            sent = tx.send(envelope) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
    debug!("registration watchdog finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeVizierInfo, CLUSTER_NAME, CLUSTER_UID, CLUSTER_VERSION};
    use std::time::Duration;
    use vzconn_core::VzError;

    fn builder(info: Arc<FakeVizierInfo>) -> RegistrationBuilder {
        RegistrationBuilder::new(Uuid::from_u128(7), "jwt-key".into(), 99, info)
    }

    #[test]
    fn envelope_carries_identity_and_metadata() {
        let env = builder(Arc::new(FakeVizierInfo::new("foobar", 123)))
            .envelope()
            .unwrap();
        assert_eq!(env.topic, "register");
        assert_eq!(env.session_id, 99);

        let req: RegisterVizierRequest = env.decode().unwrap();
        assert_eq!(req.vizier_id, Uuid::from_u128(7));
        assert_eq!(req.jwt_key, "jwt-key");
        assert_eq!(req.address, "foobar");
        assert_eq!(req.port, 123);
        assert_eq!(req.cluster_info.cluster_uid, CLUSTER_UID);
        assert_eq!(req.cluster_info.cluster_name, CLUSTER_NAME);
        assert_eq!(req.cluster_info.cluster_version, CLUSTER_VERSION);
    }

    #[test]
    fn metadata_is_read_at_build_time() {
        let info = Arc::new(FakeVizierInfo::new("before", 1));
        let b = builder(info.clone());
        info.set_address("after", 2);
        let req = b.request().unwrap();
        assert_eq!(req.address, "after");
        assert_eq!(req.port, 2);
    }

    #[test]
    fn metadata_failure_propagates() {
        let info = Arc::new(FakeVizierInfo::new("foobar", 123));
        info.fail_address(true);
        assert!(matches!(
            builder(info).envelope(),
            Err(VzError::Metadata(_))
        ));
    }

    #[test]
    fn acks_update_state() {
        let (tx, rx) = watch::channel(RegistrationState::Pending);
        record_ack(&tx, &RegisterVizierAck { status: AckStatus::FailedNotFound });
        assert_eq!(
            *rx.borrow(),
            RegistrationState::Rejected(AckStatus::FailedNotFound)
        );
        record_ack(&tx, &RegisterVizierAck { status: AckStatus::Ok });
        assert!(rx.borrow().is_registered());
    }

    #[tokio::test]
    async fn watchdog_resends_until_retries_exhausted() {
        let (_state_tx, state_rx) = watch::channel(RegistrationState::Pending);
        let (tx, mut rx) = mpsc::channel(8);
        let policy = RegistrationPolicy {
            ack_timeout: Duration::from_millis(10),
            max_retries: 2,
        };
        run_watchdog(
            builder(Arc::new(FakeVizierInfo::new("foobar", 123))),
            policy,
            state_rx,
            tx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(rx.recv().await.unwrap().topic, "register");
        assert_eq!(rx.recv().await.unwrap().topic, "register");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn watchdog_stops_once_registered() {
        let (state_tx, state_rx) = watch::channel(RegistrationState::Pending);
        let (tx, mut rx) = mpsc::channel(8);
        state_tx.send_replace(RegistrationState::Registered);
        let policy = RegistrationPolicy {
            ack_timeout: Duration::from_millis(10),
            max_retries: 5,
        };
        run_watchdog(
            builder(Arc::new(FakeVizierInfo::new("foobar", 123))),
            policy,
            state_rx,
            tx,
            CancellationToken::new(),
        )
        .await;
        assert!(rx.try_recv().is_err());
    }
}
