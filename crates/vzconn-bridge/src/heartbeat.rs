//! Heartbeat source and emitter.
//!
//! The source polls the metadata provider and liveness checker on every tick;
//! nothing is cached between heartbeats and a heartbeat that cannot be built
//! or sent is simply skipped.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;
use vzconn_core::messages::{V2CBridgeMessage, VizierHeartbeat, VizierStatus};
use vzconn_core::topics::HEARTBEAT;
use vzconn_core::VzResult;

use crate::session::unix_nanos;
use crate::vizier::{StatusChecker, VizierInfo};

/// Builds successive heartbeats for one session.
pub struct HeartbeatSource {
    vizier_id: Uuid,
    vz_info: Arc<dyn VizierInfo>,
    checker: Arc<dyn StatusChecker>,
    stale_after: Duration,
    sequence: i64,
}

impl HeartbeatSource {
    pub fn new(
        vizier_id: Uuid,
        vz_info: Arc<dyn VizierInfo>,
        checker: Arc<dyn StatusChecker>,
        stale_after: Duration,
    ) -> Self {
        Self {
            vizier_id,
            vz_info,
            checker,
            stale_after,
            sequence: 0,
        }
    }

    /// Poll the providers and build the next heartbeat.
    ///
    /// The sequence number only advances when a heartbeat is produced.
    pub fn next_heartbeat(&mut self) -> VzResult<VizierHeartbeat> {
        let (address, port) = self.vz_info.address()?;
        let k8s = self.vz_info.k8s_state();
        let now = SystemTime::now();
        let (status, unhealthy_reason) = self.health(now);

        self.sequence += 1;
        Ok(VizierHeartbeat {
            vizier_id: self.vizier_id,
            time_ns: unix_nanos(now),
            sequence_number: self.sequence,
            address,
            port,
            status,
            unhealthy_reason,
            pod_statuses: k8s.pod_statuses,
            pod_statuses_last_updated_ns: unix_nanos(k8s.last_updated),
            num_nodes: k8s.num_nodes,
            num_instrumented_nodes: k8s.num_instrumented_nodes,
        })
    }

    fn health(&self, now: SystemTime) -> (VizierStatus, String) {
        match self.checker.status() {
            Ok(last_good) => {
                let age = now.duration_since(last_good).unwrap_or_default();
                if age > self.stale_after {
                    (
                        VizierStatus::Degraded,
                        format!("last successful status check {}s ago", age.as_secs()),
                    )
                } else {
                    (VizierStatus::Healthy, String::new())
                }
            }
            Err(e) => (VizierStatus::Unhealthy, e.to_string()),
        }
    }
}

/// Emit a heartbeat every `interval` until cancelled.
///
/// Returns when the send queue closes; the writer reports why.
pub(crate) async fn run_heartbeat(
    mut source: HeartbeatSource,
    session_id: i64,
    interval: Duration,
    tx: mpsc::Sender<V2CBridgeMessage>,
    cancel: CancellationToken,
) -> VzResult<()> {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let envelope = match source
            .next_heartbeat()
            .and_then(|hb| V2CBridgeMessage::encode(HEARTBEAT, session_id, &hb))
        {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "skipping heartbeat");
                continue;
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            sent = tx.send(envelope) => {
                if sent.is_err() {
                    debug!("send queue closed, heartbeat loop ending");
                    break;
                }
            }
        }
    }

    debug!("heartbeat loop ended");
    Ok(())
}
