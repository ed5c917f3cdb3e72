//! The bridge controller.
//!
//! One `Bridge` drives one session: it resolves the vizier ID, opens the
//! stream, sends the registration, then supervises the relays until the
//! session ends. Every task that writes to the stream goes through a bounded
//! queue drained by a single writer task, which owns the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vzconn_core::messages::{RegisterVizierDeploymentRequest, V2CBridgeMessage};
use vzconn_core::topics::wildcard;
use vzconn_core::{BridgeStream, BridgeStreamSink, VzConnClient, VzError, VzResult};

use crate::bus::MessageBus;
use crate::config::BridgeConfig;
use crate::heartbeat::{run_heartbeat, HeartbeatSource};
use crate::inbound::InboundRelay;
use crate::outbound::run_outbound;
use crate::registration::{run_watchdog, RegistrationBuilder, RegistrationState};
use crate::session::BridgeState;
use crate::vizier::{StatusChecker, VizierInfo};

/// Relays between the local bus and one cloud bridge stream.
pub struct Bridge {
    vizier_id: Uuid,
    jwt: String,
    label: Option<String>,
    session_id: i64,
    client: Arc<dyn VzConnClient>,
    vz_info: Arc<dyn VizierInfo>,
    bus: Arc<dyn MessageBus>,
    checker: Arc<dyn StatusChecker>,
    config: BridgeConfig,
    cancel: CancellationToken,
    state_tx: watch::Sender<BridgeState>,
    registration_tx: watch::Sender<RegistrationState>,
    resolved_id: OnceLock<Uuid>,
    /// Set once `run_stream` has claimed the session.
    started: AtomicBool,
}

impl Bridge {
    /// Create a bridge with the default configuration.
    ///
    /// A nil `vizier_id` makes the session obtain one through deployment
    /// registration before opening the stream.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vizier_id: Uuid,
        jwt: impl Into<String>,
        label: Option<String>,
        session_id: i64,
        client: Arc<dyn VzConnClient>,
        vz_info: Arc<dyn VizierInfo>,
        bus: Arc<dyn MessageBus>,
        checker: Arc<dyn StatusChecker>,
    ) -> VzResult<Self> {
        Self::with_config(
            vizier_id,
            jwt,
            label,
            session_id,
            client,
            vz_info,
            bus,
            checker,
            BridgeConfig::default(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_config(
        vizier_id: Uuid,
        jwt: impl Into<String>,
        label: Option<String>,
        session_id: i64,
        client: Arc<dyn VzConnClient>,
        vz_info: Arc<dyn VizierInfo>,
        bus: Arc<dyn MessageBus>,
        checker: Arc<dyn StatusChecker>,
        config: BridgeConfig,
    ) -> VzResult<Self> {
        let jwt = jwt.into();
        if jwt.is_empty() {
            return Err(VzError::InvalidArgument("jwt must not be empty".into()));
        }
        config.validate()?;

        let (state_tx, _) = watch::channel(BridgeState::Idle);
        let (registration_tx, _) = watch::channel(RegistrationState::Pending);
        Ok(Self {
            vizier_id,
            jwt,
            label,
            session_id,
            client,
            vz_info,
            bus,
            checker,
            config,
            cancel: CancellationToken::new(),
            state_tx,
            registration_tx,
            resolved_id: OnceLock::new(),
            started: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// The vizier ID in use: the resolved one once deployment registration
    /// ran, the constructor's otherwise.
    pub fn vizier_id(&self) -> Uuid {
        self.resolved_id.get().copied().unwrap_or(self.vizier_id)
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    pub fn registration(&self) -> RegistrationState {
        *self.registration_tx.borrow()
    }

    pub fn subscribe_registration(&self) -> watch::Receiver<RegistrationState> {
        self.registration_tx.subscribe()
    }

    /// Request shutdown. Safe to call any number of times from anywhere.
    pub fn stop(&self) {
        self.cancel.cancel();
        // A session that never started goes straight to its final state.
        let closed = self.state_tx.send_if_modified(|s| {
            if *s == BridgeState::Idle {
                *s = BridgeState::Closed;
                true
            } else {
                false
            }
        });
        if closed {
            info!(session_id = self.session_id, "bridge stopped before it started");
        }
    }

    /// Run the session until it is stopped, the remote ends the stream, or a
    /// fatal error occurs.
    ///
    /// Can only be called once per bridge. A bridge stopped before it ever
    /// ran returns `Ok(())` right away.
    pub async fn run_stream(&self) -> VzResult<()> {
        let started = self.state_tx.send_if_modified(|s| {
            if *s == BridgeState::Idle {
                *s = BridgeState::Connecting;
                self.started.store(true, Ordering::SeqCst);
                true
            } else {
                false
            }
        });
        if !started {
            if !self.started.load(Ordering::SeqCst) && self.cancel.is_cancelled() {
                debug!(session_id = self.session_id, "bridge was stopped before it ran");
                return Ok(());
            }
            return Err(VzError::InvalidState(format!(
                "bridge session is already {}",
                self.state()
            )));
        }
        info!(
            session_id = self.session_id,
            label = self.label.as_deref().unwrap_or(""),
            "bridge session starting"
        );

        let result = self.run_session().await;
        self.advance(BridgeState::Closed);
        match &result {
            Ok(()) => info!(session_id = self.session_id, "bridge session closed"),
            Err(e) => error!(session_id = self.session_id, error = %e, "bridge session failed"),
        }
        result
    }

    async fn run_session(&self) -> VzResult<()> {
        let connect = async {
            let vizier_id = self.resolve_vizier_id().await?;
            let stream = self.client.open_bridge(&self.jwt).await?;
            Ok::<_, VzError>((vizier_id, stream))
        };
        let (vizier_id, stream) = tokio::select! {
            () = self.cancel.cancelled() => {
                info!(session_id = self.session_id, "stopped while connecting");
                return Ok(());
            }
            connected = connect => connected?,
        };
        info!(session_id = self.session_id, %vizier_id, "bridge stream opened");
        let BridgeStream { mut sink, source } = stream;

        self.advance(BridgeState::Registering);
        let builder = RegistrationBuilder::new(
            vizier_id,
            self.jwt.clone(),
            self.session_id,
            self.vz_info.clone(),
        );
        let registered = match builder.envelope() {
            Ok(envelope) => tokio::select! {
                () = self.cancel.cancelled() => None,
                sent = sink.send(envelope) => Some(sent),
            },
            Err(e) => Some(Err(e)),
        };
        match registered {
            Some(Ok(())) => debug!(session_id = self.session_id, "registration sent"),
            Some(Err(e)) => {
                self.close_sink(sink).await;
                return Err(e);
            }
            None => {
                info!(session_id = self.session_id, "stopped while registering");
                self.advance(BridgeState::Draining);
                self.close_sink(sink).await;
                return Ok(());
            }
        }

        let pattern = wildcard(&self.config.outbound_prefix);
        let subscribed = tokio::select! {
            () = self.cancel.cancelled() => None,
            subscribed = self.bus.subscribe(&pattern) => Some(subscribed),
        };
        let subscription = match subscribed {
            Some(Ok(subscription)) => subscription,
            Some(Err(e)) => {
                self.close_sink(sink).await;
                return Err(e);
            }
            None => {
                info!(session_id = self.session_id, "stopped while subscribing");
                self.advance(BridgeState::Draining);
                self.close_sink(sink).await;
                return Ok(());
            }
        };

        let session = self.cancel.child_token();
        let (tx, rx) = mpsc::channel(self.config.send_queue_capacity);
        let mut tasks = JoinSet::new();
        tasks.spawn(run_writer(sink, rx, session.clone()));
        tasks.spawn(run_outbound(
            subscription,
            self.config.outbound_prefix.clone(),
            self.session_id,
            tx.clone(),
            session.clone(),
        ));
        let inbound = InboundRelay {
            prefix: self.config.inbound_prefix.clone(),
            vizier_id: vizier_id.to_string(),
            bus: self.bus.clone(),
            registration: self.registration_tx.clone(),
        };
        tasks.spawn(inbound.run(source, session.clone()));
        let heartbeats = HeartbeatSource::new(
            vizier_id,
            self.vz_info.clone(),
            self.checker.clone(),
            self.config.status_stale_after,
        );
        tasks.spawn(run_heartbeat(
            heartbeats,
            self.session_id,
            self.config.heartbeat_interval,
            tx.clone(),
            session.clone(),
        ));
        let watchdog = (self.config.registration.max_retries > 0).then(|| {
            tokio::spawn(run_watchdog(
                builder,
                self.config.registration.clone(),
                self.registration_tx.subscribe(),
                tx.clone(),
                session.clone(),
            ))
        });
        drop(tx);
        self.advance(BridgeState::Active);
        info!(session_id = self.session_id, "bridge active");

        let mut first_err = None;
        tokio::select! {
            () = self.cancel.cancelled() => {
                info!(session_id = self.session_id, "stop requested");
            }
            Some(joined) = tasks.join_next() => record(self.session_id, &mut first_err, joined),
        }

        self.advance(BridgeState::Draining);
        session.cancel();
        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                record(self.session_id, &mut first_err, joined);
            }
        };
        if time::timeout(self.config.drain_timeout, drain).await.is_err() {
            warn!(
                session_id = self.session_id,
                "bridge tasks did not finish in time, aborting"
            );
            tasks.shutdown().await;
        }
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn resolve_vizier_id(&self) -> VzResult<Uuid> {
        if !self.vizier_id.is_nil() {
            return Ok(self.vizier_id);
        }
        if let Some(id) = self.resolved_id.get() {
            return Ok(*id);
        }

        let info = self.vz_info.cluster_info()?;
        let req = RegisterVizierDeploymentRequest {
            k8s_cluster_uid: info.cluster_uid,
            k8s_cluster_name: info.cluster_name,
            k8s_cluster_version: info.cluster_version,
        };
        let resp = self
            .client
            .register_vizier_deployment(&self.jwt, req)
            .await?;
        if resp.vizier_id.is_nil() {
            return Err(VzError::Transport(
                "deployment registration returned a nil vizier ID".into(),
            ));
        }
        info!(vizier_id = %resp.vizier_id, "vizier deployment registered");
        Ok(*self.resolved_id.get_or_init(|| resp.vizier_id))
    }

    /// Close a sink the writer never took over. Bounded by the drain timeout.
    async fn close_sink(&self, mut sink: Box<dyn BridgeStreamSink>) {
        match time::timeout(self.config.drain_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(session_id = self.session_id, error = %e, "closing bridge stream");
            }
            Err(_) => {
                warn!(session_id = self.session_id, "bridge stream did not close in time");
            }
        }
    }

    /// Move the state forward; never backward.
    fn advance(&self, next: BridgeState) {
        self.state_tx.send_if_modified(|s| {
            if next > *s {
                debug!(session_id = self.session_id, from = %s, to = %next, "bridge state");
                *s = next;
                true
            } else {
                false
            }
        });
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("vizier_id", &self.vizier_id())
            .field("label", &self.label)
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Keep the first error across all session tasks.
fn record(
    session_id: i64,
    first_err: &mut Option<VzError>,
    joined: Result<VzResult<()>, JoinError>,
) {
    let err = match joined {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) if e.is_cancelled() => return,
        Err(e) => VzError::Other(format!("bridge task panicked: {e}")),
    };
    if first_err.is_none() {
        error!(session_id, error = %err, "bridge task failed");
        *first_err = Some(err);
    } else {
        debug!(session_id, error = %err, "bridge task failed after teardown began");
    }
}

/// Sole owner of the stream sink. Sends queued envelopes in order.
async fn run_writer(
    mut sink: Box<dyn BridgeStreamSink>,
    mut rx: mpsc::Receiver<V2CBridgeMessage>,
    cancel: CancellationToken,
) -> VzResult<()> {
    let result = loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            msg = rx.recv() => msg,
        };
        let Some(msg) = msg else {
            break Ok(());
        };
        let sent = tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            sent = sink.send(msg) => sent,
        };
        if let Err(e) = sent {
            break Err(e);
        }
    };

    if let Err(e) = sink.close().await {
        debug!(error = %e, "closing bridge stream");
    }
    debug!("stream writer ended");
    result
}
