//! Wire message types for the bridge stream and the local bus.
//!
//! Two addressing schemes meet here: stream envelopes (`V2CBridgeMessage`,
//! `C2VBridgeMessage`) carry a topic and the session ID, bus envelopes
//! (`V2CMessage`, `C2VMessage`) carry the vizier identity and travel on a
//! subject that already encodes the topic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::any::{AnyMessage, TypedMessage};
use crate::error::VzResult;

// ── Stream envelopes ──────────────────────────────────────────────────

/// Cluster-to-cloud envelope sent on the bridge stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2CBridgeMessage {
    pub topic: String,
    pub session_id: i64,
    pub msg: AnyMessage,
}

impl V2CBridgeMessage {
    /// Pack `msg` under `topic` for session `session_id`.
    pub fn encode<T: TypedMessage>(topic: &str, session_id: i64, msg: &T) -> VzResult<Self> {
        Ok(Self {
            topic: topic.to_string(),
            session_id,
            msg: AnyMessage::pack(msg)?,
        })
    }

    /// Unpack the body as `T`.
    pub fn decode<T: TypedMessage>(&self) -> VzResult<T> {
        self.msg.unpack()
    }
}

/// Cloud-to-cluster envelope received on the bridge stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct C2VBridgeMessage {
    pub topic: String,
    #[serde(default)]
    pub session_id: i64,
    pub msg: AnyMessage,
}

impl C2VBridgeMessage {
    /// Pack `msg` under `topic`.
    pub fn encode<T: TypedMessage>(topic: &str, msg: &T) -> VzResult<Self> {
        Ok(Self {
            topic: topic.to_string(),
            session_id: 0,
            msg: AnyMessage::pack(msg)?,
        })
    }

    /// Unpack the body as `T`.
    pub fn decode<T: TypedMessage>(&self) -> VzResult<T> {
        self.msg.unpack()
    }
}

// ── Bus envelopes ─────────────────────────────────────────────────────

/// Envelope published by in-cluster producers on `<outbound prefix>.<topic>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2CMessage {
    pub vizier_id: String,
    pub session_id: i64,
    pub msg: AnyMessage,
}

/// Envelope published by the bridge on `<inbound prefix>.<topic>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct C2VMessage {
    pub vizier_id: String,
    pub msg: AnyMessage,
}

// ── Registration ──────────────────────────────────────────────────────

/// Cluster identity as reported by the metadata provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_uid: String,
    pub cluster_name: String,
    pub cluster_version: String,
}

/// First envelope on every fresh session (topic `register`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVizierRequest {
    pub vizier_id: Uuid,
    pub jwt_key: String,
    pub address: String,
    pub port: i32,
    pub cluster_info: ClusterInfo,
}

impl TypedMessage for RegisterVizierRequest {
    const TYPE_URL: &'static str = "px.cvmsgs.RegisterVizierRequest";
}

/// Outcome reported in a registration acknowledgment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    #[default]
    Unknown,
    Ok,
    FailedNotFound,
}

/// Cloud reply to a registration (topic `registerAck`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVizierAck {
    pub status: AckStatus,
}

impl TypedMessage for RegisterVizierAck {
    const TYPE_URL: &'static str = "px.cvmsgs.RegisterVizierAck";
}

/// Unary request used to obtain a vizier ID when the cluster has none yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVizierDeploymentRequest {
    pub k8s_cluster_uid: String,
    pub k8s_cluster_name: String,
    pub k8s_cluster_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVizierDeploymentResponse {
    pub vizier_id: Uuid,
}

// ── Heartbeat ─────────────────────────────────────────────────────────

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodPhase {
    #[default]
    Unknown,
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    pub name: String,
    pub status: PodPhase,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub reason: String,
}

/// Overall cluster health carried in a heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VizierStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Degraded,
}

/// Periodic status report (topic `heartbeat`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VizierHeartbeat {
    pub vizier_id: Uuid,
    pub time_ns: i64,
    pub sequence_number: i64,
    pub address: String,
    pub port: i32,
    pub status: VizierStatus,
    #[serde(default)]
    pub unhealthy_reason: String,
    pub pod_statuses: HashMap<String, PodStatus>,
    pub pod_statuses_last_updated_ns: i64,
    pub num_nodes: i32,
    pub num_instrumented_nodes: i32,
}

impl TypedMessage for VizierHeartbeat {
    const TYPE_URL: &'static str = "px.cvmsgs.VizierHeartbeat";
}

// ── Application payloads ──────────────────────────────────────────────

/// Forwarded log chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VLogMessage {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl TypedMessage for VLogMessage {
    const TYPE_URL: &'static str = "px.cvmsgs.VLogMessage";
}
