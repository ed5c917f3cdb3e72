//! Read-only views of the cluster the bridge reports on.
//!
//! Both traits are implemented outside this crate (Kubernetes metadata,
//! liveness probes); the bridge only calls the accessors below.

use std::collections::HashMap;
use std::time::SystemTime;

use vzconn_core::messages::{ClusterInfo, PodStatus};
use vzconn_core::VzResult;

/// Point-in-time pod and node status.
#[derive(Debug, Clone)]
pub struct K8sState {
    pub pod_statuses: HashMap<String, PodStatus>,
    pub num_nodes: i32,
    pub num_instrumented_nodes: i32,
    pub last_updated: SystemTime,
}

/// Cluster metadata provider.
pub trait VizierInfo: Send + Sync {
    /// Externally reachable address and port of the cluster's query endpoint.
    fn address(&self) -> VzResult<(String, i32)>;

    /// Cluster UID, name, and version.
    fn cluster_info(&self) -> VzResult<ClusterInfo>;

    /// Latest known pod and node status.
    fn k8s_state(&self) -> K8sState;
}

/// Liveness checker.
pub trait StatusChecker: Send + Sync {
    /// Time of the last successful check, or why the last check failed.
    fn status(&self) -> VzResult<SystemTime>;
}
