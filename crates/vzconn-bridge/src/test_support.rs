//! Fake collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use vzconn_core::messages::{ClusterInfo, PodPhase, PodStatus};
use vzconn_core::{VzError, VzResult};

use crate::vizier::{K8sState, StatusChecker, VizierInfo};

pub const CLUSTER_UID: &str = "084cb5f0-ff69-11e9-a63e-42010a8a0193";
pub const CLUSTER_NAME: &str = "test-cluster";
pub const CLUSTER_VERSION: &str = "v1.14.10-gke.27";

pub struct FakeVizierInfo {
    address: Mutex<(String, i32)>,
    fail_address: AtomicBool,
}

impl FakeVizierInfo {
    pub fn new(address: &str, port: i32) -> Self {
        Self {
            address: Mutex::new((address.to_string(), port)),
            fail_address: AtomicBool::new(false),
        }
    }

    pub fn set_address(&self, address: &str, port: i32) {
        *self.address.lock().unwrap() = (address.to_string(), port);
    }

    pub fn fail_address(&self, fail: bool) {
        self.fail_address.store(fail, Ordering::SeqCst);
    }
}

impl VizierInfo for FakeVizierInfo {
    fn address(&self) -> VzResult<(String, i32)> {
        if self.fail_address.load(Ordering::SeqCst) {
            return Err(VzError::Metadata("no external address yet".into()));
        }
        Ok(self.address.lock().unwrap().clone())
    }

    fn cluster_info(&self) -> VzResult<ClusterInfo> {
        Ok(ClusterInfo {
            cluster_uid: CLUSTER_UID.into(),
            cluster_name: CLUSTER_NAME.into(),
            cluster_version: CLUSTER_VERSION.into(),
        })
    }

    fn k8s_state(&self) -> K8sState {
        let mut pod_statuses = HashMap::new();
        pod_statuses.insert(
            "vizier-query-broker".to_string(),
            PodStatus {
                name: "vizier-query-broker".into(),
                status: PodPhase::Running,
                ..Default::default()
            },
        );
        K8sState {
            pod_statuses,
            num_nodes: 3,
            num_instrumented_nodes: 2,
            last_updated: UNIX_EPOCH + Duration::from_secs(2),
        }
    }
}

pub struct FakeChecker {
    at: Option<SystemTime>,
}

impl FakeChecker {
    /// Reports success as of the moment it is asked.
    pub fn fresh() -> Self {
        Self { at: None }
    }

    pub fn at(t: SystemTime) -> Self {
        Self { at: Some(t) }
    }
}

impl StatusChecker for FakeChecker {
    fn status(&self) -> VzResult<SystemTime> {
        Ok(self.at.unwrap_or_else(SystemTime::now))
    }
}

pub struct FailingChecker(pub String);

impl StatusChecker for FailingChecker {
    fn status(&self) -> VzResult<SystemTime> {
        Err(VzError::Other(self.0.clone()))
    }
}
