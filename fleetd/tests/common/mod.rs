#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fleetd::engine::{Engine, EngineConfig};
use fleetd::provisioner::{NodeProvisioner, ProvisionError, ProvisionSpec};
use fleetd::worker::{PodMetrics, WorkerError, WorkerMetrics, WorkerTransport};
use libplacement::models::NodeHandle;

/// In-memory stand-in for the whole worker fleet. Endpoints are the
/// `mock://<node_id>` handles produced by `MockProvisioner`; individual
/// endpoints can be flipped into rejecting or unreachable modes.
#[derive(Default)]
pub struct MockWorkers {
    pub placed: Mutex<Vec<(String, String, u32)>>,
    pub removed: Mutex<Vec<(String, String)>>,
    rejecting: Mutex<HashSet<String>>,
    unreachable: Mutex<HashSet<String>>,
    metrics: Mutex<BTreeMap<String, WorkerMetrics>>,
}

impl MockWorkers {
    pub fn reject_placements(&self, endpoint: &str) {
        self.rejecting.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn make_unreachable(&self, endpoint: &str) {
        self.unreachable
            .lock()
            .unwrap()
            .insert(endpoint.to_string());
    }

    pub fn set_metrics(&self, endpoint: &str, pods: &[(&str, f64, u32)]) {
        let body: WorkerMetrics = pods
            .iter()
            .map(|(pod_id, cpu_usage, cpu_request)| {
                (
                    pod_id.to_string(),
                    PodMetrics {
                        cpu_usage: *cpu_usage,
                        cpu_request: *cpu_request,
                        restricted: false,
                    },
                )
            })
            .collect();
        self.metrics
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), body);
    }

    pub fn placements(&self) -> Vec<(String, String, u32)> {
        self.placed.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<(String, String)> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerTransport for MockWorkers {
    async fn place_pod(
        &self,
        endpoint: &str,
        pod_id: &str,
        cpu_request: u32,
    ) -> Result<(), WorkerError> {
        if self.unreachable.lock().unwrap().contains(endpoint) {
            return Err(WorkerError::Unreachable(format!(
                "connection refused: {endpoint}"
            )));
        }
        if self.rejecting.lock().unwrap().contains(endpoint) {
            return Err(WorkerError::Rejected(
                "Not enough capacity on node".to_string(),
            ));
        }
        self.placed.lock().unwrap().push((
            endpoint.to_string(),
            pod_id.to_string(),
            cpu_request,
        ));
        Ok(())
    }

    async fn remove_pod(&self, endpoint: &str, pod_id: &str) -> Result<(), WorkerError> {
        if self.unreachable.lock().unwrap().contains(endpoint) {
            return Err(WorkerError::Unreachable(format!(
                "connection refused: {endpoint}"
            )));
        }
        self.removed
            .lock()
            .unwrap()
            .push((endpoint.to_string(), pod_id.to_string()));
        Ok(())
    }

    async fn fetch_metrics(&self, endpoint: &str) -> Result<WorkerMetrics, WorkerError> {
        if self.unreachable.lock().unwrap().contains(endpoint) {
            return Err(WorkerError::Unreachable(format!(
                "connection refused: {endpoint}"
            )));
        }
        Ok(self
            .metrics
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or_default())
    }
}

/// Provisioner that hands out `mock://<node_id>` endpoints, with an
/// optional failure switch for the provision-error path.
#[derive(Default)]
pub struct MockProvisioner {
    pub fail: Mutex<bool>,
    pub decommissioned: Mutex<Vec<String>>,
}

impl MockProvisioner {
    pub fn fail_next(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait]
impl NodeProvisioner for MockProvisioner {
    async fn provision(&self, spec: &ProvisionSpec) -> Result<NodeHandle, ProvisionError> {
        let mut fail = self.fail.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(ProvisionError("container runtime unavailable".to_string()));
        }
        Ok(NodeHandle {
            id: spec.node_id.clone(),
            endpoint: endpoint(&spec.node_id),
        })
    }

    async fn decommission(&self, handle: &NodeHandle) -> Result<(), ProvisionError> {
        self.decommissioned.lock().unwrap().push(handle.id.clone());
        Ok(())
    }
}

pub fn endpoint(node_id: &str) -> String {
    format!("mock://{node_id}")
}

pub fn engine_config(algo: &str) -> EngineConfig {
    EngineConfig {
        policy: algo.parse().expect("valid test policy"),
        auto_scale: false,
        default_node_capacity: 4,
        high_threshold: 80,
        low_threshold: 20,
        heavenly_restriction: false,
        node_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_secs(15),
    }
}

pub struct TestCluster {
    pub engine: Arc<Engine>,
    pub workers: Arc<MockWorkers>,
    pub provisioner: Arc<MockProvisioner>,
}

pub fn cluster(cfg: EngineConfig) -> TestCluster {
    let workers = Arc::new(MockWorkers::default());
    let provisioner = Arc::new(MockProvisioner::default());
    let engine = Arc::new(Engine::new(cfg, provisioner.clone(), workers.clone()));
    TestCluster {
        engine,
        workers,
        provisioner,
    }
}
