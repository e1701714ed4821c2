use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use uuid::Uuid;

use libplacement::algorithms::Policy;
use libplacement::index::PlacementIndex;
use libplacement::models::{NodeObservation, NodeSnapshot, PendingPod};
use libplacement::pending::PendingQueue;
use libplacement::registry::{PollTarget, Registry};

use crate::aggregator::ClusterStatus;
use crate::config::Config;
use crate::error::EngineError;
use crate::provisioner::{NodeProvisioner, ProvisionSpec};
use crate::worker::{WorkerError, WorkerTransport};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: Policy,
    pub auto_scale: bool,
    pub default_node_capacity: u32,
    pub high_threshold: u32,
    pub low_threshold: u32,
    pub heavenly_restriction: bool,
    pub node_timeout: Duration,
    pub poll_interval: Duration,
}

impl EngineConfig {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            policy: cfg.policy()?,
            auto_scale: cfg.auto_scale,
            default_node_capacity: cfg.default_node_capacity,
            high_threshold: cfg.auto_scale_high_threshold,
            low_threshold: cfg.auto_scale_low_threshold,
            heavenly_restriction: cfg.heavenly_restriction,
            node_timeout: Duration::from_secs(cfg.node_timeout_secs),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AddNodeOutcome {
    pub node_id: String,
    pub capacity: u32,
    pub auto_scaled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchOutcome {
    pub pod_id: String,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RescheduledPod {
    pub pod_id: String,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedReschedule {
    pub pod_id: String,
    pub cpu_request: u32,
}

/// Outcome of a node removal: what moved where, and what ended up queued.
#[derive(Debug, Clone, Serialize)]
pub struct RemovalReport {
    pub removed: String,
    pub rescheduled: Vec<RescheduledPod>,
    pub failed: Vec<FailedReschedule>,
    pub partial: bool,
}

struct Placement {
    node_id: String,
    auto_scaled: bool,
}

fn transport_error(node_id: &str, err: WorkerError) -> EngineError {
    match err {
        WorkerError::Rejected(reason) => EngineError::WorkerRejection {
            node_id: node_id.to_string(),
            reason,
        },
        WorkerError::Unreachable(reason) => EngineError::Transport {
            node_id: node_id.to_string(),
            reason,
        },
    }
}

fn positive_u32(value: i64, what: &str) -> Result<u32, EngineError> {
    if value <= 0 || value > i64::from(u32::MAX) {
        return Err(EngineError::Validation(format!(
            "{what} must be a positive integer"
        )));
    }
    Ok(value as u32)
}

/// The lifecycle engine: admission, placement, node add/remove with
/// rescheduling, and the pending queue. The registry and the queue each
/// sit behind their own mutex; neither lock is ever held across worker or
/// provisioner I/O. Operations snapshot under the lock, decide, release,
/// perform I/O, then re-acquire to commit or roll back.
pub struct Engine {
    cfg: EngineConfig,
    registry: Mutex<Registry>,
    pending: Mutex<PendingQueue>,
    provisioner: Arc<dyn NodeProvisioner>,
    transport: Arc<dyn WorkerTransport>,
    status_tx: watch::Sender<Arc<ClusterStatus>>,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        provisioner: Arc<dyn NodeProvisioner>,
        transport: Arc<dyn WorkerTransport>,
    ) -> Self {
        let registry = Mutex::new(Registry::new(cfg.node_timeout));
        let (status_tx, _) = watch::channel(Arc::new(ClusterStatus::new()));
        Self {
            cfg,
            registry,
            pending: Mutex::new(PendingQueue::new()),
            provisioner,
            transport,
            status_tx,
        }
    }

    pub fn cfg(&self) -> &EngineConfig {
        &self.cfg
    }

    pub(crate) fn transport(&self) -> &Arc<dyn WorkerTransport> {
        &self.transport
    }

    pub(crate) async fn poll_targets(&self) -> Vec<PollTarget> {
        self.registry.lock().await.poll_targets()
    }

    pub async fn node_snapshots(&self) -> Vec<NodeSnapshot> {
        self.registry.lock().await.snapshot()
    }

    /// Latest published cluster status; readers never block the poller.
    pub fn pod_status(&self) -> Arc<ClusterStatus> {
        self.status_tx.borrow().clone()
    }

    pub(crate) fn publish_status(&self, status: ClusterStatus) {
        self.status_tx.send_replace(Arc::new(status));
    }

    /// Register a node: provision first, then commit to the registry, then
    /// give queued pods a chance at the fresh capacity.
    pub async fn add_node(
        &self,
        cores: Option<i64>,
        auto_scaled: bool,
    ) -> Result<AddNodeOutcome, EngineError> {
        let capacity = match cores {
            Some(c) => positive_u32(c, "Cores")?,
            None => self.cfg.default_node_capacity,
        };
        let outcome = self.add_node_inner(capacity, auto_scaled).await?;
        self.drain_pending().await;
        Ok(outcome)
    }

    /// Provision + register, without draining the queue. Auto-scaling and
    /// the drain itself use this to avoid re-entering each other.
    async fn add_node_inner(
        &self,
        capacity: u32,
        auto_scaled: bool,
    ) -> Result<AddNodeOutcome, EngineError> {
        let node_id = {
            let mut registry = self.registry.lock().await;
            registry.allocate_id()
        };
        let spec = ProvisionSpec {
            node_id: node_id.clone(),
            capacity,
            heavenly_restriction: self.cfg.heavenly_restriction,
        };
        let handle = self
            .provisioner
            .provision(&spec)
            .await
            .map_err(|e| EngineError::Provision(e.to_string()))?;
        {
            let mut registry = self.registry.lock().await;
            registry.insert(node_id.clone(), capacity, handle);
        }
        let source = if auto_scaled { "auto-scaling" } else { "manual request" };
        info!(%node_id, capacity, "node added via {source}");
        Ok(AddNodeOutcome {
            node_id,
            capacity,
            auto_scaled,
        })
    }

    /// Admit a pod and place it on a node chosen by the configured policy.
    pub async fn launch_pod(
        &self,
        pod_id: Option<String>,
        cpu: i64,
    ) -> Result<LaunchOutcome, EngineError> {
        let cpu = positive_u32(cpu, "CPU request")?;
        let pod_id = match pod_id {
            Some(id) if id.is_empty() => {
                return Err(EngineError::Validation("pod_id must not be empty".to_string()));
            }
            Some(id) => id,
            None => format!("pod_{}", Uuid::new_v4().simple()),
        };
        {
            let pending = self.pending.lock().await;
            if pending.contains(&pod_id) {
                return Err(EngineError::Validation(format!(
                    "pod {pod_id} is already pending"
                )));
            }
        }

        let mut scaled = false;
        let no_nodes = self.registry.lock().await.is_empty();
        if no_nodes {
            if !self.cfg.auto_scale {
                return Err(EngineError::NoNodes);
            }
            info!(%pod_id, cpu, "no nodes available, auto-creating one");
            self.add_node_inner(self.cfg.default_node_capacity, true)
                .await?;
            scaled = true;
        }

        let placement = self.schedule_and_place(&pod_id, cpu, true).await?;
        info!(%pod_id, node_id = %placement.node_id, cpu, "pod placed");
        if scaled || placement.auto_scaled {
            self.drain_pending().await;
        }
        Ok(LaunchOutcome {
            pod_id,
            node_id: placement.node_id,
        })
    }

    /// Schedule against a fresh snapshot and push the pod to the chosen
    /// worker. With `allow_autoscale`, a NoFit gets one shot at a new node
    /// sized `max(default_capacity, cpu)` before giving up.
    async fn schedule_and_place(
        &self,
        pod_id: &str,
        cpu: u32,
        allow_autoscale: bool,
    ) -> Result<Placement, EngineError> {
        let algorithm = self.cfg.policy.algorithm();
        let index = {
            let registry = self.registry.lock().await;
            PlacementIndex::from_snapshot(&registry.snapshot())
        };
        let mut auto_scaled = false;
        let chosen = match algorithm.select(cpu, index.candidates()) {
            Some(node_id) => node_id,
            None if allow_autoscale && self.cfg.auto_scale => {
                let capacity = self.cfg.default_node_capacity.max(cpu);
                info!(%pod_id, cpu, capacity, "no fitting node, auto-creating one");
                self.add_node_inner(capacity, true).await?;
                auto_scaled = true;
                let index = {
                    let registry = self.registry.lock().await;
                    PlacementIndex::from_snapshot(&registry.snapshot())
                };
                algorithm
                    .select(cpu, index.candidates())
                    .ok_or(EngineError::NoCapacity { cpu })?
            }
            None => return Err(EngineError::NoCapacity { cpu }),
        };
        self.place_on(&chosen, pod_id, cpu).await?;
        Ok(Placement {
            node_id: chosen,
            auto_scaled,
        })
    }

    /// Reserve capacity in the registry, then tell the worker. The
    /// reservation is rolled back if the worker terminally refuses.
    async fn place_on(&self, node_id: &str, pod_id: &str, cpu: u32) -> Result<(), EngineError> {
        let handle = {
            let mut registry = self.registry.lock().await;
            registry.place_pod(node_id, pod_id, cpu)?
        };
        match self
            .transport
            .place_pod(&handle.endpoint, pod_id, cpu)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                {
                    let mut registry = self.registry.lock().await;
                    registry.unplace_pod(node_id, pod_id);
                }
                warn!(%node_id, %pod_id, "placement rolled back: {err}");
                Err(transport_error(node_id, err))
            }
        }
    }

    pub async fn delete_pod(&self, node_id: &str, pod_id: &str) -> Result<(), EngineError> {
        if node_id.is_empty() || pod_id.is_empty() {
            return Err(EngineError::Validation(
                "Missing node_id or pod_id".to_string(),
            ));
        }
        let handle = {
            let registry = self.registry.lock().await;
            let record = registry
                .get(node_id)
                .ok_or_else(|| EngineError::NotFound(format!("node {node_id}")))?;
            if !record.placed_pods.contains_key(pod_id) {
                return Err(EngineError::NotFound(format!(
                    "pod {pod_id} on node {node_id}"
                )));
            }
            record.handle.clone()
        };
        self.transport
            .remove_pod(&handle.endpoint, pod_id)
            .await
            .map_err(|err| transport_error(node_id, err))?;
        {
            let mut registry = self.registry.lock().await;
            registry.unplace_pod(node_id, pod_id);
        }
        info!(%node_id, %pod_id, "pod deleted");
        self.drain_pending().await;
        Ok(())
    }

    /// Remove a node and reschedule what it hosted. The node is excised
    /// first; a decommission glitch is logged and never aborts the
    /// removal. Displaced pods that cannot fit anywhere go straight to
    /// the pending queue; the rest are retried smallest-first so packing
    /// succeeds as often as the arithmetic allows.
    pub async fn remove_node(&self, node_id: &str) -> Result<RemovalReport, EngineError> {
        let (handle, displaced) = {
            let mut registry = self.registry.lock().await;
            registry
                .remove(node_id)
                .ok_or_else(|| EngineError::NotFound(format!("node {node_id}")))?
        };
        // Drop the node from the published view right away rather than
        // waiting out a poll interval.
        if self.pod_status().contains_key(node_id) {
            self.status_tx.send_modify(|status| {
                let mut next = (**status).clone();
                next.remove(node_id);
                *status = Arc::new(next);
            });
        }
        if let Err(err) = self.provisioner.decommission(&handle).await {
            warn!(%node_id, "decommission failed (continuing): {err}");
        }
        info!(%node_id, displaced = displaced.len(), "node removed");

        let mut report = RemovalReport {
            removed: node_id.to_string(),
            rescheduled: Vec::new(),
            failed: Vec::new(),
            partial: false,
        };
        if displaced.is_empty() {
            return Ok(report);
        }

        let max_available = {
            let registry = self.registry.lock().await;
            PlacementIndex::from_snapshot(&registry.snapshot()).max_available()
        };
        let mut possible: Vec<(String, u32)> = Vec::new();
        {
            let mut pending = self.pending.lock().await;
            for (pod_id, cpu_request) in displaced {
                if cpu_request > max_available {
                    warn!(%pod_id, cpu_request, "displaced pod fits nowhere, queueing");
                    pending.enqueue(PendingPod::new(
                        pod_id.clone(),
                        cpu_request,
                        Some(node_id.to_string()),
                    ));
                    report.failed.push(FailedReschedule {
                        pod_id,
                        cpu_request,
                    });
                } else {
                    possible.push((pod_id, cpu_request));
                }
            }
        }
        possible.sort_by_key(|(_, cpu)| *cpu);

        for (pod_id, cpu_request) in possible {
            let fits_now = {
                let registry = self.registry.lock().await;
                PlacementIndex::from_snapshot(&registry.snapshot()).max_available() >= cpu_request
            };
            let outcome = if fits_now {
                self.schedule_and_place(&pod_id, cpu_request, true).await
            } else {
                Err(EngineError::NoCapacity { cpu: cpu_request })
            };
            match outcome {
                Ok(placement) => {
                    info!(%pod_id, node_id = %placement.node_id, "pod rescheduled");
                    report.rescheduled.push(RescheduledPod {
                        pod_id,
                        node_id: placement.node_id,
                    });
                }
                Err(err) => {
                    warn!(%pod_id, cpu_request, "reschedule failed, queueing: {err}");
                    let mut pending = self.pending.lock().await;
                    pending.enqueue(PendingPod::new(
                        pod_id.clone(),
                        cpu_request,
                        Some(node_id.to_string()),
                    ));
                    report.failed.push(FailedReschedule {
                        pod_id,
                        cpu_request,
                    });
                }
            }
        }
        report.partial = !report.failed.is_empty();
        if !report.rescheduled.is_empty() {
            self.drain_pending().await;
        }
        Ok(report)
    }

    /// One pass over the pending queue, smallest request first, against
    /// current capacity only. The drain never auto-scales, so it cannot
    /// re-enter node addition. Idempotent: a second pass with no
    /// intervening capacity change places nothing.
    pub async fn drain_pending(&self) -> usize {
        let batch = {
            let pending = self.pending.lock().await;
            pending.drain_order()
        };
        if batch.is_empty() {
            return 0;
        }
        let mut drained = 0;
        for entry in batch {
            match self
                .schedule_and_place(&entry.pod_id, entry.cpu_request, false)
                .await
            {
                Ok(placement) => {
                    let mut pending = self.pending.lock().await;
                    pending.remove(&entry.pod_id);
                    drained += 1;
                    info!(
                        pod_id = %entry.pod_id,
                        node_id = %placement.node_id,
                        "pending pod placed"
                    );
                }
                Err(EngineError::NoCapacity { .. }) => {}
                Err(err) => {
                    warn!(pod_id = %entry.pod_id, "pending pod placement failed: {err}");
                }
            }
        }
        drained
    }

    pub async fn heartbeat(
        &self,
        node_id: &str,
        pod_health: BTreeMap<String, bool>,
    ) -> Result<(), EngineError> {
        if node_id.is_empty() {
            return Err(EngineError::Validation("Missing node_id".to_string()));
        }
        let mut registry = self.registry.lock().await;
        if registry.update_heartbeat(node_id, pod_health) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("node {node_id}")))
        }
    }

    pub async fn list_nodes(&self) -> Vec<NodeObservation> {
        self.registry.lock().await.observations()
    }

    pub async fn pending_pods(&self) -> Vec<PendingPod> {
        self.pending.lock().await.snapshot()
    }
}
