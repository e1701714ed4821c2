use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of a managed node. Health is not a state: it is derived from
/// the heartbeat age, so a node can be `Ready` and unhealthy at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Provisioned but no heartbeat or placement seen yet.
    Starting,
    /// At least one heartbeat or placement has landed.
    Ready,
    /// Deletion in progress; rejects new placements.
    Removing,
}

/// Opaque handle returned by the provisioner. The endpoint is the base URL
/// the worker transport talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub id: String,
    pub endpoint: String,
}

/// Authoritative record for one node. `placed_pods` maps pod id to its CPU
/// request and is the source of truth for scheduling; reported runtime
/// state lives in the aggregator's published view, not here.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: String,
    pub capacity: u32,
    pub handle: NodeHandle,
    pub last_heartbeat: Instant,
    pub state: NodeState,
    pub pod_health: BTreeMap<String, bool>,
    pub placed_pods: BTreeMap<String, u32>,
}

impl NodeRecord {
    pub fn allocated(&self) -> u32 {
        self.placed_pods.values().sum()
    }

    pub fn available(&self) -> u32 {
        self.capacity - self.allocated()
    }
}

/// Scheduling view of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub capacity: u32,
    pub allocated: u32,
    pub available: u32,
    pub healthy: bool,
}

/// Operator view of one node, as reported by the node listing.
#[derive(Debug, Clone, Serialize)]
pub struct NodeObservation {
    pub node_id: String,
    pub healthy: bool,
    pub pod_health: BTreeMap<String, bool>,
    pub seconds_since_heartbeat: u64,
    pub capacity: u32,
}

/// A pod waiting for capacity. `origin_node` names the removed node that
/// displaced it, or `None` for pods that never fit in the first place.
#[derive(Debug, Clone)]
pub struct PendingPod {
    pub pod_id: String,
    pub cpu_request: u32,
    pub origin_node: Option<String>,
    pub queued_at: DateTime<Utc>,
}

impl PendingPod {
    pub fn new(pod_id: String, cpu_request: u32, origin_node: Option<String>) -> Self {
        Self {
            pod_id,
            cpu_request,
            origin_node,
            queued_at: Utc::now(),
        }
    }
}

/// Numeric suffix of a `node_<N>` id, used for deterministic ordering.
/// Ids without the expected shape sort after all well-formed ones.
pub fn id_suffix(node_id: &str) -> u64 {
    node_id
        .rsplit('_')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_suffix_ordering() {
        assert_eq!(id_suffix("node_1"), 1);
        assert_eq!(id_suffix("node_42"), 42);
        assert_eq!(id_suffix("weird"), u64::MAX);
    }
}
