use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::autoscale;
use crate::engine::Engine;

/// Usage value published for pods whose last report marked them dead, and
/// for every pod on an unreachable node. Graph consumers render it
/// distinctly from a genuine zero.
pub const UNHEALTHY_USAGE: f64 = -1.0;

/// Observed runtime state of one pod.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodStatusView {
    pub cpu_usage: f64,
    pub cpu_request: u32,
    pub healthy: bool,
    pub restricted: bool,
}

/// The published cluster-wide view: node id → pod id → status. Immutable
/// once published; consumers hold an `Arc` borrowed from the watch
/// channel and never block the poller.
pub type ClusterStatus = BTreeMap<String, BTreeMap<String, PodStatusView>>;

/// Polls every live node on a fixed interval, merges worker metrics with
/// heartbeat-reported pod health, and publishes the merged view in one
/// atomic swap. Observed state only: the registry stays authoritative for
/// what is placed where.
pub struct MetricsAggregator {
    engine: Arc<Engine>,
}

impl MetricsAggregator {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Run the poll/publish/auto-scale tick until the process exits.
    pub fn spawn(self) -> JoinHandle<()> {
        let engine = self.engine;
        tokio::spawn(async move {
            let mut timer = interval(engine.cfg().poll_interval);
            // The first tick of a tokio interval fires immediately; skip
            // it so freshly started clusters are not polled before any
            // worker had a chance to come up.
            timer.tick().await;
            loop {
                timer.tick().await;
                poll_once(&engine).await;
                autoscale::check(&engine).await;
            }
        })
    }
}

/// One aggregation round: fetch metrics from every node concurrently and
/// publish the merged result.
pub async fn poll_once(engine: &Engine) {
    let targets = engine.poll_targets().await;
    let transport = engine.transport().clone();
    let fetches = targets
        .iter()
        .map(|t| transport.fetch_metrics(&t.endpoint));
    let results = join_all(fetches).await;

    let previous = engine.pod_status();
    let mut next = ClusterStatus::new();
    for (target, result) in targets.iter().zip(results) {
        match result {
            Ok(metrics) => {
                let mut pods = BTreeMap::new();
                for (pod_id, m) in metrics {
                    // Reserved worker metadata; transports already strip
                    // these, but the contract is the aggregator's.
                    if pod_id.starts_with('_') {
                        continue;
                    }
                    let healthy = target.pod_health.get(&pod_id).copied().unwrap_or(true);
                    let cpu_usage = if healthy { m.cpu_usage } else { UNHEALTHY_USAGE };
                    pods.insert(
                        pod_id,
                        PodStatusView {
                            cpu_usage,
                            cpu_request: m.cpu_request,
                            healthy,
                            restricted: m.restricted,
                        },
                    );
                }
                next.insert(target.node_id.clone(), pods);
            }
            Err(err) => {
                // The node stays registered: removal is driven by the
                // heartbeat timeout, not by a failed poll. Everything we
                // knew about it is republished as unhealthy.
                warn!(node_id = %target.node_id, "metrics poll failed: {err}");
                let mut pods = previous
                    .get(&target.node_id)
                    .cloned()
                    .unwrap_or_default();
                for pod in pods.values_mut() {
                    pod.healthy = false;
                    pod.cpu_usage = UNHEALTHY_USAGE;
                }
                next.insert(target.node_id.clone(), pods);
            }
        }
    }
    debug!(nodes = next.len(), "publishing cluster status");
    engine.publish_status(next);
}
