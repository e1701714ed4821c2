use std::cmp::Ordering;

use tracing::{info, warn};

use crate::engine::Engine;

/// One auto-scaling decision, run right after each metrics publish.
/// Aggregate usage above the high watermark grows the fleet by one node;
/// below the low watermark the least loaded node is drained away. Never
/// more than one action per tick.
pub async fn check(engine: &Engine) {
    if !engine.cfg().auto_scale {
        return;
    }
    let snapshot = engine.node_snapshots().await;
    if snapshot.is_empty() {
        return;
    }
    let status = engine.pod_status();

    let total_capacity: u64 = snapshot.iter().map(|n| u64::from(n.capacity)).sum();
    let usage_by_node: Vec<(String, f64)> = snapshot
        .iter()
        .map(|n| {
            let used = status
                .get(&n.node_id)
                .map(|pods| {
                    pods.values()
                        .map(|p| p.cpu_usage)
                        .filter(|usage| *usage >= 0.0)
                        .sum()
                })
                .unwrap_or(0.0);
            (n.node_id.clone(), used)
        })
        .collect();
    let total_usage: f64 = usage_by_node.iter().map(|(_, used)| used).sum();
    let usage_percent = if total_capacity > 0 {
        100.0 * total_usage / total_capacity as f64
    } else {
        0.0
    };

    let cfg = engine.cfg();
    if usage_percent > f64::from(cfg.high_threshold) {
        info!(
            usage_percent,
            threshold = cfg.high_threshold,
            "scaling up: usage exceeded high watermark"
        );
        if let Err(err) = engine.add_node(None, true).await {
            warn!("auto-scale up failed: {err}");
        }
    } else if usage_percent < f64::from(cfg.low_threshold) && snapshot.len() > 1 {
        // min_by keeps the first minimum, so ties resolve to the lowest
        // node id thanks to snapshot ordering.
        let least_loaded = usage_by_node
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(node_id, _)| node_id.clone());
        if let Some(node_id) = least_loaded {
            info!(
                usage_percent,
                threshold = cfg.low_threshold,
                %node_id,
                "scaling down: removing least loaded node"
            );
            if let Err(err) = engine.remove_node(&node_id).await {
                warn!(%node_id, "auto-scale down failed: {err}");
            }
        }
    }
}
