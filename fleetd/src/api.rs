use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Json, State};
use axum::routing::{delete, get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use libplacement::models::NodeObservation;

use crate::aggregator::ClusterStatus;
use crate::engine::Engine;
use crate::error::EngineError;

pub fn create_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/add-node", post(add_node))
        .route("/launch-pod", post(launch_pod))
        .route("/delete-pod", delete(delete_pod))
        .route("/delete-node", delete(delete_node))
        .route("/list-nodes", get(list_nodes))
        .route("/pod-status", get(pod_status))
        .route("/heartbeat", post(heartbeat))
        .route("/pending-pods", get(pending_pods))
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
struct AddNodeRequest {
    #[serde(default)]
    cores: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LaunchPodRequest {
    pod_id: Option<String>,
    #[serde(default = "default_cpu")]
    cpu: i64,
}

fn default_cpu() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
struct DeletePodRequest {
    node_id: Option<String>,
    pod_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteNodeRequest {
    node_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    node_id: Option<String>,
    #[serde(default)]
    pod_health: BTreeMap<String, bool>,
}

#[derive(Debug, Serialize)]
struct PendingPodView {
    pod_id: String,
    cpu_request: u32,
    origin_node: Option<String>,
    waiting_since: DateTime<Utc>,
}

async fn add_node(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<AddNodeRequest>,
) -> Result<Json<Value>, EngineError> {
    let outcome = engine.add_node(req.cores, false).await?;
    Ok(Json(json!({
        "status": "success",
        "node_id": outcome.node_id,
        "capacity": outcome.capacity,
        "auto_scaled": outcome.auto_scaled,
    })))
}

async fn launch_pod(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<LaunchPodRequest>,
) -> Result<Json<Value>, EngineError> {
    let outcome = engine.launch_pod(req.pod_id, req.cpu).await?;
    Ok(Json(json!({
        "status": "success",
        "pod_id": outcome.pod_id,
        "node_id": outcome.node_id,
    })))
}

async fn delete_pod(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<DeletePodRequest>,
) -> Result<Json<Value>, EngineError> {
    let (Some(node_id), Some(pod_id)) = (req.node_id, req.pod_id) else {
        return Err(EngineError::Validation(
            "Missing node_id or pod_id".to_string(),
        ));
    };
    engine.delete_pod(&node_id, &pod_id).await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn delete_node(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<DeleteNodeRequest>,
) -> Result<Json<Value>, EngineError> {
    let Some(node_id) = req.node_id else {
        return Err(EngineError::Validation("Missing node_id".to_string()));
    };
    let report = engine.remove_node(&node_id).await?;
    Ok(Json(json!({
        "status": "success",
        "removed": report.removed,
        "rescheduled": report.rescheduled,
        "failed": report.failed,
        "partial": report.partial,
    })))
}

async fn list_nodes(State(engine): State<Arc<Engine>>) -> Json<Vec<NodeObservation>> {
    Json(engine.list_nodes().await)
}

async fn pod_status(State(engine): State<Arc<Engine>>) -> Json<ClusterStatus> {
    Json((*engine.pod_status()).clone())
}

async fn heartbeat(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Value>, EngineError> {
    let Some(node_id) = req.node_id else {
        return Err(EngineError::Validation("Missing node_id".to_string()));
    };
    engine.heartbeat(&node_id, req.pod_health).await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn pending_pods(State(engine): State<Arc<Engine>>) -> Json<Value> {
    let pending: Vec<PendingPodView> = engine
        .pending_pods()
        .await
        .into_iter()
        .map(|p| PendingPodView {
            pod_id: p.pod_id,
            cpu_request: p.cpu_request,
            origin_node: p.origin_node,
            waiting_since: p.queued_at,
        })
        .collect();
    Json(json!({
        "count": pending.len(),
        "pending_pods": pending,
    }))
}
