use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use serde::Deserialize;
use serde_json::{Value, json};

use fleetd::worker::{HttpWorkerClient, WorkerError, WorkerTransport};

/// A minimal stand-in for the worker agent: capacity-checked add-pod,
/// delete-pod, and a metrics endpoint with the reserved `_node_info` key.
#[derive(Clone)]
struct WorkerState {
    capacity: u32,
    pods: Arc<Mutex<BTreeMap<String, u32>>>,
}

#[derive(Deserialize)]
struct AddPod {
    pod_id: String,
    cpu_request: u32,
}

#[derive(Deserialize)]
struct DeletePod {
    pod_id: String,
}

async fn add_pod(
    State(state): State<WorkerState>,
    Json(req): Json<AddPod>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let mut pods = state.pods.lock().unwrap();
    let allocated: u32 = pods.values().sum();
    if allocated + req.cpu_request > state.capacity {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "Not enough capacity on node: {allocated}/{} already allocated",
                state.capacity
            ),
        ));
    }
    pods.insert(req.pod_id, req.cpu_request);
    Ok(Json(json!({"status": "success"})))
}

async fn delete_pod(
    State(state): State<WorkerState>,
    Json(req): Json<DeletePod>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let mut pods = state.pods.lock().unwrap();
    if pods.remove(&req.pod_id).is_none() {
        return Err((StatusCode::NOT_FOUND, "Pod not found".to_string()));
    }
    Ok(Json(json!({"status": "success"})))
}

async fn metrics(State(state): State<WorkerState>) -> Json<Value> {
    let pods = state.pods.lock().unwrap();
    let mut body = serde_json::Map::new();
    for (pod_id, cpu_request) in pods.iter() {
        body.insert(
            pod_id.clone(),
            json!({"cpu_usage": 0.5, "cpu_request": cpu_request, "restricted": false}),
        );
    }
    body.insert("_node_info".to_string(), json!({"capacity": state.capacity}));
    Json(Value::Object(body))
}

async fn spawn_worker(capacity: u32) -> String {
    let state = WorkerState {
        capacity,
        pods: Arc::new(Mutex::new(BTreeMap::new())),
    };
    let app = Router::new()
        .route("/add-pod", post(add_pod))
        .route("/delete-pod", delete(delete_pod))
        .route("/metrics", get(metrics))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client_without_backoff() -> HttpWorkerClient {
    HttpWorkerClient::new().unwrap().with_backoff(Vec::new())
}

#[tokio::test]
async fn test_place_fetch_and_remove_against_live_worker() {
    let endpoint = spawn_worker(4).await;
    let client = client_without_backoff();

    client.place_pod(&endpoint, "pod_a", 2).await.unwrap();
    client.place_pod(&endpoint, "pod_b", 1).await.unwrap();

    let metrics = client.fetch_metrics(&endpoint).await.unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics["pod_a"].cpu_request, 2);
    assert_eq!(metrics["pod_a"].cpu_usage, 0.5);
    // Reserved keys never reach the caller.
    assert!(!metrics.contains_key("_node_info"));

    client.remove_pod(&endpoint, "pod_a").await.unwrap();
    let metrics = client.fetch_metrics(&endpoint).await.unwrap();
    assert_eq!(metrics.len(), 1);
}

#[tokio::test]
async fn test_worker_rejection_is_classified_with_its_reason() {
    let endpoint = spawn_worker(2).await;
    let client = client_without_backoff();
    client.place_pod(&endpoint, "pod_a", 2).await.unwrap();

    let err = client.place_pod(&endpoint, "pod_b", 1).await.unwrap_err();
    match err {
        WorkerError::Rejected(reason) => assert!(reason.contains("Not enough capacity")),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remove_missing_pod_is_a_rejection() {
    let endpoint = spawn_worker(4).await;
    let client = client_without_backoff();
    let err = client.remove_pod(&endpoint, "pod_ghost").await.unwrap_err();
    assert!(matches!(err, WorkerError::Rejected(_)));
}

#[tokio::test]
async fn test_unreachable_worker_is_a_transport_error() {
    // Bind a port, then drop the listener so the connection is refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = client_without_backoff();
    let err = client.place_pod(&endpoint, "pod_a", 1).await.unwrap_err();
    assert!(matches!(err, WorkerError::Unreachable(_)));
    let err = client.fetch_metrics(&endpoint).await.unwrap_err();
    assert!(matches!(err, WorkerError::Unreachable(_)));
}

#[tokio::test]
async fn test_placement_retries_until_the_worker_comes_around() {
    let endpoint = spawn_worker(2).await;
    // Two quick retries; the worker frees capacity between attempts.
    let client = HttpWorkerClient::new()
        .unwrap()
        .with_backoff(vec![Duration::from_millis(50), Duration::from_millis(50)]);

    client.place_pod(&endpoint, "pod_a", 2).await.unwrap();
    let remover = client_without_backoff();
    let endpoint_clone = endpoint.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        remover.remove_pod(&endpoint_clone, "pod_a").await.unwrap();
    });

    // First attempt is rejected for capacity; a retry after the delete
    // succeeds.
    client.place_pod(&endpoint, "pod_b", 2).await.unwrap();
}
