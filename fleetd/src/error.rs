use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use libplacement::registry::PlaceError;

/// Errors the lifecycle engine surfaces to callers. Worker retries are
/// internal; only terminal outcomes appear here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("No nodes available, and auto-scaling is disabled")]
    NoNodes,

    #[error("No node with sufficient capacity for pod requesting {cpu} cores")]
    NoCapacity { cpu: u32 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Node error: {reason}")]
    WorkerRejection { node_id: String, reason: String },

    #[error("Cannot reach node {node_id}: {reason}")]
    Transport { node_id: String, reason: String },

    #[error("Provisioner error: {0}")]
    Provision(String),
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::NoNodes | Self::NoCapacity { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::WorkerRejection { .. } => StatusCode::BAD_REQUEST,
            Self::Transport { .. } | Self::Provision(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PlaceError> for EngineError {
    fn from(err: PlaceError) -> Self {
        match err {
            PlaceError::NodeNotFound(node_id) => Self::NotFound(format!("node {node_id}")),
            PlaceError::NodeRemoving(node_id) => {
                Self::Validation(format!("node {node_id} is being removed"))
            }
            PlaceError::DuplicatePod { pod_id, node_id } => {
                Self::Validation(format!("pod {pod_id} is already placed on {node_id}"))
            }
            PlaceError::CapacityExceeded { cpu_request, .. } => {
                Self::NoCapacity { cpu: cpu_request }
            }
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        match &self {
            Self::Transport { .. } | Self::Provision(_) => {
                tracing::error!("request failed: {self}");
            }
            _ => tracing::debug!("request rejected: {self}"),
        }
        let body = json!({ "status": "error", "message": self.to_string() });
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            EngineError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EngineError::NotFound("node node_9".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EngineError::Transport {
                node_id: "node_1".into(),
                reason: "timed out".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_place_error_conversion() {
        let err: EngineError = PlaceError::CapacityExceeded {
            node_id: "node_1".into(),
            capacity: 4,
            allocated: 3,
            cpu_request: 2,
        }
        .into();
        assert!(matches!(err, EngineError::NoCapacity { cpu: 2 }));
    }
}
