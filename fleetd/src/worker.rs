use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminal outcome of a worker call. Rejections carry the worker's own
/// explanation; transport failures mean the node never answered.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Unreachable(String),
}

/// One pod's runtime report, as workers expose it on /metrics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PodMetrics {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default = "default_cpu_request")]
    pub cpu_request: u32,
    #[serde(default)]
    pub restricted: bool,
}

fn default_cpu_request() -> u32 {
    1
}

pub type WorkerMetrics = BTreeMap<String, PodMetrics>;

#[derive(Serialize)]
struct AddPodBody<'a> {
    pod_id: &'a str,
    cpu_request: u32,
}

#[derive(Serialize)]
struct DeletePodBody<'a> {
    pod_id: &'a str,
}

/// Outbound interface to one worker node. Implementations own their retry
/// policy; callers see only the terminal result.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn place_pod(
        &self,
        endpoint: &str,
        pod_id: &str,
        cpu_request: u32,
    ) -> Result<(), WorkerError>;

    async fn remove_pod(&self, endpoint: &str, pod_id: &str) -> Result<(), WorkerError>;

    async fn fetch_metrics(&self, endpoint: &str) -> Result<WorkerMetrics, WorkerError>;
}

/// HTTP transport against the worker agent API. Placement is retried up
/// to three times with exponential backoff; removal and metrics are single
/// attempts. Every attempt runs under a hard 5 s timeout.
pub struct HttpWorkerClient {
    client: reqwest::Client,
    backoff: Vec<Duration>,
}

impl HttpWorkerClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        })
    }

    /// Replace the backoff schedule. `backoff.len() + 1` placement
    /// attempts are made in total; an empty schedule means one attempt.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    async fn try_place(
        &self,
        endpoint: &str,
        pod_id: &str,
        cpu_request: u32,
    ) -> Result<(), WorkerError> {
        let response = self
            .client
            .post(format!("{endpoint}/add-pod"))
            .json(&AddPodBody {
                pod_id,
                cpu_request,
            })
            .send()
            .await
            .map_err(|e| WorkerError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            return Ok(());
        }
        let reason = response
            .text()
            .await
            .unwrap_or_else(|e| format!("unreadable response body: {e}"));
        Err(WorkerError::Rejected(reason))
    }
}

#[async_trait]
impl WorkerTransport for HttpWorkerClient {
    async fn place_pod(
        &self,
        endpoint: &str,
        pod_id: &str,
        cpu_request: u32,
    ) -> Result<(), WorkerError> {
        let attempts = self.backoff.len() + 1;
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.try_place(endpoint, pod_id, cpu_request).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        %endpoint,
                        %pod_id,
                        attempt,
                        attempts,
                        "worker placement attempt failed: {err}"
                    );
                    last_err = Some(err);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.backoff[attempt - 1]).await;
            }
        }
        // attempts >= 1, so an error is always recorded by the time we land here
        Err(last_err.unwrap_or_else(|| WorkerError::Unreachable("no attempts made".to_string())))
    }

    async fn remove_pod(&self, endpoint: &str, pod_id: &str) -> Result<(), WorkerError> {
        let response = self
            .client
            .delete(format!("{endpoint}/delete-pod"))
            .json(&DeletePodBody { pod_id })
            .send()
            .await
            .map_err(|e| WorkerError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            return Ok(());
        }
        let reason = response
            .text()
            .await
            .unwrap_or_else(|e| format!("unreadable response body: {e}"));
        Err(WorkerError::Rejected(reason))
    }

    async fn fetch_metrics(&self, endpoint: &str) -> Result<WorkerMetrics, WorkerError> {
        let response = self
            .client
            .get(format!("{endpoint}/metrics"))
            .send()
            .await
            .map_err(|e| WorkerError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(WorkerError::Rejected(format!(
                "metrics returned {}",
                response.status()
            )));
        }
        let raw: BTreeMap<String, Value> = response
            .json()
            .await
            .map_err(|e| WorkerError::Rejected(format!("malformed metrics body: {e}")))?;

        let mut metrics = WorkerMetrics::new();
        for (key, value) in raw {
            // Keys prefixed with '_' are reserved worker metadata.
            if key.starts_with('_') {
                continue;
            }
            match serde_json::from_value::<PodMetrics>(value) {
                Ok(m) => {
                    metrics.insert(key, m);
                }
                Err(e) => warn!(%endpoint, pod_id = %key, "skipping malformed pod metrics: {e}"),
            }
        }
        Ok(metrics)
    }
}
