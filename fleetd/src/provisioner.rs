use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use libplacement::models::{NodeHandle, id_suffix};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProvisionError(pub String);

/// What a node provisioner is asked to create. The restriction flag is
/// forwarded to the worker environment untouched.
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    pub node_id: String,
    pub capacity: u32,
    pub heavenly_restriction: bool,
}

/// Seam to whatever actually runs workers (containers, VMs, processes).
/// The engine only ever sees the handle that comes back.
#[async_trait]
pub trait NodeProvisioner: Send + Sync {
    async fn provision(&self, spec: &ProvisionSpec) -> Result<NodeHandle, ProvisionError>;

    async fn decommission(&self, handle: &NodeHandle) -> Result<(), ProvisionError>;
}

/// Maps node ids onto pre-arranged worker endpoints: node_N is expected at
/// `http://{host}:{base_port + N}`. Suits local fleets where workers are
/// started out of band; container-backed provisioning stays external.
pub struct PortMapProvisioner {
    host: String,
    base_port: u16,
}

impl PortMapProvisioner {
    pub fn new(host: String, base_port: u16) -> Self {
        Self { host, base_port }
    }
}

#[async_trait]
impl NodeProvisioner for PortMapProvisioner {
    async fn provision(&self, spec: &ProvisionSpec) -> Result<NodeHandle, ProvisionError> {
        let suffix = id_suffix(&spec.node_id);
        if suffix == u64::MAX {
            return Err(ProvisionError(format!(
                "node id {} has no numeric suffix",
                spec.node_id
            )));
        }
        let port = u64::from(self.base_port)
            .checked_add(suffix)
            .filter(|p| *p <= u64::from(u16::MAX))
            .ok_or_else(|| {
                ProvisionError(format!("worker port for {} out of range", spec.node_id))
            })?;
        info!(
            node_id = %spec.node_id,
            capacity = spec.capacity,
            heavenly_restriction = spec.heavenly_restriction,
            "mapping worker endpoint"
        );
        Ok(NodeHandle {
            id: spec.node_id.clone(),
            endpoint: format!("http://{}:{}", self.host, port),
        })
    }

    async fn decommission(&self, handle: &NodeHandle) -> Result<(), ProvisionError> {
        info!(node_id = %handle.id, "releasing worker endpoint");
        Ok(())
    }
}
