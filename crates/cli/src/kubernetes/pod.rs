//! Point-in-time view of a pod and container id lookup

use super::ClusterError;
use k8s_openapi::api::core::v1::Pod;
use std::fmt;

/// Pod phase as reported by the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Status of one container in a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatusRef {
    pub name: String,
    /// Unset until the runtime has created the container
    pub container_id: Option<String>,
}

/// Snapshot of a pod's identity and status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUnit {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub node_name: Option<String>,
    pub phase: PodPhase,
    /// Container names in spec order
    pub container_names: Vec<String>,
    pub containers: Vec<ContainerStatusRef>,
}

impl From<&Pod> for ExecutionUnit {
    fn from(pod: &Pod) -> Self {
        let metadata = &pod.metadata;
        let status = pod.status.as_ref();

        let containers = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|cs| ContainerStatusRef {
                        name: cs.name.clone(),
                        container_id: cs.container_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let container_names = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();

        Self {
            name: metadata.name.clone().unwrap_or_default(),
            namespace: metadata.namespace.clone().unwrap_or_default(),
            uid: metadata.uid.clone().unwrap_or_default(),
            node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
            phase: PodPhase::from_status(status.and_then(|s| s.phase.as_deref())),
            container_names,
            containers,
        }
    }
}

/// Look up the runtime id of a named container
pub fn resolve_container_id(name: &str, unit: &ExecutionUnit) -> Result<String, ClusterError> {
    unit.containers
        .iter()
        .find(|status| status.name == name)
        .and_then(|status| status.container_id.clone())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ClusterError::ContainerNotFound {
            container: name.to_string(),
            pod: unit.name.clone(),
        })
}
