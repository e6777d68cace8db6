use crate::error::{KeelError, Result};
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace assumed for pods that do not set one
pub const DEFAULT_NAMESPACE: &str = "default";

/// PodKey uniquely identifies a workload unit in the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodKey {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl PodKey {
    /// Create a new PodKey
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive the key of a pod from its metadata
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let name = pod.metadata.name.as_deref().ok_or_else(|| {
            KeelError::invalid_object(
                "Pod",
                "missing metadata.name",
                "Every pod handed to the scheduler must be named",
            )
        })?;
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .unwrap_or(DEFAULT_NAMESPACE);

        Ok(Self::new(namespace, name))
    }

    /// Parse a "namespace/name" string; a bare name lands in the default namespace
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::new(DEFAULT_NAMESPACE, s),
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Get the name of a node, rejecting unnamed nodes
pub fn node_name(node: &Node) -> Result<&str> {
    node.metadata.name.as_deref().ok_or_else(|| {
        KeelError::invalid_object(
            "Node",
            "missing metadata.name",
            "Nodes are identified by name; set metadata.name",
        )
    })
}
