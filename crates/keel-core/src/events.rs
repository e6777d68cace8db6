use crate::types::PodKey;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::{Deserialize, Serialize};

/// A cluster change delivered by the ingestion collaborator (watch/informer)
///
/// Pods carry their placement in `spec.nodeName`; events for pods without a
/// node are not assignments and are ignored by the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterEvent {
    /// A node joined the cluster
    NodeAdded(Node),
    /// A node's labels, taints or capacity changed
    NodeUpdated(Node),
    /// A node left the cluster
    NodeDeleted(String),
    /// A pod was bound to a node
    PodAdded(Pod),
    /// An assigned pod changed (requests, labels, or node)
    PodUpdated(Pod),
    /// A pod was deleted
    PodDeleted(PodKey),
}

impl ClusterEvent {
    /// Short name of the event kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterEvent::NodeAdded(_) => "NodeAdded",
            ClusterEvent::NodeUpdated(_) => "NodeUpdated",
            ClusterEvent::NodeDeleted(_) => "NodeDeleted",
            ClusterEvent::PodAdded(_) => "PodAdded",
            ClusterEvent::PodUpdated(_) => "PodUpdated",
            ClusterEvent::PodDeleted(_) => "PodDeleted",
        }
    }
}
