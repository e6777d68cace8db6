//! Keel Core - Cluster object types shared by the Keel scheduler
//!
//! This crate provides:
//! - Re-exports of the Kubernetes `Node` and `Pod` objects
//! - Stable object keys for pods and nodes
//! - Resource quantity parsing and pod request aggregation
//! - Cluster ingestion events
//! - Error types with miette diagnostics

pub mod error;
pub mod events;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{KeelError, Result};
pub use events::ClusterEvent;
pub use resources::{is_valid_name, validate_node, validate_pod, ResourceQuantities};
pub use types::{node_name, PodKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Pod};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Deserialize an object from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        KeelError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize an object to YAML
pub fn to_yaml<T: serde::Serialize>(object: &T) -> Result<String> {
    serde_yaml::to_string(object).map_err(|e| {
        KeelError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize an object from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        KeelError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip_keeps_node_name() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("nginx".to_string());
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().node_name = Some("node1".to_string());

        let yaml = to_yaml(&pod).unwrap();
        assert!(yaml.contains("nodeName: node1"));

        let back: Pod = from_yaml(&yaml).unwrap();
        assert_eq!(back.spec.unwrap().node_name, Some("node1".to_string()));
    }

    #[test]
    fn test_from_json_reports_serialization_error() {
        let err = from_json::<Pod>("{not json").unwrap_err();
        assert!(matches!(err, KeelError::SerializationError { .. }));
    }
}
