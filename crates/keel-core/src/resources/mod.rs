pub mod quantities;

pub use quantities::ResourceQuantities;

use crate::error::{KeelError, Result};
use k8s_openapi::api::core::v1::{Node, Pod};

/// Validate a node before it enters the scheduler cache
pub fn validate_node(node: &Node) -> Result<()> {
    let name = crate::types::node_name(node)?;
    if !is_valid_name(name) {
        return Err(KeelError::invalid_object(
            "Node",
            format!("invalid name '{}'", name),
            "Node names must be lowercase DNS-1123 subdomains",
        ));
    }

    if let Some(allocatable) = node.status.as_ref().and_then(|s| s.allocatable.as_ref()) {
        ResourceQuantities::try_from_k8s_resource_map(allocatable)?;
    }

    Ok(())
}

/// Validate a pod before it is assigned or scheduled
pub fn validate_pod(pod: &Pod) -> Result<()> {
    let key = crate::types::PodKey::from_pod(pod)?;
    if !is_valid_name(&key.name) {
        return Err(KeelError::invalid_object(
            "Pod",
            format!("invalid name '{}'", key.name),
            "Pod names must be lowercase DNS-1123 subdomains",
        ));
    }

    if pod.spec.is_none() {
        return Err(KeelError::invalid_object(
            "Pod",
            format!("{} has no spec", key),
            "Add a pod spec with at least one container",
        ));
    }

    Ok(())
}

/// Validate a Kubernetes object name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    // Must start and end with alphanumeric
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    bytes.iter().all(|&b| alnum(b) || b == b'-' || b == b'.')
}
