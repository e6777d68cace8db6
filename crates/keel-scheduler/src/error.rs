// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use crate::framework::status::{NodeToStatusMap, Status};
use miette::Diagnostic;
use std::collections::BTreeMap;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// Invalid profile, plugin arguments or store configuration
    #[error("Invalid scheduler configuration: {message}")]
    #[diagnostic(
        code(scheduler::config),
        help("{suggestion}")
    )]
    Config {
        message: String,
        suggestion: String,
    },

    /// A cycle-global plugin stage failed with an internal error
    #[error("Plugin {plugin} failed at {stage}: {reason}")]
    #[diagnostic(
        code(scheduler::plugin_failed),
        help("The pod will be retried by the scheduling loop; check the plugin logs")
    )]
    PluginFailed {
        plugin: String,
        stage: String,
        reason: String,
    },

    /// A PreFilter plugin declared the pod unplaceable before any node was tried
    #[error("Pod {pod} is unschedulable: {plugin} rejected it: {reasons}")]
    #[diagnostic(
        code(scheduler::unschedulable),
        help("Fix the pod spec or wait for cluster conditions to change")
    )]
    Unschedulable {
        pod: String,
        plugin: String,
        reasons: String,
    },

    /// Every node was rejected
    #[error("No suitable nodes found for pod {pod}: {message}")]
    #[diagnostic(
        code(scheduler::no_suitable_nodes),
        help("Check node resources, taints, and pod requirements")
    )]
    FitError {
        pod: String,
        num_all_nodes: usize,
        message: String,
        statuses: NodeToStatusMap,
    },

    /// The cycle was cancelled before it could finish
    #[error("Scheduling cycle for pod {pod} was cancelled")]
    #[diagnostic(code(scheduler::cancelled))]
    Cancelled { pod: String },

    /// Cache error
    #[error("Cache error: {0}")]
    #[diagnostic(
        code(scheduler::cache_error),
        help("Check the cluster ingestion collaborator")
    )]
    Cache(#[from] CacheError),

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("The object handed to the scheduler is malformed")
    )]
    Core(#[from] keel_core::KeelError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError { message: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a Config error
    pub fn config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a PluginFailed error from a failing status
    pub fn plugin_failed(stage: impl Into<String>, status: &Status) -> Self {
        Self::PluginFailed {
            plugin: status.plugin().unwrap_or("unknown").to_string(),
            stage: stage.into(),
            reason: status.message(),
        }
    }

    /// Create an Unschedulable error from a rejecting status
    pub fn unschedulable(pod: impl Into<String>, status: &Status) -> Self {
        Self::Unschedulable {
            pod: pod.into(),
            plugin: status.plugin().unwrap_or("unknown").to_string(),
            reasons: status.message(),
        }
    }

    /// Create a FitError aggregating the rejection reason of every node
    pub fn fit_error(pod: impl Into<String>, num_all_nodes: usize, statuses: NodeToStatusMap) -> Self {
        let message = fit_error_message(num_all_nodes, &statuses);
        Self::FitError {
            pod: pod.into(),
            num_all_nodes,
            message,
            statuses,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the external loop should requeue the pod after a backoff
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SchedulerError::Config { .. })
    }
}

/// Render "0/N nodes are available: <count> <reason>, ..." with reasons sorted
fn fit_error_message(num_all_nodes: usize, statuses: &NodeToStatusMap) -> String {
    let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
    for status in statuses.values() {
        for reason in status.reasons() {
            *histogram.entry(reason.clone()).or_default() += 1;
        }
    }

    let reasons: Vec<String> = histogram
        .into_iter()
        .map(|(reason, count)| format!("{} {}", count, reason))
        .collect();

    format!(
        "0/{} nodes are available: {}.",
        num_all_nodes,
        reasons.join(", ")
    )
}

/// Cache error type
#[derive(Error, Debug, Diagnostic)]
pub enum CacheError {
    /// Object rejected before any mutation
    #[error("Rejected malformed object: {0}")]
    #[diagnostic(code(cache::invalid_object))]
    InvalidObject(#[from] keel_core::KeelError),

    /// Node is not in the cache
    #[error("Node not found: {node}")]
    #[diagnostic(
        code(cache::node_not_found),
        help("The node may have been removed; the caller decides whether to retry")
    )]
    NodeNotFound { node: String },

    /// Pod is not in the cache
    #[error("Pod not found: {pod}")]
    #[diagnostic(code(cache::pod_not_found))]
    PodNotFound { pod: String },

    /// Pod is already tracked and cannot be assumed again
    #[error("Pod already in cache: {pod}")]
    #[diagnostic(code(cache::pod_exists))]
    PodExists { pod: String },

    /// Operation only valid for assumed pods
    #[error("Pod {pod} is not assumed")]
    #[diagnostic(code(cache::pod_not_assumed))]
    PodNotAssumed { pod: String },

    /// Store name was never enabled
    #[error("Store not found: {store}")]
    #[diagnostic(
        code(cache::store_not_found),
        help("Enable the store in the cache configuration before using it")
    )]
    StoreNotFound { store: String },

    /// Store was enabled twice
    #[error("Store already enabled: {store}")]
    #[diagnostic(code(cache::store_exists))]
    StoreAlreadyEnabled { store: String },
}

impl CacheError {
    pub fn node_not_found(node: impl Into<String>) -> Self {
        Self::NodeNotFound { node: node.into() }
    }

    pub fn pod_not_found(pod: impl ToString) -> Self {
        Self::PodNotFound {
            pod: pod.to_string(),
        }
    }

    pub fn store_not_found(store: impl Into<String>) -> Self {
        Self::StoreNotFound {
            store: store.into(),
        }
    }
}

/// Cycle state lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum CycleStateError {
    /// Nothing was written under the key this cycle
    #[error("key {key} not found in cycle state")]
    #[diagnostic(code(cycle_state::not_found))]
    NotFound { key: String },

    /// A value exists but has a different type
    #[error("value under key {key} is not a {expected}")]
    #[diagnostic(code(cycle_state::type_mismatch))]
    TypeMismatch { key: String, expected: &'static str },
}

impl CycleStateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CycleStateError::NotFound { .. })
    }
}
