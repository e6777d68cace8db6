//! Plugin extension points.
//!
//! A plugin is one object implementing [`Plugin`] plus any subset of the
//! stage traits. The framework discovers which stages a plugin takes part in
//! through the `as_*` probes, so a plugin only overrides the probes for the
//! stages it implements.

use crate::cache::NodeInfo;
use crate::framework::cycle_state::CycleState;
use crate::framework::status::Status;
use crate::types::NodeScore;
use keel_core::Pod;
use std::sync::Arc;

/// Base trait of every scheduler plugin
pub trait Plugin: Send + Sync {
    /// Unique plugin name, used in statuses, logs and cycle state keys
    fn name(&self) -> &str;

    fn as_pre_filter(&self) -> Option<&dyn PreFilterPlugin> {
        None
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        None
    }

    fn as_pre_score(&self) -> Option<&dyn PreScorePlugin> {
        None
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        None
    }

    fn as_reserve(&self) -> Option<&dyn ReservePlugin> {
        None
    }
}

/// Runs once per cycle before any node is filtered
pub trait PreFilterPlugin: Plugin {
    /// `Skip` opts this plugin out of Filter for the cycle
    fn pre_filter(&self, state: &CycleState, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Status;
}

/// Decides whether a node can host the pod
pub trait FilterPlugin: Plugin {
    fn filter(&self, state: &CycleState, pod: &Pod, node: &NodeInfo) -> Status;
}

/// Runs once per cycle over the nodes that passed Filter
pub trait PreScorePlugin: Plugin {
    /// `Skip` opts this plugin out of Score for the cycle
    fn pre_score(&self, state: &CycleState, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Status;
}

/// Ranks a feasible node
pub trait ScorePlugin: Plugin {
    /// Raw score; only needs to be in range after normalization
    fn score(&self, state: &CycleState, pod: &Pod, node: &NodeInfo) -> Result<i64, Status>;

    fn score_extensions(&self) -> Option<&dyn ScoreExtensions> {
        None
    }
}

/// Rewrites one plugin's scores after every node has been scored
pub trait ScoreExtensions: Send + Sync {
    fn normalize_score(&self, state: &CycleState, pod: &Pod, scores: &mut [NodeScore]) -> Status;
}

/// Claims resources on the chosen node; `unreserve` must undo `reserve`
pub trait ReservePlugin: Plugin {
    fn reserve(&self, state: &CycleState, pod: &Pod, node_name: &str) -> Status;

    /// Must be idempotent; also called for plugins whose reserve never ran
    fn unreserve(&self, state: &CycleState, pod: &Pod, node_name: &str);
}
