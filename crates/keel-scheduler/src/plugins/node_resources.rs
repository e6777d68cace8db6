use crate::cache::NodeInfo;
use crate::framework::{
    Code, CycleState, FilterPlugin, Plugin, PreFilterPlugin, ScorePlugin, StateData, Status,
};
use crate::types::MAX_NODE_SCORE;
use keel_core::{Pod, ResourceQuantities};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub const FIT_NAME: &str = "NodeResourcesFit";
pub const LEAST_ALLOCATED_NAME: &str = "LeastAllocated";
pub const BALANCED_ALLOCATION_NAME: &str = "BalancedAllocation";

const PRE_FILTER_STATE_KEY: &str = "PreFilterNodeResourcesFit";

/// Rejects nodes without room for the pod's CPU and memory request
pub struct NodeResourcesFit;

struct PreFilterState {
    request: ResourceQuantities,
}

impl StateData for PreFilterState {
    fn clone_state(self: Arc<Self>) -> Arc<dyn StateData> {
        self
    }
}

impl Plugin for NodeResourcesFit {
    fn name(&self) -> &str {
        FIT_NAME
    }

    fn as_pre_filter(&self) -> Option<&dyn PreFilterPlugin> {
        Some(self)
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl PreFilterPlugin for NodeResourcesFit {
    fn pre_filter(&self, state: &CycleState, pod: &Pod, _nodes: &[Arc<NodeInfo>]) -> Status {
        let request = match ResourceQuantities::pod_requests(pod) {
            Ok(request) => request,
            Err(e) => return Status::new(Code::UnschedulableAndUnresolvable, e.to_string()),
        };

        debug!(
            "Pod requests CPU: {} milli, Memory: {} bytes",
            request.cpu_millicores, request.memory_bytes
        );
        state.write(PRE_FILTER_STATE_KEY, Arc::new(PreFilterState { request }));
        Status::success()
    }
}

impl FilterPlugin for NodeResourcesFit {
    fn filter(&self, state: &CycleState, _pod: &Pod, node: &NodeInfo) -> Status {
        let pre_filter = match state.read::<PreFilterState>(PRE_FILTER_STATE_KEY) {
            Ok(s) => s,
            Err(e) => return Status::as_error(e),
        };
        let request = pre_filter.request;
        let allocatable = node.allocatable();
        let requested = node.requested();

        let mut reasons = Vec::new();
        if request.cpu_millicores > 0
            && requested.cpu_millicores.saturating_add(request.cpu_millicores) > allocatable.cpu_millicores
        {
            reasons.push("Insufficient cpu".to_string());
        }
        if request.memory_bytes > 0
            && requested.memory_bytes.saturating_add(request.memory_bytes) > allocatable.memory_bytes
        {
            reasons.push("Insufficient memory".to_string());
        }

        if reasons.is_empty() {
            Status::success()
        } else {
            debug!(
                "Node {} has CPU: {}/{} milli, Memory: {}/{} bytes in use",
                node.name(),
                requested.cpu_millicores,
                allocatable.cpu_millicores,
                requested.memory_bytes,
                allocatable.memory_bytes
            );
            Status::with_reasons(Code::Unschedulable, reasons)
        }
    }
}

/// Per-resource weights of [`LeastAllocated`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeastAllocatedArgs {
    pub cpu_weight: i64,
    pub memory_weight: i64,
}

impl Default for LeastAllocatedArgs {
    fn default() -> Self {
        Self {
            cpu_weight: 1,
            memory_weight: 1,
        }
    }
}

/// Prefers nodes with the most capacity left after placing the pod
pub struct LeastAllocated {
    args: LeastAllocatedArgs,
}

impl LeastAllocated {
    pub fn new(args: LeastAllocatedArgs) -> Result<Self, String> {
        if args.cpu_weight < 0 || args.memory_weight < 0 || (args.cpu_weight == 0 && args.memory_weight == 0) {
            return Err("weights must be non-negative and not both zero".to_string());
        }
        Ok(Self { args })
    }
}

/// Percentage of capacity left free, 0 when the request does not fit
fn least_requested_score(requested: i64, capacity: i64) -> i64 {
    if capacity == 0 || requested > capacity {
        return 0;
    }
    ((capacity - requested) as i128 * MAX_NODE_SCORE as i128 / capacity as i128) as i64
}

impl Plugin for LeastAllocated {
    fn name(&self) -> &str {
        LEAST_ALLOCATED_NAME
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

impl ScorePlugin for LeastAllocated {
    fn score(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> Result<i64, Status> {
        let request = ResourceQuantities::pod_requests(pod).map_err(Status::as_error)?;
        let allocatable = node.allocatable();
        let total = node.requested() + request;

        let cpu = least_requested_score(total.cpu_millicores, allocatable.cpu_millicores);
        let memory = least_requested_score(total.memory_bytes, allocatable.memory_bytes);
        let (cpu_weight, memory_weight) = (self.args.cpu_weight as i128, self.args.memory_weight as i128);
        let score = ((cpu as i128 * cpu_weight + memory as i128 * memory_weight)
            / (cpu_weight + memory_weight)) as i64;

        debug!(
            "Node {} score: {} (CPU free: {}%, Memory free: {}%)",
            node.name(),
            score,
            cpu,
            memory
        );
        Ok(score)
    }
}

/// Prefers nodes whose CPU and memory usage stay close to each other
pub struct BalancedAllocation;

impl Plugin for BalancedAllocation {
    fn name(&self) -> &str {
        BALANCED_ALLOCATION_NAME
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

impl ScorePlugin for BalancedAllocation {
    fn score(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> Result<i64, Status> {
        let request = ResourceQuantities::pod_requests(pod).map_err(Status::as_error)?;
        let allocatable = node.allocatable();
        if allocatable.cpu_millicores == 0 || allocatable.memory_bytes == 0 {
            return Ok(0);
        }

        let total = node.requested() + request;
        let cpu_fraction = total.cpu_millicores as f64 / allocatable.cpu_millicores as f64;
        let memory_fraction = total.memory_bytes as f64 / allocatable.memory_bytes as f64;
        if cpu_fraction >= 1.0 || memory_fraction >= 1.0 {
            return Ok(0);
        }

        let variance = (cpu_fraction - memory_fraction).abs();
        let score = ((1.0 - variance) * MAX_NODE_SCORE as f64).clamp(0.0, MAX_NODE_SCORE as f64) as i64;

        debug!(
            "Node {} balanced allocation score: {} (variance: {:.3})",
            node.name(),
            score,
            variance
        );
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PodInfo;
    use crate::testing::{make_node, make_pod};

    fn node_with_usage(cpu: &str, memory: &str, used: &[(&str, &str)]) -> NodeInfo {
        let mut info = NodeInfo::new(make_node("node1", cpu, memory)).unwrap();
        for (i, (c, m)) in used.iter().enumerate() {
            let pod = PodInfo::new(make_pod(&format!("used-{}", i), c, m)).unwrap();
            info.add_pod(Arc::new(pod));
        }
        info
    }

    fn fit(pod: &Pod, node: &NodeInfo) -> Status {
        let state = CycleState::new();
        let status = NodeResourcesFit.pre_filter(&state, pod, &[]);
        assert!(status.is_success(), "{}", status);
        NodeResourcesFit.filter(&state, pod, node)
    }

    #[test]
    fn test_fits_empty_node() {
        let node = node_with_usage("4", "8Gi", &[]);
        assert!(fit(&make_pod("p", "1", "1Gi"), &node).is_success());
    }

    #[test]
    fn test_accounts_for_assigned_pods() {
        let node = node_with_usage("4", "8Gi", &[("3", "1Gi")]);
        let status = fit(&make_pod("p", "2", "1Gi"), &node);
        assert_eq!(status.code(), Code::Unschedulable);
        assert_eq!(status.reasons(), ["Insufficient cpu"]);

        let node = node_with_usage("1", "1Gi", &[]);
        let status = fit(&make_pod("p", "2", "2Gi"), &node);
        assert_eq!(status.reasons(), ["Insufficient cpu", "Insufficient memory"]);
    }

    #[test]
    fn test_malformed_request_is_unresolvable() {
        let pod = make_pod("p", "lots", "1Gi");
        let status = NodeResourcesFit.pre_filter(&CycleState::new(), &pod, &[]);
        assert_eq!(status.code(), Code::UnschedulableAndUnresolvable);
    }

    #[test]
    fn test_filter_without_pre_filter_is_error() {
        let node = node_with_usage("4", "8Gi", &[]);
        let status = NodeResourcesFit.filter(&CycleState::new(), &make_pod("p", "1", "1Gi"), &node);
        assert!(status.is_error());
    }

    #[test]
    fn test_least_allocated_prefers_emptier_node() {
        let plugin = LeastAllocated::new(LeastAllocatedArgs::default()).unwrap();
        let pod = make_pod("p", "1", "2Gi");
        let state = CycleState::new();

        let empty = node_with_usage("4", "8Gi", &[]);
        let busy = node_with_usage("4", "8Gi", &[("2", "4Gi")]);

        // (3/4 + 6/8) free = 75
        assert_eq!(plugin.score(&state, &pod, &empty).unwrap(), 75);
        assert_eq!(plugin.score(&state, &pod, &busy).unwrap(), 25);
    }

    #[test]
    fn test_least_allocated_weights() {
        let plugin = LeastAllocated::new(LeastAllocatedArgs {
            cpu_weight: 1,
            memory_weight: 0,
        })
        .unwrap();
        let node = node_with_usage("4", "8Gi", &[]);
        let score = plugin
            .score(&CycleState::new(), &make_pod("p", "2", "1Gi"), &node)
            .unwrap();
        assert_eq!(score, 50);

        assert!(LeastAllocated::new(LeastAllocatedArgs {
            cpu_weight: 0,
            memory_weight: 0,
        })
        .is_err());
    }

    #[test]
    fn test_huge_quantities_do_not_overflow() {
        let crowded = node_with_usage("4", "8Gi", &[("1e300", "1Gi")]);
        let status = fit(&make_pod("p", "1", "1Gi"), &crowded);
        assert_eq!(status.reasons(), ["Insufficient cpu"]);

        let plugin = LeastAllocated::new(LeastAllocatedArgs {
            cpu_weight: i64::MAX,
            memory_weight: i64::MAX,
        })
        .unwrap();
        let vast = node_with_usage("1e300", "8Gi", &[]);
        let score = plugin
            .score(&CycleState::new(), &make_pod("p", "1", "4Gi"), &vast)
            .unwrap();
        // cpu is all but free (99), memory half used (50)
        assert_eq!(score, 74);
    }

    #[test]
    fn test_balanced_allocation() {
        let node = node_with_usage("4", "8Gi", &[]);
        let state = CycleState::new();

        let balanced = BalancedAllocation
            .score(&state, &make_pod("p", "2", "4Gi"), &node)
            .unwrap();
        let skewed = BalancedAllocation
            .score(&state, &make_pod("p", "3", "1Gi"), &node)
            .unwrap();

        assert_eq!(balanced, 100);
        assert!(skewed < balanced);
    }
}
