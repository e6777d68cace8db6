use crate::cache::NodeInfo;
use crate::framework::{Code, CycleState, FilterPlugin, Plugin, Status};
use keel_core::Pod;
use tracing::debug;

pub const NAME: &str = "NodeSelector";

pub const ERR_REASON_SELECTOR_MISMATCH: &str = "node(s) didn't match node selector";

/// Requires every `spec.nodeSelector` entry to be a node label
pub struct NodeSelector;

impl Plugin for NodeSelector {
    fn name(&self) -> &str {
        NAME
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for NodeSelector {
    fn filter(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> Status {
        let Some(selector) = pod.spec.as_ref().and_then(|s| s.node_selector.as_ref()) else {
            return Status::success();
        };

        for (key, value) in selector {
            if node.label(key) != Some(value.as_str()) {
                debug!(
                    "Node {} does not match selector {}={}",
                    node.name(),
                    key,
                    value
                );
                return Status::new(Code::UnschedulableAndUnresolvable, ERR_REASON_SELECTOR_MISMATCH);
            }
        }

        Status::success()
    }
}
