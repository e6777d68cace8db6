use crate::cache::NodeInfo;
use crate::framework::{
    Code, CycleState, FilterPlugin, Plugin, PreScorePlugin, ScoreExtensions, ScorePlugin,
    StateData, Status,
};
use crate::plugins::helper::default_normalize_score;
use crate::types::{NodeScore, MAX_NODE_SCORE};
use keel_core::Pod;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "LessTopologyKey";

const PRE_SCORE_STATE_KEY: &str = "PreScoreLessTopologyKey";

pub const ERR_REASON_MISSING_TOPOLOGY_KEY: &str = "node does not have the required topology key";

/// Prefers topology domains hosting the fewest pods.
///
/// The topology key is taken from the pod's first required pod-affinity
/// term. Nodes without that label are filtered out.
pub struct LessTopologyKey;

/// Assigned pods per topology value, over the nodes that passed Filter
struct PreScoreState {
    topology_score: HashMap<String, i64>,
}

impl StateData for PreScoreState {
    fn clone_state(self: Arc<Self>) -> Arc<dyn StateData> {
        // Never mutated after PreScore
        self
    }
}

fn less_topology_key(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()?
        .affinity
        .as_ref()?
        .pod_affinity
        .as_ref()?
        .required_during_scheduling_ignored_during_execution
        .as_ref()?
        .first()
        .map(|term| term.topology_key.as_str())
        .filter(|key| !key.is_empty())
}

impl Plugin for LessTopologyKey {
    fn name(&self) -> &str {
        NAME
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }

    fn as_pre_score(&self) -> Option<&dyn PreScorePlugin> {
        Some(self)
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

impl FilterPlugin for LessTopologyKey {
    fn filter(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> Status {
        let Some(key) = less_topology_key(pod) else {
            return Status::success();
        };

        if node.label(key).is_none() {
            debug!("{} rejects node {}: no {} label", NAME, node.name(), key);
            return Status::new(Code::Unschedulable, ERR_REASON_MISSING_TOPOLOGY_KEY);
        }
        Status::success()
    }
}

impl PreScorePlugin for LessTopologyKey {
    fn pre_score(&self, state: &CycleState, pod: &Pod, nodes: &[Arc<NodeInfo>]) -> Status {
        if nodes.is_empty() {
            return Status::success();
        }

        let mut topology_score = HashMap::new();
        if let Some(key) = less_topology_key(pod) {
            for node in nodes {
                if let Some(value) = node.label(key) {
                    *topology_score.entry(value.to_string()).or_insert(0) += node.num_pods() as i64;
                }
            }
            debug!("{} pods per {} value: {:?}", NAME, key, topology_score);
        }

        state.write(PRE_SCORE_STATE_KEY, Arc::new(PreScoreState { topology_score }));
        Status::success()
    }
}

impl ScorePlugin for LessTopologyKey {
    fn score(&self, state: &CycleState, pod: &Pod, node: &NodeInfo) -> Result<i64, Status> {
        let Some(key) = less_topology_key(pod) else {
            return Ok(MAX_NODE_SCORE);
        };

        let pre_score = state.read::<PreScoreState>(PRE_SCORE_STATE_KEY).map_err(|e| {
            Status::error(format!(
                "failed to read {:?} from cycle state: {}",
                PRE_SCORE_STATE_KEY, e
            ))
        })?;

        match node.label(key) {
            Some(value) => Ok(pre_score.topology_score.get(value).copied().unwrap_or(0)),
            None => Ok(MAX_NODE_SCORE),
        }
    }

    fn score_extensions(&self) -> Option<&dyn ScoreExtensions> {
        Some(self)
    }
}

impl ScoreExtensions for LessTopologyKey {
    fn normalize_score(&self, _state: &CycleState, _pod: &Pod, scores: &mut [NodeScore]) -> Status {
        let status = default_normalize_score(MAX_NODE_SCORE, true, scores);
        debug!("{} normalized scores: {:?}", NAME, scores);
        status
    }
}
