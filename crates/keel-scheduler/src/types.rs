use crate::framework::status::NodeToStatusMap;
use serde::Serialize;

/// Highest score a plugin may return after normalization
pub const MAX_NODE_SCORE: i64 = 100;

/// Lowest score a plugin may return after normalization
pub const MIN_NODE_SCORE: i64 = 0;

/// Score of one node, either from a single plugin or the weighted total
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeScore {
    pub name: String,
    pub score: i64,
}

impl NodeScore {
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Outcome of a successful scheduling cycle
#[derive(Debug, Clone)]
pub struct ScheduleResult {
    /// Node the pod should be bound to
    pub suggested_host: String,
    /// Nodes the Filter stage looked at
    pub evaluated_nodes: usize,
    /// Nodes that passed Filter
    pub feasible_nodes: usize,
    /// Status of every node that did not pass Filter or Score
    pub node_statuses: NodeToStatusMap,
    /// Weighted total per scored node, best first
    pub scores: Vec<NodeScore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_score_serializes_flat() {
        let score = NodeScore::new("node1", 80);
        let json = serde_json::to_string(&score).unwrap();
        assert_eq!(json, r#"{"name":"node1","score":80}"#);
    }
}
