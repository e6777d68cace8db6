//! Object builders and fake plugins shared by the crate's tests

use crate::cache::{Cache, CacheConfig, NodeInfo, Snapshot};
use crate::framework::interface::{
    FilterPlugin, Plugin, PreFilterPlugin, ReservePlugin, ScoreExtensions, ScorePlugin,
};
use crate::framework::{Code, CycleState, Status};
use crate::plugins::helper::default_normalize_score;
use crate::types::{NodeScore, MAX_NODE_SCORE};
use k8s_openapi::api::core::v1::{
    Affinity, Container, NodeStatus, PodAffinity, PodAffinityTerm, PodSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use keel_core::{Node, Pod};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn resources(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    let mut map = BTreeMap::new();
    map.insert("cpu".to_string(), Quantity(cpu.to_string()));
    map.insert("memory".to_string(), Quantity(memory.to_string()));
    map
}

pub fn make_node(name: &str, cpu: &str, memory: &str) -> Node {
    let mut node = Node::default();
    node.metadata.name = Some(name.to_string());
    node.status = Some(NodeStatus {
        allocatable: Some(resources(cpu, memory)),
        ..Default::default()
    });
    node
}

pub fn make_labeled_node(name: &str, labels: &[(&str, &str)]) -> Node {
    let mut node = make_node(name, "4", "8Gi");
    node.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    node
}

pub fn make_pod(name: &str, cpu: &str, memory: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some("default".to_string());
    pod.spec = Some(PodSpec {
        containers: vec![Container {
            name: "app".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(resources(cpu, memory)),
                ..Default::default()
            }),
            ..Default::default()
        }],
        ..Default::default()
    });
    pod
}

pub fn make_pod_on(name: &str, cpu: &str, memory: &str, node_name: &str) -> Pod {
    let mut pod = make_pod(name, cpu, memory);
    if let Some(spec) = pod.spec.as_mut() {
        spec.node_name = Some(node_name.to_string());
    }
    pod
}

/// Add a required pod-affinity term with the given topology key
pub fn with_topology_key(mut pod: Pod, topology_key: &str) -> Pod {
    if let Some(spec) = pod.spec.as_mut() {
        spec.affinity = Some(Affinity {
            pod_affinity: Some(PodAffinity {
                required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                    topology_key: topology_key.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    pod
}

/// Snapshot of the given nodes with `pods_per_node[i]` filler pods on node `i`
pub fn snapshot_with_pods(nodes: Vec<Node>, pods_per_node: &[usize]) -> Arc<Snapshot> {
    let cache = Cache::new(CacheConfig::default()).unwrap();
    for (i, node) in nodes.into_iter().enumerate() {
        let name = node.metadata.name.clone().unwrap();
        cache.add_node(node).unwrap();
        for j in 0..pods_per_node.get(i).copied().unwrap_or(0) {
            cache
                .assign_pod(make_pod(&format!("filler-{}-{}", i, j), "10m", "1Mi"), &name)
                .unwrap();
        }
    }
    let mut snapshot = Snapshot::new();
    cache.update_snapshot(&mut snapshot);
    Arc::new(snapshot)
}

pub fn snapshot_of(nodes: Vec<Node>) -> Arc<Snapshot> {
    snapshot_with_pods(nodes, &[])
}

/// Filter that accepts every node
pub struct TrueFilter;

impl Plugin for TrueFilter {
    fn name(&self) -> &str {
        "TrueFilter"
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for TrueFilter {
    fn filter(&self, _state: &CycleState, _pod: &Pod, _node: &NodeInfo) -> Status {
        Status::success()
    }
}

/// Filter that rejects every node
pub struct FalseFilter;

impl Plugin for FalseFilter {
    fn name(&self) -> &str {
        "FalseFilter"
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for FalseFilter {
    fn filter(&self, _state: &CycleState, _pod: &Pod, _node: &NodeInfo) -> Status {
        Status::new(Code::Unschedulable, "always fails")
    }
}

/// Filter accepting only the node named like the pod
pub struct MatchFilter;

impl Plugin for MatchFilter {
    fn name(&self) -> &str {
        "MatchFilter"
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for MatchFilter {
    fn filter(&self, _state: &CycleState, pod: &Pod, node: &NodeInfo) -> Status {
        if pod.metadata.name.as_deref() == Some(node.name()) {
            Status::success()
        } else {
            Status::new(Code::Unschedulable, "node name does not match pod name")
        }
    }
}

/// Filter counting its calls and failing chosen nodes with chosen codes
pub struct FakeFilterPlugin {
    name: String,
    calls: AtomicUsize,
    failed: HashMap<String, Code>,
}

impl FakeFilterPlugin {
    pub fn new(name: &str, failed: &[(&str, Code)]) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            failed: failed.iter().map(|(n, c)| (n.to_string(), *c)).collect(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Plugin for FakeFilterPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for FakeFilterPlugin {
    fn filter(&self, _state: &CycleState, _pod: &Pod, node: &NodeInfo) -> Status {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failed.get(node.name()) {
            Some(code) => Status::new(*code, format!("injected failure {}", code)),
            None => Status::success(),
        }
    }
}

/// PreFilter returning a fixed status whose Filter rejects every node
pub struct FakePreFilter {
    status: Status,
    filter_calls: AtomicUsize,
}

impl FakePreFilter {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            filter_calls: AtomicUsize::new(0),
        }
    }

    pub fn filter_calls(&self) -> usize {
        self.filter_calls.load(Ordering::SeqCst)
    }
}

impl Plugin for FakePreFilter {
    fn name(&self) -> &str {
        "FakePreFilter"
    }

    fn as_pre_filter(&self) -> Option<&dyn PreFilterPlugin> {
        Some(self)
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl PreFilterPlugin for FakePreFilter {
    fn pre_filter(&self, _state: &CycleState, _pod: &Pod, _nodes: &[Arc<NodeInfo>]) -> Status {
        self.status.clone()
    }
}

impl FilterPlugin for FakePreFilter {
    fn filter(&self, _state: &CycleState, _pod: &Pod, _node: &NodeInfo) -> Status {
        self.filter_calls.fetch_add(1, Ordering::SeqCst);
        Status::new(Code::Unschedulable, "rejected by pre-filter fake")
    }
}

/// Score plugin with fixed per-node raw scores
pub struct FakeScorePlugin {
    name: String,
    scores: HashMap<String, i64>,
    errors: HashSet<String>,
    normalize_reverse: Option<bool>,
}

impl FakeScorePlugin {
    pub fn new(name: &str, scores: &[(&str, i64)]) -> Self {
        Self {
            name: name.to_string(),
            scores: scores.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
            errors: HashSet::new(),
            normalize_reverse: None,
        }
    }

    pub fn failing_on(mut self, node: &str) -> Self {
        self.errors.insert(node.to_string());
        self
    }

    pub fn normalized(mut self, reverse: bool) -> Self {
        self.normalize_reverse = Some(reverse);
        self
    }
}

impl Plugin for FakeScorePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

impl ScorePlugin for FakeScorePlugin {
    fn score(&self, _state: &CycleState, _pod: &Pod, node: &NodeInfo) -> Result<i64, Status> {
        if self.errors.contains(node.name()) {
            return Err(Status::error(format!("cannot score {}", node.name())));
        }
        Ok(self.scores.get(node.name()).copied().unwrap_or(0))
    }

    fn score_extensions(&self) -> Option<&dyn ScoreExtensions> {
        self.normalize_reverse.map(|_| self as &dyn ScoreExtensions)
    }
}

impl ScoreExtensions for FakeScorePlugin {
    fn normalize_score(&self, _state: &CycleState, _pod: &Pod, scores: &mut [NodeScore]) -> Status {
        default_normalize_score(MAX_NODE_SCORE, self.normalize_reverse.unwrap_or(false), scores)
    }
}

/// Reserve plugin appending its calls to a shared log
pub struct FakeReservePlugin {
    name: String,
    fail: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeReservePlugin {
    pub fn new(name: &str, fail: bool, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            fail,
            log,
        }
    }
}

impl Plugin for FakeReservePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_reserve(&self) -> Option<&dyn ReservePlugin> {
        Some(self)
    }
}

impl ReservePlugin for FakeReservePlugin {
    fn reserve(&self, _state: &CycleState, _pod: &Pod, node_name: &str) -> Status {
        self.log.lock().push(format!("reserve:{}:{}", self.name, node_name));
        if self.fail {
            Status::error("reservation refused")
        } else {
            Status::success()
        }
    }

    fn unreserve(&self, _state: &CycleState, _pod: &Pod, node_name: &str) {
        self.log.lock().push(format!("unreserve:{}:{}", self.name, node_name));
    }
}
