use keel_core::{KeelError, Node, Pod, PodKey, ResourceQuantities};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A pod as the scheduler sees it: key, object, and precomputed request
#[derive(Debug, Clone)]
pub struct PodInfo {
    pub key: PodKey,
    pub pod: Arc<Pod>,
    pub requests: ResourceQuantities,
}

impl PodInfo {
    pub fn new(pod: Pod) -> Result<Self, KeelError> {
        keel_core::validate_pod(&pod)?;
        let key = PodKey::from_pod(&pod)?;
        let requests = ResourceQuantities::pod_requests(&pod)?;

        Ok(Self {
            key,
            pod: Arc::new(pod),
            requests,
        })
    }

    /// Node the pod asks to run on (`spec.nodeName`), if any
    pub fn node_name(&self) -> Option<&str> {
        self.pod.spec.as_ref().and_then(|s| s.node_name.as_deref())
    }
}

/// Aggregated view of one node: the node object, its pods, and their usage
#[derive(Debug, Clone)]
pub struct NodeInfo {
    name: String,
    node: Arc<Node>,
    allocatable: ResourceQuantities,
    pods: BTreeMap<PodKey, Arc<PodInfo>>,
    requested: ResourceQuantities,
    generation: u64,
}

impl NodeInfo {
    pub fn new(node: Node) -> Result<Self, KeelError> {
        keel_core::validate_node(&node)?;
        let name = keel_core::node_name(&node)?.to_string();
        let allocatable = ResourceQuantities::node_allocatable(&node);

        Ok(Self {
            name,
            node: Arc::new(node),
            allocatable,
            pods: BTreeMap::new(),
            requested: ResourceQuantities::default(),
            generation: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Value of a node label
    pub fn label(&self, key: &str) -> Option<&str> {
        self.node
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    /// Pods assigned to this node, ordered by key
    pub fn pods(&self) -> impl Iterator<Item = &Arc<PodInfo>> {
        self.pods.values()
    }

    pub fn has_pod(&self, key: &PodKey) -> bool {
        self.pods.contains_key(key)
    }

    pub fn num_pods(&self) -> usize {
        self.pods.len()
    }

    /// Sum of the requests of every assigned pod
    pub fn requested(&self) -> ResourceQuantities {
        self.requested
    }

    pub fn allocatable(&self) -> ResourceQuantities {
        self.allocatable
    }

    /// Cache generation of the last change to this node
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Replace the node object, keeping assigned pods
    pub(crate) fn set_node(&mut self, node: Node) -> Result<(), KeelError> {
        let replacement = NodeInfo::new(node)?;
        self.node = replacement.node;
        self.allocatable = replacement.allocatable;
        Ok(())
    }

    pub(crate) fn add_pod(&mut self, pod: Arc<PodInfo>) {
        self.pods.insert(pod.key.clone(), pod);
        self.recompute_requested();
    }

    pub(crate) fn remove_pod(&mut self, key: &PodKey) -> Option<Arc<PodInfo>> {
        let removed = self.pods.remove(key);
        if removed.is_some() {
            self.recompute_requested();
        }
        removed
    }

    pub(crate) fn pod_keys(&self) -> impl Iterator<Item = &PodKey> {
        self.pods.keys()
    }

    fn recompute_requested(&mut self) {
        self.requested = self
            .pods
            .values()
            .fold(ResourceQuantities::default(), |acc, p| acc + p.requests);
    }
}
