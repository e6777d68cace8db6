use crate::cache::node_info::NodeInfo;
use crate::cache::store::StoreView;
use crate::error::CacheError;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable point-in-time view of the cache used by scheduling cycles
///
/// A snapshot is only written by [`Cache::update_snapshot`](crate::Cache::update_snapshot);
/// once handed to a cycle (usually as `Arc<Snapshot>`) it is read-only.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    node_infos: HashMap<String, Arc<NodeInfo>>,
    ordered: Vec<Arc<NodeInfo>>,
    stores: HashMap<String, StoreView>,
    generation: u64,
    /// Id of the cache that last filled this snapshot, 0 when never filled
    cache_id: u64,
}

impl Snapshot {
    /// An empty snapshot, filled by the first `update_snapshot`
    pub fn new() -> Self {
        Self::default()
    }

    /// All nodes by name
    pub fn node_infos(&self) -> &HashMap<String, Arc<NodeInfo>> {
        &self.node_infos
    }

    /// All nodes ordered by name
    pub fn list(&self) -> &[Arc<NodeInfo>] {
        &self.ordered
    }

    pub fn get(&self, node_name: &str) -> Option<&Arc<NodeInfo>> {
        self.node_infos.get(node_name)
    }

    pub fn num_nodes(&self) -> usize {
        self.node_infos.len()
    }

    /// Cache generation this snapshot reflects
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn cache_id(&self) -> u64 {
        self.cache_id
    }

    /// Read-only copy of an auxiliary store
    pub fn store(&self, name: &str) -> Result<&StoreView, CacheError> {
        self.stores
            .get(name)
            .ok_or_else(|| CacheError::store_not_found(name))
    }

    pub(crate) fn replace(
        &mut self,
        node_infos: HashMap<String, Arc<NodeInfo>>,
        stores: HashMap<String, StoreView>,
        generation: u64,
        cache_id: u64,
    ) {
        let mut ordered: Vec<Arc<NodeInfo>> = node_infos.values().cloned().collect();
        ordered.sort_by(|a, b| a.name().cmp(b.name()));

        self.node_infos = node_infos;
        self.ordered = ordered;
        self.stores = stores;
        self.generation = generation;
        self.cache_id = cache_id;
    }
}
