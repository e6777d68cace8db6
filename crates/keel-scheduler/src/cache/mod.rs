//! Cluster state cache.
//!
//! The [`Cache`] is the scheduler's mutable view of nodes and assigned pods,
//! fed by an external ingestion collaborator. Scheduling cycles never read it
//! directly; they read a [`Snapshot`] produced by [`Cache::update_snapshot`].
//!
//! Locking: one `RwLock` around all state. Mutations take the write lock;
//! snapshot generation takes the read lock, so a node and its full pod set
//! are always copied together.

pub mod node_info;
pub mod snapshot;
pub mod store;

pub use node_info::{NodeInfo, PodInfo};
pub use snapshot::Snapshot;
pub use store::{StoreValue, StoreView, TtlStore};

use crate::error::CacheError;
use keel_core::{ClusterEvent, Node, Pod, PodKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration of one auxiliary TTL store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub name: String,
    pub ttl: Duration,
}

impl StoreConfig {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
        }
    }
}

/// Configuration for the cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an assumed pod survives after its binding finished
    pub assumed_pod_ttl: Duration,
    /// Interval between expiry sweeps
    pub cleanup_period: Duration,
    /// Auxiliary stores enabled at construction
    pub stores: Vec<StoreConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            assumed_pod_ttl: Duration::from_secs(30),
            cleanup_period: Duration::from_secs(1),
            stores: Vec::new(),
        }
    }
}

/// What a sweep removed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub expired_assumed_pods: usize,
    pub expired_store_entries: usize,
}

#[derive(Debug, Clone)]
struct PodState {
    info: Arc<PodInfo>,
    node_name: String,
    assumed: bool,
    binding_finished: bool,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct CacheInner {
    nodes: HashMap<String, NodeInfo>,
    pods: HashMap<PodKey, PodState>,
    stores: HashMap<String, TtlStore>,
    generation: u64,
}

impl CacheInner {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Put a pod on a node, first dropping any previous placement
    fn place_pod(&mut self, state: PodState) {
        self.detach_pod(&state.info.key);

        let generation = self.next_generation();
        if let Some(node) = self.nodes.get_mut(&state.node_name) {
            node.add_pod(state.info.clone());
            node.set_generation(generation);
        }
        self.pods.insert(state.info.key.clone(), state);
    }

    /// Remove a pod from its node and from the pod map
    fn detach_pod(&mut self, key: &PodKey) -> Option<PodState> {
        let state = self.pods.remove(key)?;
        let generation = self.next_generation();
        match self.nodes.get_mut(&state.node_name) {
            Some(node) => {
                if node.remove_pod(key).is_none() {
                    warn!(
                        "Pod {} was recorded on node {} but missing from its assignment set",
                        key, state.node_name
                    );
                }
                node.set_generation(generation);
            }
            None => {
                warn!(
                    "Dropping dangling assignment of pod {} to removed node {}",
                    key, state.node_name
                );
            }
        }
        Some(state)
    }
}

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Scheduler cache of nodes, assigned pods and auxiliary TTL stores
pub struct Cache {
    id: u64,
    config: CacheConfig,
    inner: RwLock<CacheInner>,
}

impl Cache {
    /// Create a cache, enabling every configured store
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let cache = Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            inner: RwLock::new(CacheInner::default()),
        };

        for store in cache.config.stores.clone() {
            cache.enable_store(store.name, store.ttl)?;
        }

        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Register an auxiliary store
    pub fn enable_store(&self, name: impl Into<String>, ttl: Duration) -> Result<(), CacheError> {
        let name = name.into();
        let mut inner = self.inner.write();
        if inner.stores.contains_key(&name) {
            return Err(CacheError::StoreAlreadyEnabled { store: name });
        }
        debug!("Enabling store {} (ttl: {:?})", name, ttl);
        inner.stores.insert(name.clone(), TtlStore::new(name, ttl));
        Ok(())
    }

    /// Insert a node; an existing node with the same name is replaced
    pub fn add_node(&self, node: Node) -> Result<(), CacheError> {
        self.upsert_node(node, "add")
    }

    /// Replace a node's object, keeping its pods; unknown nodes are inserted
    pub fn update_node(&self, node: Node) -> Result<(), CacheError> {
        self.upsert_node(node, "update")
    }

    fn upsert_node(&self, node: Node, op: &str) -> Result<(), CacheError> {
        let name = match keel_core::node_name(&node) {
            Ok(name) => name.to_string(),
            Err(e) => {
                warn!("Rejecting node {}: {}", op, e);
                return Err(e.into());
            }
        };

        let mut inner = self.inner.write();
        let generation = inner.next_generation();
        match inner.nodes.get_mut(&name) {
            Some(existing) => {
                if let Err(e) = existing.set_node(node) {
                    warn!("Rejecting node {} for {}: {}", op, name, e);
                    return Err(e.into());
                }
                existing.set_generation(generation);
                debug!("Updated node {} in cache", name);
            }
            None => {
                let mut info = NodeInfo::new(node).map_err(|e| {
                    warn!("Rejecting node {} for {}: {}", op, name, e);
                    CacheError::from(e)
                })?;
                info.set_generation(generation);
                inner.nodes.insert(name.clone(), info);
                debug!("Added node {} to cache", name);
            }
        }
        Ok(())
    }

    /// Remove a node and every pod assignment pointing at it.
    ///
    /// Returns whether the node was present.
    pub fn remove_node(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        let node = match inner.nodes.remove(name) {
            Some(node) => node,
            None => {
                debug!("Node {} not in cache, nothing to remove", name);
                return false;
            }
        };

        let mut evicted = 0;
        for key in node.pod_keys() {
            if inner.pods.remove(key).is_some() {
                evicted += 1;
            }
        }
        // Records pointing at the node that its assignment set did not know about
        let before = inner.pods.len();
        inner.pods.retain(|_, p| p.node_name != name);
        let dangling = before - inner.pods.len();
        if dangling > 0 {
            warn!(
                "Dropped {} dangling pod record(s) for removed node {}",
                dangling, name
            );
        }
        inner.next_generation();

        info!("Removed node {} from cache ({} pod(s) evicted)", name, evicted + dangling);
        true
    }

    /// Record that a pod runs on a node
    ///
    /// An assumed pod confirmed here stops being assumed; a pod already
    /// assigned elsewhere is moved.
    pub fn assign_pod(&self, pod: Pod, node_name: &str) -> Result<(), CacheError> {
        let info = Arc::new(PodInfo::new(pod).map_err(|e| {
            warn!("Rejecting pod assignment to {}: {}", node_name, e);
            CacheError::from(e)
        })?);

        let mut inner = self.inner.write();
        if !inner.nodes.contains_key(node_name) {
            return Err(CacheError::node_not_found(node_name));
        }

        debug!("Assigning pod {} to node {}", info.key, node_name);
        inner.place_pod(PodState {
            info,
            node_name: node_name.to_string(),
            assumed: false,
            binding_finished: false,
            deadline: None,
        });
        Ok(())
    }

    /// Replace an assigned pod's object; `spec.nodeName` may move it
    pub fn update_pod(&self, pod: Pod) -> Result<(), CacheError> {
        let info = Arc::new(PodInfo::new(pod)?);

        let mut inner = self.inner.write();
        let current = inner
            .pods
            .get(&info.key)
            .ok_or_else(|| CacheError::pod_not_found(&info.key))?;

        let node_name = info
            .node_name()
            .map(str::to_string)
            .unwrap_or_else(|| current.node_name.clone());
        if !inner.nodes.contains_key(&node_name) {
            return Err(CacheError::node_not_found(node_name));
        }

        inner.place_pod(PodState {
            info,
            node_name,
            assumed: false,
            binding_finished: false,
            deadline: None,
        });
        Ok(())
    }

    /// Update a tracked pod or assign an untracked bound one, under one lock
    fn upsert_pod(&self, pod: Pod) -> Result<(), CacheError> {
        let info = Arc::new(PodInfo::new(pod)?);

        let mut inner = self.inner.write();
        let node_name = match (info.node_name().filter(|n| !n.is_empty()), inner.pods.get(&info.key)) {
            (Some(bound), _) => bound.to_string(),
            (None, Some(current)) => current.node_name.clone(),
            (None, None) => {
                debug!("Ignoring update of untracked pending pod {}", info.key);
                return Ok(());
            }
        };
        if !inner.nodes.contains_key(&node_name) {
            return Err(CacheError::node_not_found(node_name));
        }

        inner.place_pod(PodState {
            info,
            node_name,
            assumed: false,
            binding_finished: false,
            deadline: None,
        });
        Ok(())
    }

    /// Clear a pod's assignment
    pub fn unassign_pod(&self, key: &PodKey) -> Result<(), CacheError> {
        let mut inner = self.inner.write();
        let state = inner
            .detach_pod(key)
            .ok_or_else(|| CacheError::pod_not_found(key))?;
        debug!("Unassigned pod {} from node {}", key, state.node_name);
        Ok(())
    }

    /// Tentatively place a pod chosen by a scheduling cycle, before binding
    pub fn assume_pod(&self, pod: Pod, node_name: &str) -> Result<(), CacheError> {
        let info = Arc::new(PodInfo::new(pod)?);

        let mut inner = self.inner.write();
        if inner.pods.contains_key(&info.key) {
            return Err(CacheError::PodExists {
                pod: info.key.to_string(),
            });
        }
        if !inner.nodes.contains_key(node_name) {
            return Err(CacheError::node_not_found(node_name));
        }

        debug!("Assumed pod {} on node {}", info.key, node_name);
        inner.place_pod(PodState {
            info,
            node_name: node_name.to_string(),
            assumed: true,
            binding_finished: false,
            deadline: None,
        });
        Ok(())
    }

    /// Start the expiry clock of an assumed pod once its binding was sent
    pub fn finish_binding(&self, key: &PodKey, now: Instant) -> Result<(), CacheError> {
        let ttl = self.config.assumed_pod_ttl;
        let mut inner = self.inner.write();
        let state = inner
            .pods
            .get_mut(key)
            .ok_or_else(|| CacheError::pod_not_found(key))?;

        if state.assumed {
            state.binding_finished = true;
            state.deadline = now.checked_add(ttl);
        }
        Ok(())
    }

    /// Roll back an assumed pod
    pub fn forget_pod(&self, key: &PodKey) -> Result<(), CacheError> {
        let mut inner = self.inner.write();
        match inner.pods.get(key) {
            None => return Err(CacheError::pod_not_found(key)),
            Some(state) if !state.assumed => {
                return Err(CacheError::PodNotAssumed {
                    pod: key.to_string(),
                })
            }
            Some(_) => {}
        }

        inner.detach_pod(key);
        debug!("Forgot assumed pod {}", key);
        Ok(())
    }

    pub fn is_assumed(&self, key: &PodKey) -> bool {
        self.inner
            .read()
            .pods
            .get(key)
            .map(|p| p.assumed)
            .unwrap_or(false)
    }

    /// Node a pod is assigned (or assumed) to
    pub fn pod_node(&self, key: &PodKey) -> Option<String> {
        self.inner.read().pods.get(key).map(|p| p.node_name.clone())
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn pod_count(&self) -> usize {
        self.inner.read().pods.len()
    }

    /// Copy current state into `snapshot`.
    ///
    /// Nodes whose generation is not newer than the snapshot's keep their
    /// existing copy; changed nodes are cloned fresh, removed nodes dropped.
    /// A snapshot last filled by another cache is rebuilt from scratch.
    pub fn update_snapshot(&self, snapshot: &mut Snapshot) {
        let now = Instant::now();
        let inner = self.inner.read();
        let same_cache = snapshot.cache_id() == self.id;

        if same_cache && snapshot.generation() == inner.generation && inner.generation != 0 {
            // Node state unchanged, refresh stores only
            let stores = inner
                .stores
                .iter()
                .map(|(name, store)| (name.clone(), store.view(now)))
                .collect();
            let nodes = snapshot.node_infos().clone();
            snapshot.replace(nodes, stores, inner.generation, self.id);
            return;
        }

        let mut reused = 0;
        let node_infos: HashMap<String, Arc<NodeInfo>> = inner
            .nodes
            .iter()
            .map(|(name, info)| {
                let copy = match snapshot.get(name).filter(|_| same_cache) {
                    Some(existing) if existing.generation() == info.generation() => {
                        reused += 1;
                        existing.clone()
                    }
                    _ => Arc::new(info.clone()),
                };
                (name.clone(), copy)
            })
            .collect();

        let stores = inner
            .stores
            .iter()
            .map(|(name, store)| (name.clone(), store.view(now)))
            .collect();

        debug!(
            "Updated snapshot to generation {} ({} node(s), {} reused)",
            inner.generation,
            node_infos.len(),
            reused
        );
        snapshot.replace(node_infos, stores, inner.generation, self.id);
    }

    /// Put a value into an auxiliary store
    pub fn store_put(
        &self,
        store: &str,
        key: impl Into<String>,
        value: StoreValue,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.write();
        let store = inner
            .stores
            .get_mut(store)
            .ok_or_else(|| CacheError::store_not_found(store))?;
        store.put(key, value, Instant::now());
        Ok(())
    }

    /// Live value from an auxiliary store
    pub fn store_get(&self, store: &str, key: &str) -> Result<Option<StoreValue>, CacheError> {
        let inner = self.inner.read();
        let store = inner
            .stores
            .get(store)
            .ok_or_else(|| CacheError::store_not_found(store))?;
        Ok(store.get(key, Instant::now()))
    }

    /// Delete from an auxiliary store, returning whether the key existed
    pub fn store_delete(&self, store: &str, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.write();
        let store = inner
            .stores
            .get_mut(store)
            .ok_or_else(|| CacheError::store_not_found(store))?;
        Ok(store.delete(key))
    }

    /// One expiry sweep over assumed pods and store entries
    pub fn cleanup_expired(&self, now: Instant) -> CleanupStats {
        let mut inner = self.inner.write();

        let expired: Vec<PodKey> = inner
            .pods
            .iter()
            .filter(|(_, p)| p.assumed && p.binding_finished)
            .filter(|(_, p)| p.deadline.map(|d| now >= d).unwrap_or(false))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            warn!("Assumed pod {} expired before being confirmed", key);
            inner.detach_pod(key);
        }

        let expired_store_entries: usize = inner
            .stores
            .values_mut()
            .map(|s| s.cleanup_expired(now))
            .sum();

        CleanupStats {
            expired_assumed_pods: expired.len(),
            expired_store_entries,
        }
    }

    /// Run the periodic expiry sweeper until the token is cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting cache sweeper (period: {:?}, assumed pod ttl: {:?})",
            self.config.cleanup_period, self.config.assumed_pod_ttl
        );

        let mut interval = tokio::time::interval(self.config.cleanup_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let stats = self.cleanup_expired(Instant::now());
                    info!(
                        "Cache sweeper shutting down after a final sweep ({} assumed pod(s), {} store entr(ies) expired)",
                        stats.expired_assumed_pods, stats.expired_store_entries
                    );
                    return;
                }
                _ = interval.tick() => {
                    let stats = self.cleanup_expired(Instant::now());
                    if stats != CleanupStats::default() {
                        debug!(
                            "Cache sweep expired {} assumed pod(s) and {} store entr(ies)",
                            stats.expired_assumed_pods, stats.expired_store_entries
                        );
                    }
                }
            }
        }
    }

    /// Apply an ingestion event
    pub fn apply(&self, event: ClusterEvent) -> Result<(), CacheError> {
        debug!("Applying cluster event {}", event.kind());
        match event {
            ClusterEvent::NodeAdded(node) => self.add_node(node),
            ClusterEvent::NodeUpdated(node) => self.update_node(node),
            ClusterEvent::NodeDeleted(name) => {
                self.remove_node(&name);
                Ok(())
            }
            ClusterEvent::PodAdded(pod) => match bound_node(&pod) {
                Some(node_name) => self.assign_pod(pod, &node_name),
                None => {
                    debug!("Ignoring pod event without spec.nodeName");
                    Ok(())
                }
            },
            ClusterEvent::PodUpdated(pod) => self.upsert_pod(pod),
            ClusterEvent::PodDeleted(key) => match self.unassign_pod(&key) {
                Err(CacheError::PodNotFound { .. }) => Ok(()),
                other => other,
            },
        }
    }

    /// Invariant violations between the pod map and node assignment sets
    pub fn check_consistency(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut violations = Vec::new();

        for (key, state) in &inner.pods {
            match inner.nodes.get(&state.node_name) {
                Some(node) if node.has_pod(key) => {}
                Some(_) => violations.push(format!(
                    "pod {} maps to node {} which does not list it",
                    key, state.node_name
                )),
                None => violations.push(format!(
                    "pod {} maps to missing node {}",
                    key, state.node_name
                )),
            }
        }

        for (name, node) in &inner.nodes {
            for key in node.pod_keys() {
                match inner.pods.get(key) {
                    Some(state) if state.node_name == *name => {}
                    _ => violations.push(format!(
                        "node {} lists pod {} without a matching pod record",
                        name, key
                    )),
                }
            }
        }

        violations
    }
}

fn bound_node(pod: &Pod) -> Option<String> {
    pod.spec.as_ref().and_then(|s| s.node_name.clone())
}
