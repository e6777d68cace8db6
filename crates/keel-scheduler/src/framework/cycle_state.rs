//! Per-cycle scratch space shared by the plugin stages of one scheduling cycle.
//!
//! Values are type-erased behind [`StateData`]. Every value type decides how
//! it is copied when the state is forked with [`CycleState::clone`]:
//! immutable values hand back the same `Arc` (shallow), mutable ones build a
//! fresh value (deep).

use crate::error::CycleStateError;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Upcast helper implemented for every `Send + Sync` type
pub trait AsAnyArc {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A value stored in [`CycleState`]
pub trait StateData: AsAnyArc + Send + Sync + 'static {
    /// Copy of this value for a forked cycle state.
    ///
    /// Returning `self` is correct for values never mutated after the write.
    fn clone_state(self: Arc<Self>) -> Arc<dyn StateData>;
}

#[derive(Default)]
struct Inner {
    storage: HashMap<String, Arc<dyn StateData>>,
    skip_filter_plugins: HashSet<String>,
    skip_score_plugins: HashSet<String>,
}

/// Key/value state of one scheduling cycle for one pod
#[derive(Default)]
pub struct CycleState {
    inner: RwLock<Inner>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value under the key
    pub fn write(&self, key: impl Into<String>, value: Arc<dyn StateData>) {
        self.inner.write().storage.insert(key.into(), value);
    }

    /// Read a value written earlier in this cycle
    pub fn read<T: StateData>(&self, key: &str) -> Result<Arc<T>, CycleStateError> {
        let value = self
            .inner
            .read()
            .storage
            .get(key)
            .cloned()
            .ok_or_else(|| CycleStateError::NotFound {
                key: key.to_string(),
            })?;

        value
            .into_any_arc()
            .downcast::<T>()
            .map_err(|_| CycleStateError::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn delete(&self, key: &str) {
        self.inner.write().storage.remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.read().storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record that a plugin opted out of Filter at PreFilter
    pub fn skip_filter_plugin(&self, plugin: impl Into<String>) {
        self.inner.write().skip_filter_plugins.insert(plugin.into());
    }

    pub fn is_filter_skipped(&self, plugin: &str) -> bool {
        self.inner.read().skip_filter_plugins.contains(plugin)
    }

    /// Record that a plugin opted out of Score at PreScore
    pub fn skip_score_plugin(&self, plugin: impl Into<String>) {
        self.inner.write().skip_score_plugins.insert(plugin.into());
    }

    pub fn is_score_skipped(&self, plugin: &str) -> bool {
        self.inner.read().skip_score_plugins.contains(plugin)
    }
}

impl Clone for CycleState {
    /// Fork the state; writes to either copy are invisible to the other
    fn clone(&self) -> Self {
        let inner = self.inner.read();
        let storage = inner
            .storage
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v).clone_state()))
            .collect();

        Self {
            inner: RwLock::new(Inner {
                storage,
                skip_filter_plugins: inner.skip_filter_plugins.clone(),
                skip_score_plugins: inner.skip_score_plugins.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        let mut keys: Vec<&String> = inner.storage.keys().collect();
        keys.sort();
        f.debug_struct("CycleState").field("keys", &keys).finish()
    }
}
