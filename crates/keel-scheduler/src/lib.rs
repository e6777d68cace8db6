//! Keel Scheduler - pluggable pod to node placement
//!
//! This crate provides:
//! - The cluster state cache, node infos, auxiliary TTL stores and snapshots
//! - Per-cycle state shared by plugin stages
//! - The plugin pipeline (PreFilter, Filter, PreScore, Score, NormalizeScore, Reserve)
//! - Plugin registry and YAML scheduler profiles
//! - Built-in filter and score plugins
//! - A scheduler driver tying cache and pipeline together

pub mod cache;
pub mod error;
pub mod framework;
pub mod plugins;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use cache::{Cache, CacheConfig, NodeInfo, PodInfo, Snapshot, StoreConfig};
pub use error::{CacheError, CycleStateError, Result, SchedulerError};
pub use framework::{CycleState, Framework, Registry, SchedulerProfile, Status};
pub use scheduler::Scheduler;
pub use types::{NodeScore, ScheduleResult, MAX_NODE_SCORE};
