//! Built-in plugins

pub mod helper;
pub mod less_topology_key;
pub mod node_resources;
pub mod node_selector;
pub mod taint_toleration;

pub use less_topology_key::LessTopologyKey;
pub use node_resources::{BalancedAllocation, LeastAllocated, LeastAllocatedArgs, NodeResourcesFit};
pub use node_selector::NodeSelector;
pub use taint_toleration::TaintToleration;

use crate::error::{Result, SchedulerError};
use crate::framework::{decode_args, Plugin, PluginArgs, PluginFactory};
use serde::Deserialize;
use std::sync::Arc;

/// Plugins enabled by the default profile, in registration order
pub const DEFAULT_PLUGINS: [&str; 6] = [
    node_resources::FIT_NAME,
    node_selector::NAME,
    taint_toleration::NAME,
    less_topology_key::NAME,
    node_resources::LEAST_ALLOCATED_NAME,
    node_resources::BALANCED_ALLOCATION_NAME,
];

/// Arguments of plugins that take none
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

fn factory<F>(build: F) -> PluginFactory
where
    F: Fn(&PluginArgs) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
{
    Box::new(build)
}

fn without_args<P>(name: &'static str, build: fn() -> P) -> PluginFactory
where
    P: Plugin + 'static,
{
    factory(move |args| {
        decode_args::<NoArgs>(name, args)?;
        Ok(Arc::new(build()) as Arc<dyn Plugin>)
    })
}

pub(crate) fn in_tree_factories() -> Vec<(&'static str, PluginFactory)> {
    vec![
        (node_resources::FIT_NAME, without_args(node_resources::FIT_NAME, || NodeResourcesFit)),
        (node_selector::NAME, without_args(node_selector::NAME, || NodeSelector)),
        (taint_toleration::NAME, without_args(taint_toleration::NAME, || TaintToleration)),
        (less_topology_key::NAME, without_args(less_topology_key::NAME, || LessTopologyKey)),
        (
            node_resources::LEAST_ALLOCATED_NAME,
            factory(|args| {
                let args: LeastAllocatedArgs = decode_args(node_resources::LEAST_ALLOCATED_NAME, args)?;
                let plugin = LeastAllocated::new(args).map_err(|e| {
                    SchedulerError::config(
                        format!("invalid arguments for plugin LeastAllocated: {}", e),
                        "Use non-negative cpu_weight and memory_weight",
                    )
                })?;
                Ok(Arc::new(plugin) as Arc<dyn Plugin>)
            }),
        ),
        (
            node_resources::BALANCED_ALLOCATION_NAME,
            without_args(node_resources::BALANCED_ALLOCATION_NAME, || BalancedAllocation),
        ),
    ]
}
