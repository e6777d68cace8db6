//! Plugin pipeline: statuses, cycle state, extension point traits,
//! configuration and the cycle runtime.

pub mod cycle_state;
pub mod interface;
pub mod parallelize;
pub mod profile;
pub mod registry;
pub mod runtime;
pub mod status;

pub use cycle_state::{CycleState, StateData};
pub use interface::{
    FilterPlugin, Plugin, PreFilterPlugin, PreScorePlugin, ReservePlugin, ScoreExtensions,
    ScorePlugin,
};
pub use parallelize::Parallelizer;
pub use profile::{PluginArgs, PluginConfig, SchedulerProfile, TieBreaker};
pub use registry::{decode_args, PluginFactory, Registry};
pub use runtime::Framework;
pub use status::{Code, NodeToStatusMap, Status};
