//! The scheduling cycle: PreFilter, Filter, PreScore, Score, NormalizeScore,
//! ranking and Reserve over one pod and one snapshot.

use crate::cache::{NodeInfo, Snapshot};
use crate::error::{Result, SchedulerError};
use crate::framework::cycle_state::CycleState;
use crate::framework::interface::Plugin;
use crate::framework::parallelize::Parallelizer;
use crate::framework::profile::{SchedulerProfile, TieBreaker};
use crate::framework::registry::Registry;
use crate::framework::status::{Code, NodeToStatusMap, Status};
use crate::types::{NodeScore, ScheduleResult, MAX_NODE_SCORE, MIN_NODE_SCORE};
use keel_core::{Pod, PodKey};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest sum of score weights whose weighted totals still fit in an `i64`
pub const MAX_TOTAL_WEIGHT: i64 = i64::MAX / MAX_NODE_SCORE;

#[derive(Clone)]
struct WeightedPlugin {
    plugin: Arc<dyn Plugin>,
    weight: i64,
}

/// An instantiated plugin pipeline
pub struct Framework {
    pre_filter: Vec<Arc<dyn Plugin>>,
    filter: Arc<[Arc<dyn Plugin>]>,
    pre_score: Vec<Arc<dyn Plugin>>,
    score: Vec<WeightedPlugin>,
    reserve: Vec<Arc<dyn Plugin>>,
    parallelizer: Parallelizer,
    tie_breaker: TieBreaker,
}

impl Framework {
    /// Build the pipeline described by `profile` from `registry`
    pub fn new(profile: &SchedulerProfile, registry: &Registry) -> Result<Self> {
        profile.validate()?;

        let mut plugins = Vec::with_capacity(profile.plugins.len());
        for config in &profile.plugins {
            let plugin = registry.build(&config.name, &config.args)?;
            if plugin.name() != config.name {
                return Err(SchedulerError::config(
                    format!(
                        "factory for {} built a plugin named {}",
                        config.name,
                        plugin.name()
                    ),
                    "Plugin names must match their registry entries",
                ));
            }
            plugins.push((plugin, config.weight));
        }

        Self::from_plugins(plugins, profile.parallelism, profile.tie_breaker)
    }

    /// Build a pipeline from plugin instances and score weights, in registration order
    pub fn from_plugins(
        plugins: Vec<(Arc<dyn Plugin>, i64)>,
        parallelism: usize,
        tie_breaker: TieBreaker,
    ) -> Result<Self> {
        let mut pre_filter = Vec::new();
        let mut filter = Vec::new();
        let mut pre_score = Vec::new();
        let mut score = Vec::new();
        let mut reserve = Vec::new();
        let mut total_weight: i64 = 0;

        for (plugin, weight) in plugins {
            if weight < 1 {
                return Err(SchedulerError::config(
                    format!("plugin {} has weight {}", plugin.name(), weight),
                    "Plugin weights must be 1 or more",
                ));
            }

            let mut stages = Vec::new();
            if plugin.as_pre_filter().is_some() {
                pre_filter.push(plugin.clone());
                stages.push("PreFilter");
            }
            if plugin.as_filter().is_some() {
                filter.push(plugin.clone());
                stages.push("Filter");
            }
            if plugin.as_pre_score().is_some() {
                pre_score.push(plugin.clone());
                stages.push("PreScore");
            }
            if let Some(scorer) = plugin.as_score() {
                stages.push("Score");
                if scorer.score_extensions().is_some() {
                    stages.push("NormalizeScore");
                }
                total_weight = total_weight.saturating_add(weight);
                if total_weight > MAX_TOTAL_WEIGHT {
                    return Err(SchedulerError::config(
                        format!(
                            "score plugin weights add up to more than {}",
                            MAX_TOTAL_WEIGHT
                        ),
                        "Lower the weights of the score plugins",
                    ));
                }
                score.push(WeightedPlugin {
                    plugin: plugin.clone(),
                    weight,
                });
            }
            if plugin.as_reserve().is_some() {
                reserve.push(plugin.clone());
                stages.push("Reserve");
            }

            if stages.is_empty() {
                warn!("Plugin {} implements no extension point", plugin.name());
            } else {
                info!(
                    "Enabled plugin {} at {} (weight {})",
                    plugin.name(),
                    stages.join(", "),
                    weight
                );
            }
        }

        Ok(Self {
            pre_filter,
            filter: filter.into(),
            pre_score,
            score,
            reserve,
            parallelizer: Parallelizer::new(parallelism),
            tie_breaker,
        })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelizer.parallelism()
    }

    pub fn tie_breaker(&self) -> TieBreaker {
        self.tie_breaker
    }

    /// Run one scheduling cycle for `pod` against `snapshot`
    pub async fn run_cycle(
        &self,
        pod: Arc<Pod>,
        snapshot: Arc<Snapshot>,
        token: &CancellationToken,
    ) -> Result<ScheduleResult> {
        let pod_key = PodKey::from_pod(&pod)?;
        let state = Arc::new(CycleState::new());
        let nodes: Arc<[Arc<NodeInfo>]> = snapshot.list().into();

        debug!(
            "Scheduling pod {} against {} node(s) at generation {}",
            pod_key,
            nodes.len(),
            snapshot.generation()
        );

        self.check_cancelled(token, &pod_key)?;
        self.run_pre_filter_plugins(&state, &pod, &nodes, &pod_key)?;

        let (feasible, mut node_statuses) = self
            .run_filter_plugins(&state, &pod, &nodes, token, &pod_key)
            .await?;

        if feasible.is_empty() {
            return Err(SchedulerError::fit_error(
                pod_key.to_string(),
                nodes.len(),
                node_statuses,
            ));
        }

        debug!("Pod {} has {} feasible node(s)", pod_key, feasible.len());

        let mut scores = if feasible.len() == 1 {
            vec![NodeScore::new(feasible[0].name(), 0)]
        } else {
            self.run_pre_score_plugins(&state, &pod, &feasible)?;
            self.run_score_plugins(&state, &pod, &feasible, token, &pod_key, &mut node_statuses)
                .await?
        };

        if scores.is_empty() {
            return Err(SchedulerError::fit_error(
                pod_key.to_string(),
                nodes.len(),
                node_statuses,
            ));
        }

        rank(&mut scores, self.tie_breaker);
        let suggested_host = scores[0].name.clone();

        self.run_reserve_plugins(&state, &pod, &suggested_host, &pod_key)?;

        info!(
            "Selected node {} for pod {} with score {}",
            suggested_host, pod_key, scores[0].score
        );

        Ok(ScheduleResult {
            suggested_host,
            evaluated_nodes: nodes.len(),
            feasible_nodes: feasible.len(),
            node_statuses,
            scores,
        })
    }

    fn check_cancelled(&self, token: &CancellationToken, pod_key: &PodKey) -> Result<()> {
        if token.is_cancelled() {
            debug!("Scheduling cycle for pod {} cancelled", pod_key);
            return Err(SchedulerError::Cancelled {
                pod: pod_key.to_string(),
            });
        }
        Ok(())
    }

    fn run_pre_filter_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Arc<NodeInfo>],
        pod_key: &PodKey,
    ) -> Result<()> {
        for plugin in &self.pre_filter {
            let Some(pre_filter) = plugin.as_pre_filter() else {
                continue;
            };

            let status = pre_filter.pre_filter(state, pod, nodes).with_plugin(plugin.name());
            match status.code() {
                Code::Success => {}
                Code::Skip => {
                    debug!("Plugin {} skips Filter for pod {}", plugin.name(), pod_key);
                    state.skip_filter_plugin(plugin.name());
                }
                Code::Unschedulable | Code::UnschedulableAndUnresolvable => {
                    debug!("Pod {} rejected at PreFilter: {}", pod_key, status);
                    return Err(SchedulerError::unschedulable(pod_key.to_string(), &status));
                }
                Code::Wait | Code::Error => {
                    warn!("PreFilter failed for pod {}: {}", pod_key, status);
                    return Err(SchedulerError::plugin_failed("PreFilter", &status));
                }
            }
        }
        Ok(())
    }

    async fn run_filter_plugins(
        &self,
        state: &Arc<CycleState>,
        pod: &Arc<Pod>,
        nodes: &Arc<[Arc<NodeInfo>]>,
        token: &CancellationToken,
        pod_key: &PodKey,
    ) -> Result<(Vec<Arc<NodeInfo>>, NodeToStatusMap)> {
        let plugins = self.filter.clone();
        let results = {
            let (state, pod, nodes) = (state.clone(), pod.clone(), nodes.clone());
            self.parallelizer
                .until(token, nodes.len(), move |i| {
                    filter_node(&plugins, &state, &pod, &nodes[i])
                })
                .await
        };
        self.check_cancelled(token, pod_key)?;

        let mut feasible = Vec::new();
        let mut statuses = NodeToStatusMap::new();
        for (node, result) in nodes.iter().zip(results) {
            match result {
                Some(status) if status.is_passing() => feasible.push(node.clone()),
                Some(status) => {
                    if status.is_error() {
                        warn!("Filter error on node {} for pod {}: {}", node.name(), pod_key, status);
                    }
                    statuses.insert(node.name().to_string(), status);
                }
                None => {
                    statuses.insert(
                        node.name().to_string(),
                        Status::error("filter plugin panicked"),
                    );
                }
            }
        }

        Ok((feasible, statuses))
    }

    fn run_pre_score_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Arc<NodeInfo>],
    ) -> Result<()> {
        for plugin in &self.pre_score {
            let Some(pre_score) = plugin.as_pre_score() else {
                continue;
            };

            let status = pre_score.pre_score(state, pod, nodes).with_plugin(plugin.name());
            match status.code() {
                Code::Success => {}
                Code::Skip => state.skip_score_plugin(plugin.name()),
                _ => {
                    warn!("PreScore failed: {}", status);
                    return Err(SchedulerError::plugin_failed("PreScore", &status));
                }
            }
        }
        Ok(())
    }

    /// Score, normalize and weight every feasible node.
    ///
    /// Nodes a plugin cannot score are dropped and recorded in `statuses`.
    async fn run_score_plugins(
        &self,
        state: &Arc<CycleState>,
        pod: &Arc<Pod>,
        nodes: &[Arc<NodeInfo>],
        token: &CancellationToken,
        pod_key: &PodKey,
        statuses: &mut NodeToStatusMap,
    ) -> Result<Vec<NodeScore>> {
        let active: Arc<[WeightedPlugin]> = self
            .score
            .iter()
            .filter(|p| !state.is_score_skipped(p.plugin.name()))
            .cloned()
            .collect();

        let results = {
            let (plugins, state, pod) = (active.clone(), state.clone(), pod.clone());
            let nodes: Arc<[Arc<NodeInfo>]> = nodes.into();
            self.parallelizer
                .until(token, nodes.len(), move |i| {
                    score_node(&plugins, &state, &pod, &nodes[i])
                })
                .await
        };
        self.check_cancelled(token, pod_key)?;

        // Per plugin, the raw scores of every node that all plugins could score
        let mut scored: Vec<&Arc<NodeInfo>> = Vec::new();
        let mut per_plugin: Vec<Vec<NodeScore>> = vec![Vec::new(); active.len()];
        for (node, result) in nodes.iter().zip(results) {
            match result {
                Some(Ok(raw)) => {
                    for (list, score) in per_plugin.iter_mut().zip(raw) {
                        list.push(NodeScore::new(node.name(), score));
                    }
                    scored.push(node);
                }
                Some(Err(status)) => {
                    warn!("Dropping node {} for pod {}: {}", node.name(), pod_key, status);
                    statuses.insert(node.name().to_string(), status);
                }
                None => {
                    statuses.insert(
                        node.name().to_string(),
                        Status::error("score plugin panicked"),
                    );
                }
            }
        }

        for (weighted, list) in active.iter().zip(per_plugin.iter_mut()) {
            let name = weighted.plugin.name();
            let Some(extensions) = weighted.plugin.as_score().and_then(|s| s.score_extensions())
            else {
                continue;
            };

            let status = extensions.normalize_score(state, pod, list).with_plugin(name);
            if !status.is_success() {
                warn!("NormalizeScore failed: {}", status);
                return Err(SchedulerError::plugin_failed("NormalizeScore", &status));
            }
        }

        let mut totals: Vec<NodeScore> = scored
            .iter()
            .map(|node| NodeScore::new(node.name(), 0))
            .collect();
        for (weighted, list) in active.iter().zip(&per_plugin) {
            for (total, score) in totals.iter_mut().zip(list) {
                if !(MIN_NODE_SCORE..=MAX_NODE_SCORE).contains(&score.score) {
                    let status = Status::error(format!(
                        "plugin returned an invalid score {} for node {}",
                        score.score, score.name
                    ))
                    .with_plugin(weighted.plugin.name());
                    return Err(SchedulerError::plugin_failed("Score", &status));
                }
                total.score += score.score * weighted.weight;
            }
        }

        for total in &totals {
            debug!("Node {} total score {} for pod {}", total.name, total.score, pod_key);
        }

        Ok(totals)
    }

    fn run_reserve_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
        pod_key: &PodKey,
    ) -> Result<()> {
        for plugin in &self.reserve {
            let Some(reserve) = plugin.as_reserve() else {
                continue;
            };

            let status = reserve.reserve(state, pod, node_name).with_plugin(plugin.name());
            if status.is_success() {
                continue;
            }

            warn!(
                "Reserve of pod {} on node {} failed, rolling back: {}",
                pod_key, node_name, status
            );
            self.run_unreserve_plugins(state, pod, node_name);

            return Err(if status.is_rejected() {
                SchedulerError::unschedulable(pod_key.to_string(), &status)
            } else {
                SchedulerError::plugin_failed("Reserve", &status)
            });
        }
        Ok(())
    }

    /// Undo Reserve on every reserve plugin, last registered first
    pub fn run_unreserve_plugins(&self, state: &CycleState, pod: &Pod, node_name: &str) {
        for plugin in self.reserve.iter().rev() {
            if let Some(reserve) = plugin.as_reserve() {
                reserve.unreserve(state, pod, node_name);
            }
        }
    }
}

/// Run the filter plugins on one node, stopping at the first objection
fn filter_node(plugins: &[Arc<dyn Plugin>], state: &CycleState, pod: &Pod, node: &NodeInfo) -> Status {
    for plugin in plugins {
        if state.is_filter_skipped(plugin.name()) {
            continue;
        }
        let Some(filter) = plugin.as_filter() else {
            continue;
        };

        let status = filter.filter(state, pod, node);
        if !status.is_passing() {
            debug!(
                "Node {} filtered out by {}: {}",
                node.name(),
                plugin.name(),
                status.message()
            );
            return status.with_plugin(plugin.name());
        }
    }
    Status::success()
}

/// Raw score of one node from every active score plugin
fn score_node(
    plugins: &[WeightedPlugin],
    state: &CycleState,
    pod: &Pod,
    node: &NodeInfo,
) -> std::result::Result<Vec<i64>, Status> {
    plugins
        .iter()
        .filter_map(|p| p.plugin.as_score().map(|s| (p.plugin.name(), s)))
        .map(|(name, scorer)| scorer.score(state, pod, node).map_err(|s| s.with_plugin(name)))
        .collect()
}

/// Order by total score descending, ties by the tie breaker
fn rank(scores: &mut [NodeScore], tie_breaker: TieBreaker) {
    scores.sort_by(|a, b| match b.score.cmp(&a.score) {
        Ordering::Equal => match tie_breaker {
            TieBreaker::LowestName => a.name.cmp(&b.name),
            TieBreaker::HighestName => b.name.cmp(&a.name),
        },
        other => other,
    });
}
