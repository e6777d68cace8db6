use crate::cache::{Cache, Snapshot};
use crate::framework::{Framework, Registry, SchedulerProfile};
use crate::types::ScheduleResult;
use crate::{Result, SchedulerError};
use keel_core::{Pod, PodKey};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives scheduling cycles over a shared cache
///
/// Each cycle refreshes the scheduler's snapshot, runs the plugin pipeline
/// and assumes the pod on the chosen node. Binding the decision to the
/// cluster is left to the caller, which reports back through
/// [`confirm`](Scheduler::confirm) or [`forget`](Scheduler::forget).
pub struct Scheduler {
    cache: Arc<Cache>,
    framework: Arc<Framework>,
    snapshot: Mutex<Snapshot>,
}

impl Scheduler {
    /// Build the cache and pipeline described by a profile
    pub fn new(profile: &SchedulerProfile, registry: &Registry) -> Result<Self> {
        let framework = Framework::new(profile, registry)?;
        let cache = Cache::new(profile.cache_config())?;
        Ok(Self::with_parts(Arc::new(cache), Arc::new(framework)))
    }

    pub fn with_parts(cache: Arc<Cache>, framework: Arc<Framework>) -> Self {
        Self {
            cache,
            framework,
            snapshot: Mutex::new(Snapshot::new()),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn framework(&self) -> &Arc<Framework> {
        &self.framework
    }

    /// Fresh snapshot for the next cycle
    fn refresh_snapshot(&self) -> Arc<Snapshot> {
        let mut snapshot = self.snapshot.lock();
        self.cache.update_snapshot(&mut snapshot);
        Arc::new(snapshot.clone())
    }

    /// Run one scheduling cycle and assume the pod on the selected node
    pub async fn schedule_one(&self, pod: Pod, token: &CancellationToken) -> Result<ScheduleResult> {
        let pod_key = PodKey::from_pod(&pod)?;
        let snapshot = self.refresh_snapshot();
        let pod = Arc::new(pod);

        let result = self.framework.run_cycle(pod.clone(), snapshot, token).await?;

        let mut assumed = (*pod).clone();
        if let Some(spec) = assumed.spec.as_mut() {
            spec.node_name = Some(result.suggested_host.clone());
        }
        self.cache.assume_pod(assumed, &result.suggested_host)?;

        debug!("Assumed pod {} on node {}", pod_key, result.suggested_host);
        Ok(result)
    }

    /// The binding of an assumed pod was sent; start its expiry clock
    pub fn confirm(&self, key: &PodKey) -> Result<()> {
        self.cache.finish_binding(key, Instant::now())?;
        Ok(())
    }

    /// The binding of an assumed pod failed; release its placement
    pub fn forget(&self, key: &PodKey) -> Result<()> {
        self.cache.forget_pod(key)?;
        Ok(())
    }

    /// Schedule pending pods one after another
    ///
    /// Each placement is assumed and confirmed before the next pod, so later
    /// pods see the resources taken by earlier ones.
    pub async fn schedule_pending(
        &self,
        pods: Vec<Pod>,
        token: &CancellationToken,
    ) -> Vec<(PodKey, Result<ScheduleResult>)> {
        info!("Found {} unscheduled pods", pods.len());

        let mut outcomes = Vec::with_capacity(pods.len());
        for pod in pods {
            let pod_key = match PodKey::from_pod(&pod) {
                Ok(key) => key,
                Err(e) => {
                    error!("Skipping pod without a usable key: {}", e);
                    continue;
                }
            };

            let outcome = match self.schedule_one(pod, token).await {
                Ok(result) => {
                    info!("Scheduled pod {} to node {}", pod_key, result.suggested_host);
                    self.confirm(&pod_key).map(|_| result)
                }
                Err(e @ SchedulerError::Cancelled { .. }) => {
                    warn!("Scheduling stopped at pod {}", pod_key);
                    outcomes.push((pod_key, Err(e)));
                    break;
                }
                Err(e) => {
                    error!("Failed to schedule pod {}: {}", pod_key, e);
                    Err(e)
                }
            };
            outcomes.push((pod_key, outcome));
        }
        outcomes
    }

    /// Spawn the cache's expiry sweeper
    pub fn run_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        let cache = self.cache.clone();
        tokio::spawn(async move { cache.run(token).await })
    }
}
