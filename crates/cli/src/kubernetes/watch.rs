//! Lifecycle tracking of the profiling pod
//!
//! The job's pod name is generated by the API server, so the watcher finds
//! it by the job's id label and polls until it can be streamed from.

use super::pod::{ExecutionUnit, PodPhase};
use super::{label_selector, ClusterApi, ClusterError};
use std::time::Duration;
use tokio::time::{interval_at, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polling policy for [`PodWatcher::wait_for_start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Time between polls (default: 1 second)
    pub interval: Duration,
    /// Give up after this long (default: 5 minutes)
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// How the profiling pod was first seen ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The agent is running; its logs can be followed
    Running(ExecutionUnit),
    /// The agent already exited successfully before we saw it running
    Completed(ExecutionUnit),
}

impl StartOutcome {
    pub fn unit(&self) -> &ExecutionUnit {
        match self {
            StartOutcome::Running(unit) | StartOutcome::Completed(unit) => unit,
        }
    }
}

/// Observes pods through a shared cluster client
pub struct PodWatcher<'a> {
    cluster: &'a dyn ClusterApi,
    policy: WaitPolicy,
}

impl<'a> PodWatcher<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, policy: WaitPolicy) -> Self {
        Self { cluster, policy }
    }

    /// Current snapshot of a named pod
    pub async fn get_details(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<ExecutionUnit, ClusterError> {
        let pod = self
            .cluster
            .get_pod(namespace, name)
            .await?
            .ok_or_else(|| ClusterError::NotFound {
                kind: "pod",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        Ok(ExecutionUnit::from(&pod))
    }

    /// Poll until the job's pod is running or has succeeded
    ///
    /// A `Failed` pod ends the wait immediately. API errors and pods that are
    /// still pending are retried on the next tick until the timeout elapses.
    pub async fn wait_for_start(
        &self,
        job_id: &str,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<StartOutcome, ClusterError> {
        let selector = label_selector(job_id);
        let started = Instant::now();
        let deadline = started + self.policy.timeout;
        let timed_out = || ClusterError::Timeout {
            selector: selector.clone(),
            waited: started.elapsed(),
        };

        let mut ticker = interval_at(started + self.policy.interval, self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(selector = %selector, namespace = %namespace, "Waiting for profiling pod");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ClusterError::Cancelled { selector: selector.clone() });
                }
                _ = sleep_until(deadline) => return Err(timed_out()),
                _ = ticker.tick() => {}
            }

            let pods = match timeout_at(deadline, self.cluster.list_pods(namespace, &selector)).await
            {
                Err(_) => return Err(timed_out()),
                Ok(Err(e)) => {
                    warn!(error = %e, selector = %selector, "Failed to list profiling pods, retrying");
                    continue;
                }
                Ok(Ok(pods)) => pods,
            };

            let Some(pod) = pods.first() else {
                debug!(selector = %selector, "Profiling pod not created yet");
                continue;
            };

            let unit = ExecutionUnit::from(pod);
            debug!(pod = %unit.name, phase = %unit.phase, "Observed profiling pod");

            match unit.phase {
                PodPhase::Failed => {
                    return Err(ClusterError::Failed {
                        namespace: unit.namespace,
                        name: unit.name,
                    })
                }
                PodPhase::Running => return Ok(StartOutcome::Running(unit)),
                PodPhase::Succeeded => return Ok(StartOutcome::Completed(unit)),
                PodPhase::Pending | PodPhase::Unknown => continue,
            }
        }
    }
}
