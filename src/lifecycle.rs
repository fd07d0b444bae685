//! Cluster launch and teardown polling
//!
//! Launch and teardown are the same loop with a different target state:
//! submit the request, then poll the record until it reaches the target,
//! is flagged as failed, or the wall-clock budget is spent.
//!
//! Polling errors are not failures. A `get` that errors (5xx, dropped
//! connection) keeps the last known record and polls again; only the
//! control plane's failure flag or the timeout end a convergence with an
//! error.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use t2_client::ClusterApi;
use t2_common::{ClusterRecord, ClusterState, Error, Result};

use crate::config::LifecycleTimeouts;

/// Parameters of one convergence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// State that ends the convergence successfully
    pub target: ClusterState,
    /// Budget measured from before the submission
    pub timeout: Duration,
    /// Pause between two polls
    pub interval: Duration,
}

impl PollConfig {
    /// Converge to RUNNING within the launch budget
    pub fn launch(timeouts: &LifecycleTimeouts) -> Self {
        Self {
            target: ClusterState::Running,
            timeout: timeouts.launch,
            interval: timeouts.poll_interval,
        }
    }

    /// Converge to TERMINATED within the teardown budget
    pub fn terminate(timeouts: &LifecycleTimeouts) -> Self {
        Self {
            target: ClusterState::Terminated,
            timeout: timeouts.terminate,
            interval: timeouts.poll_interval,
        }
    }
}

/// Poll `initial` until it reaches `config.target`.
///
/// `started` is when the budget began, normally just before the create or
/// delete request was sent. The timeout is checked once per interval.
pub async fn converge(
    api: &dyn ClusterApi,
    initial: ClusterRecord,
    config: &PollConfig,
    started: Instant,
) -> Result<ClusterRecord> {
    let mut current = initial;

    loop {
        if current.is_failed() {
            error!(cluster_id = %current.id, state = %current.state, target = %config.target, "cluster failed");
            return Err(Error::LifecycleFailed {
                cluster_id: current.id,
                target: config.target,
            });
        }

        if current.state == config.target {
            info!(cluster_id = %current.id, state = %current.state, "cluster reached target state");
            return Ok(current);
        }

        // nothing follows a terminal state, so the target is out of reach
        if current.state.is_terminal() {
            error!(cluster_id = %current.id, state = %current.state, target = %config.target, "cluster ended before reaching target state");
            return Err(Error::LifecycleFailed {
                cluster_id: current.id,
                target: config.target,
            });
        }

        let elapsed = started.elapsed();
        if elapsed >= config.timeout {
            error!(cluster_id = %current.id, state = %current.state, ?elapsed, "timeout waiting for cluster");
            return Err(Error::Timeout {
                cluster_id: current.id,
                target: config.target,
                elapsed,
            });
        }

        sleep(config.interval).await;

        match api.get(&current.id).await {
            Ok(next) if next.is_failed() || current.state.can_transition_to(next.state) => {
                if next.state != current.state {
                    info!(cluster_id = %next.id, from = %current.state, to = %next.state, "cluster state changed");
                }
                current = next;
            }
            Ok(stale) => {
                warn!(
                    cluster_id = %current.id,
                    known = %current.state,
                    polled = %stale.state,
                    "ignoring stale cluster snapshot"
                );
            }
            Err(e) if e.is_transient() => {
                warn!(cluster_id = %current.id, error = %e, "failed to poll cluster, keeping last known state");
            }
            // still absorbed, the deadline decides; but this will not heal by itself
            Err(e) => {
                error!(cluster_id = %current.id, error = %e, "cluster poll rejected, keeping last known state");
            }
        }
    }
}

/// Create a cluster and wait until it runs.
///
/// `on_created` sees the record right after submission, before polling
/// starts, so the caller can persist the id for a later teardown even if the
/// launch fails. A failed submission is returned as is.
pub async fn launch<F>(
    api: &dyn ClusterApi,
    definition: &str,
    config: &PollConfig,
    on_created: F,
) -> Result<ClusterRecord>
where
    F: FnOnce(&ClusterRecord) + Send,
{
    let started = Instant::now();
    let created = api.create(definition).await.inspect_err(|e| {
        error!(error = %e, "failed to create cluster via API");
    })?;
    info!(cluster_id = %created.id, "created cluster, waiting for it to be up and running");
    on_created(&created);

    converge(api, created, config, started).await
}

/// Request teardown of `id` and wait until it is terminated
pub async fn terminate(
    api: &dyn ClusterApi,
    id: &str,
    config: &PollConfig,
) -> Result<ClusterRecord> {
    let started = Instant::now();
    let deleting = api.delete(id).await.inspect_err(|e| {
        error!(cluster_id = %id, error = %e, "failed to terminate cluster via API");
    })?;
    info!(cluster_id = %deleting.id, "started termination, waiting for cluster to be terminated");

    converge(api, deleting, config, started).await
}
