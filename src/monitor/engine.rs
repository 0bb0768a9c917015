use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterOps, ReleasePhase};

#[derive(Debug, Clone, Copy)]
pub struct EngineMonitorParams {
    pub timeout: Duration,
    pub max_failures: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for EngineMonitorParams {
    fn default() -> Self {
        EngineMonitorParams {
            timeout: Duration::from_secs(600),
            max_failures: 3,
            retry_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Terminal states of the engine wait loop. Expected terminals are values,
/// not errors; the executor branches on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineWaitOutcome {
    Ready,
    Failed { failures: u32, last_status: String },
    TimedOut { elapsed: Duration },
    Cancelled,
}

/// Drive an engine release to a terminal state: ready once helm reports
/// deployed and every pod of the release is running and ready; failed after
/// `max_failures` helm-level failures; timed out on the wall clock.
/// Transitional statuses reset the failure streak when they change.
pub async fn wait_engine_ready(
    cluster: &dyn ClusterOps,
    release_name: &str,
    namespace: &str,
    params: EngineMonitorParams,
    cancel: &CancellationToken,
) -> EngineWaitOutcome {
    let started = Instant::now();
    let mut failure_count: u32 = 0;
    let mut last_status: Option<String> = None;

    info!(
        "waiting for engine release {} in {} (timeout {}s, max failures {})",
        release_name,
        namespace,
        params.timeout.as_secs(),
        params.max_failures
    );

    loop {
        if cancel.is_cancelled() {
            return EngineWaitOutcome::Cancelled;
        }

        let current_status = match cluster.release_status(release_name, namespace).await {
            Ok(status) => status,
            Err(err) => {
                warn!("error checking release {} status: {}", release_name, err);
                crate::cluster::ReleaseStatus {
                    phase: ReleasePhase::Unknown,
                    description: err.to_string(),
                }
            }
        };

        let status_label = current_status.phase.to_string();
        debug!("engine release {} status: {}", release_name, status_label);

        match current_status.phase {
            ReleasePhase::Deployed => {
                let pods_ready = cluster.pod_readiness(release_name, namespace).await.unwrap_or(false);
                if pods_ready {
                    info!("engine release {} is ready", release_name);
                    return EngineWaitOutcome::Ready;
                }
            }
            ReleasePhase::Failed => {
                failure_count += 1;
                warn!(
                    "engine release {} failed (attempt {}/{})",
                    release_name, failure_count, params.max_failures
                );

                if failure_count >= params.max_failures {
                    return EngineWaitOutcome::Failed {
                        failures: failure_count,
                        last_status: status_label,
                    };
                }

                if sleep_or_cancel(params.retry_delay, cancel).await {
                    return EngineWaitOutcome::Cancelled;
                }
                last_status = Some(status_label);
                continue;
            }
            ReleasePhase::PendingInstall | ReleasePhase::PendingUpgrade | ReleasePhase::Unknown => {
                // transitional; a status change means the install is making progress
                if last_status.as_deref() != Some(status_label.as_str()) {
                    failure_count = 0;
                }
            }
        }

        last_status = Some(status_label);

        let elapsed = started.elapsed();
        if elapsed >= params.timeout {
            return EngineWaitOutcome::TimedOut { elapsed };
        }

        if sleep_or_cancel(params.poll_interval, cancel).await {
            return EngineWaitOutcome::Cancelled;
        }
    }
}

/// True when cancelled while sleeping.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
