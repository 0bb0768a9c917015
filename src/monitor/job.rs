use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterOps, JobBackend, JobPhase};
use crate::io_models::campaign::JobTerminalState;
use crate::monitor::engine::sleep_or_cancel;

const SUCCESS_VERIFY_DELAY: Duration = Duration::from_secs(5);
const MAX_CONSECUTIVE_MISSES: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct JobMonitorParams {
    pub timeout: Duration,
    pub max_failures: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for JobMonitorParams {
    fn default() -> Self {
        JobMonitorParams {
            timeout: Duration::from_secs(3600),
            max_failures: 3,
            retry_delay: Duration::from_secs(60),
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl JobMonitorParams {
    /// Hard safety cap on status polls, independent of the wall clock.
    fn max_checks(&self) -> u64 {
        self.timeout.as_secs() / 30 + 10
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobWaitOutcome {
    Succeeded,
    Failed { failures: u32 },
    TimedOut { elapsed: Duration },
    Disappeared,
    Cancelled,
}

impl JobWaitOutcome {
    pub fn terminal_state(&self) -> JobTerminalState {
        match self {
            JobWaitOutcome::Succeeded => JobTerminalState::Succeeded,
            JobWaitOutcome::Failed { .. } => JobTerminalState::TerminatedByMaxFailures,
            JobWaitOutcome::TimedOut { .. } => JobTerminalState::TerminatedByTimeout,
            JobWaitOutcome::Disappeared | JobWaitOutcome::Cancelled => JobTerminalState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobWaitOutcome::Succeeded)
    }
}

/// Drive a benchmark job to a terminal state. Benchmark jobs observably
/// oscillate: pods restart and the status API briefly 404s around
/// completion, so success is re-verified once and a short streak of
/// not-found answers is survived before probing pods for the truth.
/// Terminal non-success deletes the job before returning.
pub async fn wait_job_complete(
    jobs: &dyn JobBackend,
    cluster: &dyn ClusterOps,
    job_name: &str,
    namespace: &str,
    params: JobMonitorParams,
    cancel: &CancellationToken,
) -> JobWaitOutcome {
    let started = Instant::now();
    let mut failure_count: u32 = 0;
    let mut not_found_count: u32 = 0;
    let mut check_count: u64 = 0;

    info!(
        "waiting for job {}/{} (timeout {}s, max failures {})",
        namespace,
        job_name,
        params.timeout.as_secs(),
        params.max_failures
    );

    while check_count < params.max_checks() {
        check_count += 1;

        if cancel.is_cancelled() {
            return JobWaitOutcome::Cancelled;
        }

        match jobs.job_status(job_name, namespace).await {
            Ok(status) => match status.phase {
                JobPhase::Succeeded => {
                    // re-poll once: a job can flip back right around completion
                    if sleep_or_cancel(SUCCESS_VERIFY_DELAY, cancel).await {
                        return JobWaitOutcome::Cancelled;
                    }
                    match jobs.job_status(job_name, namespace).await {
                        Ok(verify) if matches!(verify.phase, JobPhase::Succeeded | JobPhase::NotFound) => {
                            info!("job {}/{} completion verified", namespace, job_name);
                            return JobWaitOutcome::Succeeded;
                        }
                        Ok(verify) => {
                            warn!(
                                "job {}/{} status changed during verification: succeeded -> {}",
                                namespace,
                                job_name,
                                verify.phase.as_str()
                            );
                        }
                        // could not verify; trust the succeeded answer we saw
                        Err(_) => return JobWaitOutcome::Succeeded,
                    }
                }
                JobPhase::Failed => {
                    failure_count += 1;
                    not_found_count = 0;
                    warn!(
                        "job {}/{} failed (failure {}/{}, check #{})",
                        namespace, job_name, failure_count, params.max_failures, check_count
                    );

                    if failure_count >= params.max_failures {
                        terminate_job(jobs, job_name, namespace).await;
                        return JobWaitOutcome::Failed {
                            failures: failure_count,
                        };
                    }

                    if sleep_or_cancel(params.retry_delay, cancel).await {
                        return JobWaitOutcome::Cancelled;
                    }
                    continue;
                }
                JobPhase::NotFound => {
                    not_found_count += 1;
                    warn!(
                        "job {}/{} not found (miss {}/{})",
                        namespace, job_name, not_found_count, MAX_CONSECUTIVE_MISSES
                    );

                    if not_found_count >= MAX_CONSECUTIVE_MISSES {
                        // the job object is gone; its pods still know what happened
                        match cluster.list_pods_for_job(job_name, namespace).await {
                            Ok(pods) if pods.iter().any(|p| p.phase == "Succeeded") => {
                                info!("job {}/{} pods show completion, job was cleaned up", namespace, job_name);
                                return JobWaitOutcome::Succeeded;
                            }
                            Ok(pods) if pods.is_empty() => {
                                terminate_job(jobs, job_name, namespace).await;
                                return JobWaitOutcome::Disappeared;
                            }
                            Ok(_) | Err(_) => {
                                terminate_job(jobs, job_name, namespace).await;
                                return JobWaitOutcome::Disappeared;
                            }
                        }
                    }
                }
                JobPhase::Running | JobPhase::Pending => {
                    failure_count = 0;
                    not_found_count = 0;
                }
            },
            Err(err) => {
                // connection/API errors are not job failures
                warn!("error checking job {}/{} (check #{}): {}", namespace, job_name, check_count, err);
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= params.timeout {
            terminate_job(jobs, job_name, namespace).await;
            return JobWaitOutcome::TimedOut { elapsed };
        }

        if sleep_or_cancel(params.poll_interval, cancel).await {
            return JobWaitOutcome::Cancelled;
        }
    }

    warn!(
        "job {}/{} exceeded the status poll safety cap ({})",
        namespace,
        job_name,
        params.max_checks()
    );
    terminate_job(jobs, job_name, namespace).await;
    JobWaitOutcome::TimedOut {
        elapsed: started.elapsed(),
    }
}

async fn terminate_job(jobs: &dyn JobBackend, job_name: &str, namespace: &str) {
    match jobs.delete_job(job_name, namespace).await {
        Ok(_) => info!("terminated job {}/{}", namespace, job_name),
        Err(err) => error!("failed to terminate job {}/{}: {}", namespace, job_name, err),
    }
}
