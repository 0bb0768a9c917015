use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_derive::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cleanup::CleanupEngine;
use crate::cluster::{ClusterOps, JobBackend};
use crate::errors::EngineError;
use crate::executor::{CampaignTask, ExecutorConfig, Task};
use crate::io_models::campaign::{CampaignPatch, Phase, step};
use crate::reuse::ReuseCache;
use crate::store::{CampaignStore, with_backoff};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3600);
const ERROR_SLEEP_CAP: Duration = Duration::from_secs(300);
const ERROR_SLEEP_MAX_MULTIPLIER: u32 = 5;

pub fn clamp_poll_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

struct ActiveCampaign {
    id: Uuid,
    token: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub scheduler_running: bool,
    pub poll_interval_secs: u64,
    pub active_campaign: Option<Uuid>,
}

/// Single-flight campaign scheduler: one tick picks at most one pending
/// campaign by (priority, age) and drives it to a terminal phase before the
/// next one runs. At most one executor is ever active per process.
pub struct Scheduler {
    store: Arc<dyn CampaignStore>,
    cluster: Arc<dyn ClusterOps>,
    jobs: Arc<dyn JobBackend>,
    cleanup: Arc<CleanupEngine>,
    reuse: Arc<ReuseCache>,
    executor_config: ExecutorConfig,
    poll_interval: RwLock<Duration>,
    single_flight: AtomicBool,
    running: AtomicBool,
    wake: Notify,
    shutdown: CancellationToken,
    active: Mutex<Option<ActiveCampaign>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        cluster: Arc<dyn ClusterOps>,
        jobs: Arc<dyn JobBackend>,
        cleanup: Arc<CleanupEngine>,
        reuse: Arc<ReuseCache>,
        executor_config: ExecutorConfig,
        poll_interval: Duration,
        auto_start: bool,
    ) -> Scheduler {
        Scheduler {
            store,
            cluster,
            jobs,
            cleanup,
            reuse,
            executor_config,
            poll_interval: RwLock::new(clamp_poll_interval(poll_interval)),
            single_flight: AtomicBool::new(false),
            running: AtomicBool::new(auto_start),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            active: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.wake.notify_one();
        info!("scheduler started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Explicit "process now" request; wakes the loop before its next tick.
    pub fn process_now(&self) {
        self.wake.notify_one();
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.wake.notify_one();
    }

    pub async fn set_poll_interval(&self, interval: Duration) -> Duration {
        let clamped = clamp_poll_interval(interval);
        *self.poll_interval.write().await = clamped;
        info!("scheduler poll interval set to {}s", clamped.as_secs());
        clamped
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            scheduler_running: self.is_running(),
            poll_interval_secs: self.poll_interval.read().await.as_secs(),
            active_campaign: self.active.lock().await.as_ref().map(|a| a.id),
        }
    }

    /// Cancel a campaign. Pending cancels immediately; processing flips the
    /// executor's token, observed at its next await point; terminal is a
    /// no-op.
    pub async fn cancel_campaign(&self, id: Uuid) -> Result<bool, EngineError> {
        let Some(campaign) = self.store.get(id).await? else {
            return Ok(false);
        };

        match campaign.phase {
            Phase::Pending => {
                self.store
                    .update(
                        id,
                        CampaignPatch {
                            phase: Some(Phase::Cancelled),
                            current_step: Some(step::CANCELLED.to_string()),
                            completed_at: Some(chrono::Utc::now()),
                            error_message: Some("cancelled by user".to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!("pending campaign {} cancelled", id);
                Ok(true)
            }
            Phase::Processing => {
                if let Some(active) = self.active.lock().await.as_ref() {
                    if active.id == id {
                        active.token.cancel();
                        info!("cancellation requested for active campaign {}", id);
                        return Ok(true);
                    }
                }

                // Processing in the store but not active here: a previous
                // process died mid-run. Clean up what it recorded and close
                // the campaign out.
                warn!("campaign {} is processing but has no executor, reconciling", id);
                self.cleanup.cleanup_campaign(&campaign, "cancelled by user").await;
                self.store
                    .update(
                        id,
                        CampaignPatch {
                            phase: Some(Phase::Cancelled),
                            current_step: Some(step::CANCELLED.to_string()),
                            completed_at: Some(chrono::Utc::now()),
                            error_message: Some("cancelled by user".to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(true)
            }
            // terminal phases are absorbing
            _ => Ok(false),
        }
    }

    /// One scheduling decision. Returns whether a campaign was executed.
    pub async fn tick(&self) -> Result<bool, EngineError> {
        // Single-flight latch: concurrent invocations observe it and return.
        if self.single_flight.swap(true, Ordering::AcqRel) {
            debug!("another tick owns the executor, skipping");
            return Ok(false);
        }
        let _latch = scopeguard::guard((), |_| self.single_flight.store(false, Ordering::Release));

        let processing = with_backoff("list processing campaigns", || {
            self.store.list_by_status(Phase::Processing)
        })
        .await?;
        if !processing.is_empty() {
            debug!("a campaign is already processing, nothing to do");
            return Ok(false);
        }

        let mut pending = with_backoff("list pending campaigns", || self.store.list_by_status(Phase::Pending)).await?;
        if pending.is_empty() {
            return Ok(false);
        }

        pending.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });
        let campaign = pending.remove(0);
        info!(
            "picked campaign {} (priority {}, created {})",
            campaign.id, campaign.priority, campaign.created_at
        );

        let task = CampaignTask::new(
            campaign,
            self.store.clone(),
            self.cluster.clone(),
            self.jobs.clone(),
            self.cleanup.clone(),
            self.reuse.clone(),
            self.executor_config.clone(),
        );

        *self.active.lock().await = Some(ActiveCampaign {
            id: task.id(),
            token: task.cancellation(),
        });
        task.run().await;
        *self.active.lock().await = None;

        Ok(true)
    }

    /// The loop: tick, then sleep until the interval elapses, a wake is
    /// requested, or shutdown. Consecutive tick errors stretch the sleep up
    /// to five intervals, capped at five minutes.
    pub async fn run(self: Arc<Self>) {
        info!("scheduler loop started");
        let mut consecutive_errors: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let interval = *self.poll_interval.read().await;
            let mut sleep_duration = interval;

            if self.is_running() {
                match self.tick().await {
                    Ok(_) => consecutive_errors = 0,
                    Err(err) => {
                        consecutive_errors += 1;
                        let multiplier = consecutive_errors.min(ERROR_SLEEP_MAX_MULTIPLIER);
                        sleep_duration = (interval * multiplier).min(ERROR_SLEEP_CAP);
                        error!(
                            "scheduler tick failed ({} consecutive): {}; backing off {}s",
                            consecutive_errors,
                            err,
                            sleep_duration.as_secs()
                        );
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => {},
                _ = tokio::time::sleep(sleep_duration) => {},
            }
        }

        info!("scheduler loop ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{AppliedResource, JobListing, JobStatus, PodSummary, ReleaseStatus, WorkloadSummary};
    use crate::io_models::campaign::{Campaign, CampaignRequest, Priority};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;

    struct IdleCluster;

    #[async_trait]
    impl ClusterOps for IdleCluster {
        async fn install_release(
            &self,
            _: &str,
            _: &std::path::Path,
            _: &str,
            _: &str,
        ) -> Result<(), EngineError> {
            Ok(())
        }
        async fn uninstall_release(&self, _: &str, _: &str) -> Result<bool, EngineError> {
            Ok(true)
        }
        async fn release_status(&self, _: &str, _: &str) -> Result<ReleaseStatus, EngineError> {
            Ok(ReleaseStatus {
                phase: crate::cluster::ReleasePhase::Unknown,
                description: String::new(),
            })
        }
        async fn release_values(&self, _: &str, _: &str) -> Result<Option<serde_json::Value>, EngineError> {
            Ok(None)
        }
        async fn pod_readiness(&self, _: &str, _: &str) -> Result<bool, EngineError> {
            Ok(false)
        }
        async fn workload_readiness(&self, _: &str, _: &str) -> Result<Option<(u32, u32)>, EngineError> {
            Ok(None)
        }
        async fn apply_manifest(&self, _: &str, _: &str) -> Result<AppliedResource, EngineError> {
            unimplemented!()
        }
        async fn delete_manifest(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Vec<crate::cluster::DeletedResource>, EngineError> {
            unimplemented!()
        }
        async fn job_status(&self, _: &str, _: &str) -> Result<JobStatus, EngineError> {
            Ok(JobStatus::not_found())
        }
        async fn delete_job(&self, _: &str, _: &str) -> Result<bool, EngineError> {
            Ok(true)
        }
        async fn list_pods_for_job(&self, _: &str, _: &str) -> Result<Vec<PodSummary>, EngineError> {
            Ok(vec![])
        }
        async fn list_releases_by_label(&self, _: &str, _: &str) -> Result<Vec<WorkloadSummary>, EngineError> {
            Ok(vec![])
        }
        async fn list_jobs(&self, _: Option<&str>) -> Result<Vec<JobListing>, EngineError> {
            Ok(vec![])
        }
        async fn delete_release_leftovers(&self, _: &str, _: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn job_logs(&self, _: &str, _: &str, _: i64) -> Result<Vec<String>, EngineError> {
            Ok(vec![])
        }
        async fn stream_pod_log(
            &self,
            _: &str,
            _: &str,
            _: i64,
            _: bool,
        ) -> Result<futures::stream::BoxStream<'static, String>, EngineError> {
            unimplemented!()
        }
    }

    struct IdleJobs;

    #[async_trait]
    impl JobBackend for IdleJobs {
        async fn submit_job(&self, _: &str, _: &str) -> Result<AppliedResource, EngineError> {
            unimplemented!()
        }
        async fn job_status(&self, _: &str, _: &str) -> Result<JobStatus, EngineError> {
            Ok(JobStatus::not_found())
        }
        async fn delete_job(&self, _: &str, _: &str) -> Result<bool, EngineError> {
            Ok(true)
        }
        async fn list_jobs(&self, _: Option<&str>) -> Result<Vec<JobListing>, EngineError> {
            Ok(vec![])
        }
    }

    fn scheduler_with_store(store: Arc<MemoryStore>) -> Scheduler {
        let store: Arc<dyn CampaignStore> = store;
        let cluster: Arc<dyn ClusterOps> = Arc::new(IdleCluster);
        let jobs: Arc<dyn JobBackend> = Arc::new(IdleJobs);
        let cleanup = Arc::new(CleanupEngine::new(cluster.clone(), jobs.clone(), store.clone()));
        let reuse = Arc::new(ReuseCache::new(store.clone(), cluster.clone()));
        Scheduler::new(
            store,
            cluster,
            jobs,
            cleanup,
            reuse,
            ExecutorConfig::default(),
            DEFAULT_POLL_INTERVAL,
            true,
        )
    }

    /// skip_engine with no benchmarks: completes without touching the cluster.
    fn trivial_campaign(priority: Priority) -> Campaign {
        Campaign::from_request(CampaignRequest {
            engine: None,
            skip_engine: true,
            benchmarks: vec![],
            priority,
        })
    }

    #[tokio::test]
    async fn tick_picks_urgent_before_older_medium() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with_store(store.clone());

        let medium = trivial_campaign(Priority::Medium);
        let mut urgent = trivial_campaign(Priority::Urgent);
        urgent.created_at = medium.created_at + chrono::Duration::seconds(10);
        let (medium_id, urgent_id) = (medium.id, urgent.id);

        store.insert(medium).await.unwrap();
        store.insert(urgent).await.unwrap();

        assert!(scheduler.tick().await.unwrap());
        assert_eq!(store.get(urgent_id).await.unwrap().unwrap().phase, Phase::Completed);
        assert_eq!(store.get(medium_id).await.unwrap().unwrap().phase, Phase::Pending);

        assert!(scheduler.tick().await.unwrap());
        assert_eq!(store.get(medium_id).await.unwrap().unwrap().phase, Phase::Completed);
    }

    #[tokio::test]
    async fn equal_priority_runs_in_creation_order() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with_store(store.clone());

        let first = trivial_campaign(Priority::Urgent);
        let mut second = trivial_campaign(Priority::Urgent);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        let (first_id, second_id) = (first.id, second.id);

        store.insert(second).await.unwrap();
        store.insert(first).await.unwrap();

        scheduler.tick().await.unwrap();
        assert_eq!(store.get(first_id).await.unwrap().unwrap().phase, Phase::Completed);
        assert_eq!(store.get(second_id).await.unwrap().unwrap().phase, Phase::Pending);
    }

    #[tokio::test]
    async fn a_processing_campaign_blocks_the_tick() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with_store(store.clone());

        let stuck = trivial_campaign(Priority::Medium);
        let stuck_id = stuck.id;
        store.insert(stuck).await.unwrap();
        store
            .update(stuck_id, CampaignPatch::phase(Phase::Processing))
            .await
            .unwrap();

        let waiting = trivial_campaign(Priority::Urgent);
        let waiting_id = waiting.id;
        store.insert(waiting).await.unwrap();

        // the restart scenario: an already-processing campaign means no new executor
        assert!(!scheduler.tick().await.unwrap());
        assert_eq!(store.get(waiting_id).await.unwrap().unwrap().phase, Phase::Pending);
    }

    #[tokio::test]
    async fn cancel_on_pending_is_immediate() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with_store(store.clone());

        let campaign = trivial_campaign(Priority::Medium);
        let id = campaign.id;
        store.insert(campaign).await.unwrap();

        assert!(scheduler.cancel_campaign(id).await.unwrap());
        let cancelled = store.get(id).await.unwrap().unwrap();
        assert_eq!(cancelled.phase, Phase::Cancelled);
        assert_eq!(cancelled.error_message.as_deref(), Some("cancelled by user"));
        assert!(cancelled.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_on_terminal_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with_store(store.clone());

        let campaign = trivial_campaign(Priority::Medium);
        let id = campaign.id;
        store.insert(campaign).await.unwrap();
        scheduler.tick().await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().phase, Phase::Completed);

        assert!(!scheduler.cancel_campaign(id).await.unwrap());
        assert_eq!(store.get(id).await.unwrap().unwrap().phase, Phase::Completed);
    }

    #[tokio::test]
    async fn poll_interval_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with_store(store);

        assert_eq!(
            scheduler.set_poll_interval(Duration::from_secs(1)).await,
            MIN_POLL_INTERVAL
        );
        assert_eq!(
            scheduler.set_poll_interval(Duration::from_secs(100_000)).await,
            MAX_POLL_INTERVAL
        );
    }
}
