pub mod conflict;
pub mod placeholders;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cleanup::CleanupEngine;
use crate::cluster::{ClusterOps, JobBackend, JobPhase};
use crate::errors::{EngineError, Tag};
use crate::executor::conflict::{ConflictAction, resolve_release_conflict};
use crate::executor::placeholders::{EngineEndpoints, substitute_placeholders};
use crate::io_models::campaign::{
    Campaign, CampaignPatch, EngineRelease, JobRecord, Phase, ReleaseState, ReuseRecord, step,
};
use crate::io_models::engine::EngineSpec;
use crate::monitor::{
    EngineMonitorParams, EngineWaitOutcome, JobMonitorParams, JobWaitOutcome, wait_engine_ready, wait_job_complete,
};
use crate::reuse::{ReleaseIdentity, ReuseCache, ReuseDecision, release_identity};
use crate::services::kube_client::job_name_from_manifest;
use crate::store::{CampaignStore, with_backoff};

const SUBMISSION_PROBE_DELAY: Duration = Duration::from_secs(2);

/// A unit of work owned by the scheduler loop. Cancellation flips a token the
/// running task observes at its await points.
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> Uuid;
    fn created_at(&self) -> &DateTime<Utc>;
    async fn run(&self);
    fn cancel(&self) -> bool;
    fn cancellation(&self) -> CancellationToken;
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub engine_namespace: String,
    pub chart_path: PathBuf,
    pub engine_monitor: EngineMonitorParams,
    pub job_monitor: JobMonitorParams,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            engine_namespace: "engines".to_string(),
            chart_path: PathBuf::from("./charts/engine"),
            engine_monitor: EngineMonitorParams::default(),
            job_monitor: JobMonitorParams::default(),
        }
    }
}

/// Drives one campaign through provision -> wait-engine -> ordered jobs ->
/// terminal. Never entered concurrently for the same campaign; the scheduler
/// guarantees single-flight.
pub struct CampaignTask {
    campaign: Campaign,
    store: Arc<dyn CampaignStore>,
    cluster: Arc<dyn ClusterOps>,
    jobs: Arc<dyn JobBackend>,
    cleanup: Arc<CleanupEngine>,
    reuse: Arc<ReuseCache>,
    config: ExecutorConfig,
    cancel_token: CancellationToken,
}

impl CampaignTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaign: Campaign,
        store: Arc<dyn CampaignStore>,
        cluster: Arc<dyn ClusterOps>,
        jobs: Arc<dyn JobBackend>,
        cleanup: Arc<CleanupEngine>,
        reuse: Arc<ReuseCache>,
        config: ExecutorConfig,
    ) -> CampaignTask {
        CampaignTask {
            campaign,
            store,
            cluster,
            jobs,
            cleanup,
            reuse,
            config,
            cancel_token: CancellationToken::new(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn patch(&self, patch: CampaignPatch) -> Result<Campaign, EngineError> {
        let id = self.campaign.id;
        with_backoff("update campaign", || {
            let patch = patch.clone();
            async move { self.store.update(id, patch).await }
        })
        .await
    }

    /// Terminal failure: cleanup first, then the terminal phase write.
    async fn fail_campaign(&self, error: &EngineError, run_cleanup: bool) {
        let id = self.campaign.id;
        error!("campaign {} failed: {}", id, error);

        if run_cleanup {
            let current = match self.store.get(id).await {
                Ok(Some(campaign)) => campaign,
                _ => self.campaign.clone(),
            };
            self.cleanup.cleanup_campaign(&current, "campaign failed").await;
        }

        let patch = CampaignPatch {
            phase: Some(Phase::Failed),
            current_step: Some(step::FAILED.to_string()),
            completed_at: Some(Utc::now()),
            error_message: Some(error.user_message()),
            ..Default::default()
        };
        if let Err(err) = self.patch(patch).await {
            error!("could not record failure of campaign {}: {}", id, err);
        }
    }

    async fn cancel_campaign(&self) {
        let id = self.campaign.id;
        info!("campaign {} is cancelled, cleaning up", id);

        let current = match self.store.get(id).await {
            Ok(Some(campaign)) => campaign,
            _ => self.campaign.clone(),
        };
        self.cleanup.cleanup_campaign(&current, "cancelled by user").await;

        let patch = CampaignPatch {
            phase: Some(Phase::Cancelled),
            current_step: Some(step::CANCELLED.to_string()),
            completed_at: Some(Utc::now()),
            error_message: Some("cancelled by user".to_string()),
            ..Default::default()
        };
        if let Err(err) = self.patch(patch).await {
            error!("could not record cancellation of campaign {}: {}", id, err);
        }
    }

    /// Best-effort lookup of the single engine currently serving, for
    /// skip-engine campaigns. Nothing running is not an error.
    async fn locate_running_engine(&self) -> Option<EngineEndpoints> {
        let workloads = self
            .cluster
            .list_releases_by_label("app.kubernetes.io/managed-by=Helm", &self.config.engine_namespace)
            .await
            .ok()?;

        workloads
            .into_iter()
            .find(|w| w.ready_replicas >= 1)
            .map(|w| EngineEndpoints::for_release(&w.name))
    }

    /// Provision the engine (reuse, adopt, or install+wait) and return its
    /// endpoints. `Ok(None)` means the campaign is already terminal.
    async fn provision_engine(&self, spec: &EngineSpec) -> Result<Option<EngineEndpoints>, EngineError> {
        if spec.model_identifier.is_empty() && spec.values_text.is_none() {
            let err = EngineError::new_invalid_campaign(
                "Campaign has skip_engine disabled but no model identifier or values document",
            );
            // nothing was created, no cleanup needed
            self.fail_campaign(&err, false).await;
            return Ok(None);
        }

        let identity = release_identity(spec);
        let namespace = spec
            .namespace
            .clone()
            .unwrap_or_else(|| self.config.engine_namespace.clone());

        // Reuse path: only campaigns carrying a values document memoize.
        if let Some(fingerprint) = &identity.values_fingerprint {
            match self.reuse.decide(fingerprint, &self.cleanup).await? {
                ReuseDecision::Reuse { release_name, .. } => {
                    info!("campaign {} reuses release {}", self.campaign.id, release_name);
                    self.patch(CampaignPatch {
                        engine_release_id: Some(release_name.clone()),
                        completed_steps: Some(1),
                        ..Default::default()
                    })
                    .await?;
                    return Ok(Some(EngineEndpoints::for_release(&release_name)));
                }
                ReuseDecision::Install => {}
            }
        }

        match resolve_release_conflict(
            self.cluster.as_ref(),
            &identity.release_name,
            &namespace,
            &spec.model_identifier,
        )
        .await
        {
            ConflictAction::Skip => {
                self.patch(CampaignPatch {
                    engine_release_id: Some(identity.release_name.clone()),
                    completed_steps: Some(1),
                    ..Default::default()
                })
                .await?;
                return Ok(Some(EngineEndpoints::for_release(&identity.release_name)));
            }
            ConflictAction::CleanupAndInstall => {
                self.cleanup
                    .cleanup_conflicting_resources(&identity.release_name, &namespace)
                    .await;
            }
            ConflictAction::Install => {}
        }

        self.install_and_wait(spec, &identity, &namespace).await
    }

    async fn install_and_wait(
        &self,
        spec: &EngineSpec,
        identity: &ReleaseIdentity,
        namespace: &str,
    ) -> Result<Option<EngineEndpoints>, EngineError> {
        let values_text = spec
            .values_text
            .clone()
            .unwrap_or_else(|| spec.to_values_yaml(&identity.release_name));

        if let Err(err) = self
            .cluster
            .install_release(&identity.release_name, &self.config.chart_path, namespace, &values_text)
            .await
        {
            self.fail_campaign(&err, true).await;
            return Ok(None);
        }

        self.store
            .upsert_release(EngineRelease::deploying(
                &identity.release_name,
                namespace,
                identity.values_fingerprint.clone(),
            ))
            .await?;
        self.patch(CampaignPatch {
            engine_release_id: Some(identity.release_name.clone()),
            ..Default::default()
        })
        .await?;

        let outcome = wait_engine_ready(
            self.cluster.as_ref(),
            &identity.release_name,
            namespace,
            self.config.engine_monitor,
            &self.cancel_token,
        )
        .await;

        let resource = format!("{namespace}/{}", identity.release_name);
        match outcome {
            EngineWaitOutcome::Ready => {
                if let Ok(Some(mut release)) = self.store.get_release(&identity.release_name).await {
                    release.phase = ReleaseState::Running;
                    release.updated_at = Utc::now();
                    let _ = self.store.upsert_release(release).await;
                }

                if let (Some(fingerprint), Some(values)) = (&identity.values_fingerprint, &spec.values_text) {
                    self.reuse
                        .record_install(ReuseRecord {
                            values_fingerprint: fingerprint.clone(),
                            values_text: values.clone(),
                            release_name: identity.release_name.clone(),
                            namespace: namespace.to_string(),
                            campaign_id: self.campaign.id,
                        })
                        .await?;
                }

                self.patch(CampaignPatch {
                    completed_steps: Some(1),
                    ..Default::default()
                })
                .await?;
                Ok(Some(EngineEndpoints::for_release(&identity.release_name)))
            }
            EngineWaitOutcome::Failed { failures, .. } => {
                let err = EngineError::new_readiness_exhausted(&resource, failures, self.config.engine_monitor.max_failures)
                    .with_step(step::ENGINE_DEPLOY);
                self.mark_release_failed(&identity.release_name, &err).await;
                self.fail_campaign(&err, true).await;
                Ok(None)
            }
            EngineWaitOutcome::TimedOut { elapsed } => {
                let err = EngineError::new_readiness_timeout(&resource, elapsed, self.config.engine_monitor.timeout)
                    .with_step(step::ENGINE_DEPLOY);
                self.mark_release_failed(&identity.release_name, &err).await;
                self.fail_campaign(&err, true).await;
                Ok(None)
            }
            EngineWaitOutcome::Cancelled => {
                self.cancel_campaign().await;
                Ok(None)
            }
        }
    }

    async fn mark_release_failed(&self, release_name: &str, err: &EngineError) {
        if let Ok(Some(mut release)) = self.store.get_release(release_name).await {
            release.phase = ReleaseState::Failed;
            release.error_message = Some(err.user_message());
            release.updated_at = Utc::now();
            let _ = self.store.upsert_release(release).await;
        }
    }

    /// Submission can report failure while the job was in fact created.
    /// Probe both the requested name and the name the manifest carries.
    async fn probe_submitted_job(&self, requested_name: &str, manifest_text: &str, namespace: &str) -> Option<String> {
        tokio::time::sleep(SUBMISSION_PROBE_DELAY).await;

        for candidate in [Some(requested_name.to_string()), job_name_from_manifest(manifest_text)]
            .into_iter()
            .flatten()
        {
            match self.jobs.job_status(&candidate, namespace).await {
                Ok(status) if status.phase != JobPhase::NotFound => {
                    info!("job {} exists despite submission error", candidate);
                    return Some(candidate);
                }
                _ => {}
            }
        }
        None
    }

    async fn run_benchmarks(&self, engine_endpoints: Option<&EngineEndpoints>) -> Result<bool, EngineError> {
        let mut created_jobs: Vec<JobRecord> = Vec::with_capacity(self.campaign.benchmarks.len());
        let engine_steps = if self.campaign.skip_engine { 0 } else { 1 };

        for (index, benchmark) in self.campaign.benchmarks.iter().enumerate() {
            if self.is_cancelled() {
                self.cancel_campaign().await;
                return Ok(false);
            }

            let requested_name = benchmark.display_name(index);
            info!(
                "campaign {} submitting benchmark {}/{} ({})",
                self.campaign.id,
                index + 1,
                self.campaign.benchmarks.len(),
                requested_name
            );
            self.patch(CampaignPatch {
                current_step: Some(step::benchmark_running(index)),
                ..Default::default()
            })
            .await?;

            let manifest = substitute_placeholders(&benchmark.manifest_text, engine_endpoints);

            let (actual_name, had_deployment_error) =
                match self.jobs.submit_job(&manifest, &benchmark.namespace).await {
                    Ok(applied) => (applied.resource_name, false),
                    Err(submit_err) => {
                        warn!(
                            "submission of {} reported an error, probing for the job: {}",
                            requested_name, submit_err
                        );
                        match self
                            .probe_submitted_job(&requested_name, &manifest, &benchmark.namespace)
                            .await
                        {
                            Some(name) => (name, true),
                            None => {
                                let err = if submit_err.tag() == Tag::Configuration {
                                    submit_err
                                } else {
                                    EngineError::new_transient(format!(
                                        "Benchmark job `{requested_name}` could not be submitted"
                                    ))
                                    .with_underlying(submit_err)
                                }
                                .with_step(step::benchmark_running(index));
                                self.fail_campaign(&err, true).await;
                                return Ok(false);
                            }
                        }
                    }
                };

            // Persist the record before waiting so a crash can still find the job.
            created_jobs.push(JobRecord {
                name: actual_name.clone(),
                namespace: benchmark.namespace.clone(),
                original_name: requested_name.clone(),
                had_deployment_error,
                terminal_state: None,
            });
            self.patch(CampaignPatch {
                created_jobs: Some(created_jobs.clone()),
                ..Default::default()
            })
            .await?;

            let outcome = wait_job_complete(
                self.jobs.as_ref(),
                self.cluster.as_ref(),
                &actual_name,
                &benchmark.namespace,
                self.config.job_monitor,
                &self.cancel_token,
            )
            .await;

            if let Some(record) = created_jobs.last_mut() {
                record.terminal_state = Some(outcome.terminal_state());
            }

            match outcome {
                JobWaitOutcome::Succeeded => {
                    self.patch(CampaignPatch {
                        completed_steps: Some(engine_steps + index as u32 + 1),
                        created_jobs: Some(created_jobs.clone()),
                        ..Default::default()
                    })
                    .await?;
                }
                JobWaitOutcome::Cancelled => {
                    self.patch(CampaignPatch {
                        created_jobs: Some(created_jobs.clone()),
                        ..Default::default()
                    })
                    .await?;
                    self.cancel_campaign().await;
                    return Ok(false);
                }
                JobWaitOutcome::Failed { failures } => {
                    self.patch(CampaignPatch {
                        created_jobs: Some(created_jobs.clone()),
                        ..Default::default()
                    })
                    .await?;
                    let resource = format!("{}/{}", benchmark.namespace, actual_name);
                    let err = EngineError::new_readiness_exhausted(&resource, failures, self.config.job_monitor.max_failures)
                        .with_step(step::benchmark_running(index));
                    self.fail_campaign(&err, true).await;
                    return Ok(false);
                }
                JobWaitOutcome::TimedOut { elapsed } => {
                    self.patch(CampaignPatch {
                        created_jobs: Some(created_jobs.clone()),
                        ..Default::default()
                    })
                    .await?;
                    let resource = format!("{}/{}", benchmark.namespace, actual_name);
                    let err = EngineError::new_readiness_timeout(&resource, elapsed, self.config.job_monitor.timeout)
                        .with_step(step::benchmark_running(index));
                    self.fail_campaign(&err, true).await;
                    return Ok(false);
                }
                JobWaitOutcome::Disappeared => {
                    self.patch(CampaignPatch {
                        created_jobs: Some(created_jobs.clone()),
                        ..Default::default()
                    })
                    .await?;
                    let err = EngineError::new_invalid_campaign(format!(
                        "Benchmark job `{actual_name}` disappeared without completion evidence"
                    ))
                    .with_step(step::benchmark_running(index));
                    self.fail_campaign(&err, true).await;
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    async fn run_campaign(&self) -> Result<(), EngineError> {
        let initial_step = if self.campaign.skip_engine {
            step::BENCHMARK_JOBS
        } else {
            step::ENGINE_DEPLOY
        };
        self.patch(CampaignPatch {
            phase: Some(Phase::Processing),
            started_at: Some(Utc::now()),
            current_step: Some(initial_step.to_string()),
            ..Default::default()
        })
        .await?;

        let engine_endpoints = if self.campaign.skip_engine {
            let endpoints = self.locate_running_engine().await;
            let release_id = match &endpoints {
                Some(e) => format!("existing-{}", e.release_name),
                None => "existing-engine".to_string(),
            };
            self.patch(CampaignPatch {
                engine_release_id: Some(release_id),
                current_step: Some(step::BENCHMARK_JOBS.to_string()),
                ..Default::default()
            })
            .await?;
            endpoints
        } else {
            let Some(spec) = self.campaign.engine.clone() else {
                let err =
                    EngineError::new_invalid_campaign("Campaign has skip_engine disabled but no engine specification");
                self.fail_campaign(&err, false).await;
                return Ok(());
            };

            if self.is_cancelled() {
                self.cancel_campaign().await;
                return Ok(());
            }

            match self.provision_engine(&spec).await? {
                Some(endpoints) => Some(endpoints),
                // terminal state already recorded
                None => return Ok(()),
            }
        };

        if !self.run_benchmarks(engine_endpoints.as_ref()).await? {
            return Ok(());
        }

        self.patch(CampaignPatch {
            phase: Some(Phase::Completed),
            completed_at: Some(Utc::now()),
            current_step: Some(step::COMPLETED.to_string()),
            ..Default::default()
        })
        .await?;

        info!("campaign {} completed", self.campaign.id);
        Ok(())
    }
}

#[async_trait]
impl Task for CampaignTask {
    fn id(&self) -> Uuid {
        self.campaign.id
    }

    fn created_at(&self) -> &DateTime<Utc> {
        &self.campaign.created_at
    }

    async fn run(&self) {
        info!("campaign task {} started", self.campaign.id);
        let guard = scopeguard::guard(self.campaign.id, |id| {
            info!("campaign task {} finished", id);
        });

        if let Err(err) = self.run_campaign().await {
            // Store-level trouble: abort the tick without forcing the
            // campaign into a terminal phase; the next tick re-reads state.
            error!("campaign task {} aborted: {}", self.campaign.id, err);
        }

        drop(guard);
    }

    fn cancel(&self) -> bool {
        self.cancel_token.cancel();
        true
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}
