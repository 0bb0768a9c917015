use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::cluster::{ClusterOps, JobBackend};
use crate::io_models::campaign::{Campaign, CampaignPatch, Phase, ReleaseState};
use crate::store::CampaignStore;

/// Grace period after deleting conflicting resources, letting deletions
/// propagate before the next install.
const CONFLICT_CLEANUP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub attempted: bool,
    pub successful: bool,
}

/// Guarantees that a campaign leaving the happy path leaves no resources
/// behind: tracked jobs first, then discovered strays, the engine release
/// last. Best-effort and non-throwing; the outcome lands on the campaign.
pub struct CleanupEngine {
    cluster: Arc<dyn ClusterOps>,
    jobs: Arc<dyn JobBackend>,
    store: Arc<dyn CampaignStore>,
}

impl CleanupEngine {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        jobs: Arc<dyn JobBackend>,
        store: Arc<dyn CampaignStore>,
    ) -> CleanupEngine {
        CleanupEngine { cluster, jobs, store }
    }

    /// Tear down everything the campaign created. Calling it a second time on
    /// the same campaign is a no-op.
    pub async fn cleanup_campaign(&self, campaign: &Campaign, reason: &str) -> CleanupOutcome {
        // Idempotence: the stored campaign remembers a previous run.
        if let Ok(Some(stored)) = self.store.get(campaign.id).await {
            if stored.cleanup_attempted {
                info!("cleanup already ran for campaign {}, skipping", campaign.id);
                return CleanupOutcome {
                    attempted: true,
                    successful: stored.cleanup_successful,
                };
            }
        }

        info!("cleaning up campaign {} ({})", campaign.id, reason);
        let mut successful = true;

        self.cleanup_campaign_jobs(campaign).await;
        if let Err(err) = self.discover_and_delete_jobs(campaign).await {
            warn!("job discovery sweep failed for campaign {}: {}", campaign.id, err);
            successful = false;
        }

        if !self.cleanup_campaign_engine(campaign).await {
            successful = false;
        }

        let patch = CampaignPatch {
            cleanup_attempted: Some(true),
            cleanup_successful: Some(successful),
            ..Default::default()
        };
        if let Err(err) = self.store.update(campaign.id, patch).await {
            warn!("could not record cleanup outcome on campaign {}: {}", campaign.id, err);
        }

        CleanupOutcome {
            attempted: true,
            successful,
        }
    }

    /// Jobs the campaign knows it created.
    async fn cleanup_campaign_jobs(&self, campaign: &Campaign) {
        if campaign.created_jobs.is_empty() {
            debug!("no tracked jobs to clean up for campaign {}", campaign.id);
        }

        for record in &campaign.created_jobs {
            match self.jobs.delete_job(&record.name, &record.namespace).await {
                Ok(_) => info!("deleted job {}/{}", record.namespace, record.name),
                Err(err) => warn!("failed to delete job {}/{}: {}", record.namespace, record.name, err),
            }
        }
    }

    /// Safety net for the window between "job applied" and "record
    /// persisted": sweep backend listings for jobs that look like ours.
    async fn discover_and_delete_jobs(&self, campaign: &Campaign) -> Result<(), crate::errors::EngineError> {
        let listings = self.jobs.list_jobs(None).await?;
        let campaign_id = campaign.id.to_string();
        let id_prefix = &campaign_id[..8];

        for listing in listings {
            if listing.resource_kind.to_lowercase() != "job" {
                continue;
            }
            if matches!(listing.status.as_str(), "deleted" | "completed") {
                continue;
            }
            if campaign.created_jobs.iter().any(|r| r.name == listing.resource_name) {
                continue; // already handled above
            }

            let name = listing.resource_name.to_lowercase();
            let looks_like_ours = name.contains(id_prefix)
                || name.starts_with("benchmark")
                || listing
                    .manifest_text
                    .as_ref()
                    .is_some_and(|text| text.contains(&campaign_id));

            if looks_like_ours {
                info!("found stray job {}/{} during cleanup", listing.namespace, listing.resource_name);
                if let Err(err) = self.jobs.delete_job(&listing.resource_name, &listing.namespace).await {
                    warn!(
                        "failed to delete stray job {}/{}: {}",
                        listing.namespace, listing.resource_name, err
                    );
                }
            }
        }

        Ok(())
    }

    /// The engine release, torn down only when this campaign owns it and no
    /// other live campaign is attached to it.
    async fn cleanup_campaign_engine(&self, campaign: &Campaign) -> bool {
        if campaign.skip_engine {
            debug!("campaign {} reused a pre-existing engine, leaving it alone", campaign.id);
            return true;
        }
        let Some(release_name) = &campaign.engine_release_id else {
            return true;
        };

        match self.release_used_by_other_campaigns(campaign.id, release_name).await {
            Ok(true) => {
                info!(
                    "release {} is used by other pending/processing campaigns, keeping it",
                    release_name
                );
                return true;
            }
            Ok(false) => {}
            Err(err) => {
                warn!("could not check release sharing for {}: {}", release_name, err);
            }
        }

        let namespace = self.release_namespace(release_name).await;
        self.cleanup_release(release_name, &namespace).await
    }

    async fn release_used_by_other_campaigns(
        &self,
        campaign_id: Uuid,
        release_name: &str,
    ) -> Result<bool, crate::errors::EngineError> {
        for phase in [Phase::Pending, Phase::Processing] {
            let campaigns = self.store.list_by_status(phase).await?;
            if campaigns
                .iter()
                .any(|c| c.id != campaign_id && c.engine_release_id.as_deref() == Some(release_name))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn release_namespace(&self, release_name: &str) -> String {
        match self.store.get_release(release_name).await {
            Ok(Some(release)) => release.namespace,
            _ => "engines".to_string(),
        }
    }

    /// Uninstall a release and reflect it in the store: release marked
    /// cleaned up, reuse record cleared when it pointed there. Returns
    /// whether the teardown fully succeeded.
    pub async fn cleanup_release(&self, release_name: &str, namespace: &str) -> bool {
        info!("uninstalling release {} from {}", release_name, namespace);

        let mut successful = match self.cluster.uninstall_release(release_name, namespace).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!("uninstall of {} failed: {}, retrying once directly", release_name, err);
                // last resort: one direct retry by name
                match self.cluster.uninstall_release(release_name, namespace).await {
                    Ok(removed) => removed,
                    Err(err) => {
                        error!("direct uninstall of {} failed too: {}", release_name, err);
                        false
                    }
                }
            }
        };

        if let Ok(Some(mut release)) = self.store.get_release(release_name).await {
            release.phase = ReleaseState::CleanedUp;
            release.updated_at = chrono::Utc::now();
            if self.store.upsert_release(release).await.is_err() {
                successful = false;
            }
        }

        match self.store.reuse_record().await {
            Ok(Some(record)) if record.release_name == release_name => {
                if let Err(err) = self.store.clear_reuse_record().await {
                    warn!("could not clear reuse record for {}: {}", release_name, err);
                }
            }
            _ => {}
        }

        successful
    }

    /// Resolve a name conflict before an install: uninstall the live release
    /// and remove the auxiliary objects an engine chart leaves around, then
    /// give deletions a moment to propagate.
    pub async fn cleanup_conflicting_resources(&self, release_name: &str, namespace: &str) {
        self.cleanup_release(release_name, namespace).await;

        if let Err(err) = self.cluster.delete_release_leftovers(release_name, namespace).await {
            warn!("failed to delete leftovers of {}: {}", release_name, err);
        }

        tokio::time::sleep(CONFLICT_CLEANUP_GRACE).await;
    }
}
