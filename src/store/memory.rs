use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::io_models::campaign::{Campaign, CampaignPatch, EngineRelease, Phase, ReuseRecord};
use crate::store::CampaignStore;

/// In-process store. Collections mirror the persisted layout: campaigns,
/// engine_releases, and the singleton reuse record.
#[derive(Default)]
pub struct MemoryStore {
    campaigns: RwLock<HashMap<Uuid, Campaign>>,
    releases: RwLock<HashMap<String, EngineRelease>>,
    reuse: RwLock<Option<ReuseRecord>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn insert(&self, campaign: Campaign) -> Result<(), EngineError> {
        let mut campaigns = self.campaigns.write().await;
        campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn update(&self, id: Uuid, patch: CampaignPatch) -> Result<Campaign, EngineError> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(&id)
            .ok_or_else(|| EngineError::new_invalid_campaign(format!("Campaign `{id}` not found")))?;

        if let Some(next_phase) = patch.phase {
            if !campaign.phase.can_transition_to(next_phase) {
                return Err(EngineError::new_invalid_phase_transition(
                    &id.to_string(),
                    &campaign.phase.to_string(),
                    &next_phase.to_string(),
                ));
            }
        }

        // job records are append-only while processing and frozen afterwards
        if campaign.phase.is_terminal() && patch.created_jobs.is_some() {
            return Err(EngineError::new_internal(format!(
                "Refusing to rewrite job records of terminal campaign `{id}`"
            )));
        }

        patch.apply_to(campaign);
        Ok(campaign.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, EngineError> {
        Ok(self.campaigns.read().await.get(&id).cloned())
    }

    async fn list_by_status(&self, phase: Phase) -> Result<Vec<Campaign>, EngineError> {
        let campaigns = self.campaigns.read().await;
        let mut matching: Vec<Campaign> = campaigns.values().filter(|c| c.phase == phase).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn list_all(&self) -> Result<Vec<Campaign>, EngineError> {
        let campaigns = self.campaigns.read().await;
        let mut all: Vec<Campaign> = campaigns.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn delete(&self, id: Uuid, force: bool) -> Result<bool, EngineError> {
        let mut campaigns = self.campaigns.write().await;
        let Some(campaign) = campaigns.get(&id) else {
            return Ok(false);
        };

        if campaign.phase == Phase::Processing && !force {
            return Err(EngineError::new_invalid_campaign(format!(
                "Campaign `{id}` is processing; pass force to delete it after cleanup"
            )));
        }

        campaigns.remove(&id);
        Ok(true)
    }

    async fn reuse_record(&self) -> Result<Option<ReuseRecord>, EngineError> {
        Ok(self.reuse.read().await.clone())
    }

    async fn save_reuse_record(&self, record: ReuseRecord) -> Result<(), EngineError> {
        *self.reuse.write().await = Some(record);
        Ok(())
    }

    async fn clear_reuse_record(&self) -> Result<(), EngineError> {
        *self.reuse.write().await = None;
        Ok(())
    }

    async fn upsert_release(&self, release: EngineRelease) -> Result<(), EngineError> {
        let mut releases = self.releases.write().await;
        releases.insert(release.release_name.clone(), release);
        Ok(())
    }

    async fn get_release(&self, release_name: &str) -> Result<Option<EngineRelease>, EngineError> {
        Ok(self.releases.read().await.get(release_name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Tag;
    use crate::io_models::campaign::CampaignRequest;

    fn pending_campaign() -> Campaign {
        Campaign::from_request(CampaignRequest::default())
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_id() {
        let store = MemoryStore::new();
        let campaign = pending_campaign();

        store.insert(campaign.clone()).await.unwrap();
        store.insert(campaign.clone()).await.unwrap();

        assert_eq!(store.list_all().await.unwrap().len(), 1);
        assert_eq!(store.get(campaign.id).await.unwrap().unwrap().id, campaign.id);
    }

    #[tokio::test]
    async fn update_rejects_non_monotonic_phase_without_mutating() {
        let store = MemoryStore::new();
        let campaign = pending_campaign();
        let id = campaign.id;
        store.insert(campaign).await.unwrap();

        store.update(id, CampaignPatch::phase(Phase::Completed)).await.unwrap();

        let err = store
            .update(id, CampaignPatch::phase(Phase::Processing))
            .await
            .unwrap_err();
        assert_eq!(err.tag(), Tag::Internal);
        assert_eq!(store.get(id).await.unwrap().unwrap().phase, Phase::Completed);
    }

    #[tokio::test]
    async fn job_records_are_frozen_on_terminal_campaigns() {
        let store = MemoryStore::new();
        let campaign = pending_campaign();
        let id = campaign.id;
        store.insert(campaign).await.unwrap();
        store.update(id, CampaignPatch::phase(Phase::Cancelled)).await.unwrap();

        let err = store
            .update(
                id,
                CampaignPatch {
                    created_jobs: Some(vec![]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.tag(), Tag::Internal);
    }

    #[tokio::test]
    async fn list_all_is_newest_first() {
        let store = MemoryStore::new();
        let older = pending_campaign();
        let mut newer = pending_campaign();
        newer.created_at = older.created_at + chrono::Duration::seconds(5);

        store.insert(older.clone()).await.unwrap();
        store.insert(newer.clone()).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all[0].id, newer.id);
        assert_eq!(all[1].id, older.id);
    }

    #[tokio::test]
    async fn delete_guards_processing_campaigns() {
        let store = MemoryStore::new();
        let campaign = pending_campaign();
        let id = campaign.id;
        store.insert(campaign).await.unwrap();
        store.update(id, CampaignPatch::phase(Phase::Processing)).await.unwrap();

        assert!(store.delete(id, false).await.is_err());
        assert!(store.delete(id, true).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reuse_record_round_trips() {
        let store = MemoryStore::new();
        assert!(store.reuse_record().await.unwrap().is_none());

        let record = ReuseRecord {
            values_fingerprint: "abcd".to_string(),
            values_text: "replicaCount: 1".to_string(),
            release_name: "engine-m-toy-abcd-cpu-0".to_string(),
            namespace: "engines".to_string(),
            campaign_id: Uuid::new_v4(),
        };
        store.save_reuse_record(record.clone()).await.unwrap();
        assert_eq!(store.reuse_record().await.unwrap(), Some(record));

        store.clear_reuse_record().await.unwrap();
        assert!(store.reuse_record().await.unwrap().is_none());
    }
}
