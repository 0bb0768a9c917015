use std::sync::Arc;

use crate::cleanup::CleanupEngine;
use crate::cluster::{ClusterOps, ReleasePhase};
use crate::crypto::to_sha256_truncate_32;
use crate::errors::EngineError;
use crate::io_models::campaign::ReuseRecord;
use crate::io_models::engine::EngineSpec;
use crate::store::CampaignStore;

const MAX_RELEASE_NAME_LEN: usize = 63;

/// Kubernetes-safe name component: lowercase, non-alphanumerics collapsed to
/// single dashes, no leading/trailing dash, `v` prefix when starting with a
/// digit.
pub fn sanitize_name_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_dash = false;
    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_dash = false;
        } else if !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, 'v');
    }
    out.truncate(MAX_RELEASE_NAME_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseIdentity {
    pub release_name: String,
    /// Present only when the campaign carries a values document; keys the
    /// reuse record.
    pub values_fingerprint: Option<String>,
}

/// Deterministic release name: two logically identical campaigns map to the
/// same release.
pub fn release_identity(spec: &EngineSpec) -> ReleaseIdentity {
    let model = sanitize_name_component(&spec.model_identifier);
    let accel = sanitize_name_component(&spec.accel_class);

    let (short_id, values_fingerprint) = match &spec.values_text {
        Some(values_text) => {
            let fingerprint = to_sha256_truncate_32(values_text);
            (fingerprint[..8].to_string(), Some(fingerprint))
        }
        None => {
            let config_hash = to_sha256_truncate_32(&spec.core_config_string());
            (config_hash[..8].to_string(), None)
        }
    };

    let mut release_name = format!("engine-{model}-{short_id}-{accel}-{}", spec.accel_count);
    release_name.truncate(MAX_RELEASE_NAME_LEN);
    while release_name.ends_with('-') {
        release_name.pop();
    }

    ReleaseIdentity {
        release_name,
        values_fingerprint,
    }
}

pub enum ReuseDecision {
    Reuse { release_name: String, namespace: String },
    Install,
}

/// Content-addressed memoizer over the last values-document install. Mutated
/// only from the scheduler's single-flight path; persisted through the store
/// so a restarted process recovers the mapping.
pub struct ReuseCache {
    store: Arc<dyn CampaignStore>,
    cluster: Arc<dyn ClusterOps>,
}

impl ReuseCache {
    pub fn new(store: Arc<dyn CampaignStore>, cluster: Arc<dyn ClusterOps>) -> ReuseCache {
        ReuseCache { store, cluster }
    }

    /// Decide whether a campaign with fingerprint `fingerprint` can attach to
    /// the recorded release instead of installing. Reuse is only granted when
    /// the release is live right now: helm reports deployed AND the backing
    /// workload is fully ready.
    pub async fn decide(&self, fingerprint: &str, cleanup: &CleanupEngine) -> Result<ReuseDecision, EngineError> {
        let Some(record) = self.store.reuse_record().await? else {
            return Ok(ReuseDecision::Install);
        };

        if record.values_fingerprint != fingerprint {
            info!(
                "values changed (recorded {}, incoming {}), tearing down previous release {}",
                record.values_fingerprint, fingerprint, record.release_name
            );
            cleanup.cleanup_release(&record.release_name, &record.namespace).await;
            self.store.clear_reuse_record().await?;
            return Ok(ReuseDecision::Install);
        }

        let status = self.cluster.release_status(&record.release_name, &record.namespace).await?;
        if status.phase != ReleasePhase::Deployed {
            info!(
                "reuse record for {} is stale (release status {}), installing fresh",
                record.release_name, status.phase
            );
            return Ok(ReuseDecision::Install);
        }

        match self
            .cluster
            .workload_readiness(&record.release_name, &record.namespace)
            .await?
        {
            Some((desired, ready)) if ready >= 1 && ready == desired => {
                info!("reusing release {} ({}/{} replicas ready)", record.release_name, ready, desired);
                Ok(ReuseDecision::Reuse {
                    release_name: record.release_name,
                    namespace: record.namespace,
                })
            }
            readiness => {
                info!(
                    "cannot reuse {}: workload not fully ready ({:?})",
                    record.release_name, readiness
                );
                Ok(ReuseDecision::Install)
            }
        }
    }

    /// Written after a successful install whose input was a values document.
    pub async fn record_install(&self, record: ReuseRecord) -> Result<(), EngineError> {
        self.store.save_reuse_record(record).await
    }
}
