use crate::cluster::{ClusterOps, ReleasePhase};
use crate::io_models::engine::primary_model_from_values;

/// What to do about a live release occupying the deterministic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// No live release with that name.
    Install,
    /// Same primary model: adopt the existing release, do not reinstall.
    Skip,
    /// Different model or inconclusive comparison: tear it down first.
    CleanupAndInstall,
}

/// Compare the incoming campaign against whatever currently owns the release
/// name. Deterministic names mean a clash is either the same logical engine
/// (adopt it) or a stale/conflicting one (replace it).
pub async fn resolve_release_conflict(
    cluster: &dyn ClusterOps,
    release_name: &str,
    namespace: &str,
    incoming_model: &str,
) -> ConflictAction {
    let status = match cluster.release_status(release_name, namespace).await {
        Ok(status) => status,
        Err(err) => {
            warn!("could not check for conflicting release {}: {}", release_name, err);
            return ConflictAction::Install;
        }
    };

    if status.phase == ReleasePhase::Unknown {
        debug!("no existing release named {}", release_name);
        return ConflictAction::Install;
    }

    let values = match cluster.release_values(release_name, namespace).await {
        Ok(Some(values)) => values,
        Ok(None) => {
            warn!("release {} exists but has no readable values", release_name);
            return ConflictAction::CleanupAndInstall;
        }
        Err(err) => {
            warn!("could not read values of release {}: {}", release_name, err);
            return ConflictAction::CleanupAndInstall;
        }
    };

    match primary_model_from_values(&values) {
        Some(existing_model) if !incoming_model.is_empty() && existing_model == incoming_model => {
            info!(
                "release {} already serves `{}`, skipping install",
                release_name, existing_model
            );
            ConflictAction::Skip
        }
        existing => {
            info!(
                "release {} serves {:?} but campaign wants `{}`, will cleanup and reinstall",
                release_name, existing, incoming_model
            );
            ConflictAction::CleanupAndInstall
        }
    }
}
