pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::{EngineError, Tag};
use crate::io_models::campaign::{Campaign, CampaignPatch, EngineRelease, Phase, ReuseRecord};

/// Durable persistence of campaigns, engine releases and the reuse record.
/// Driver plumbing is out of scope here: `MemoryStore` is the in-process
/// backend and the seam a database-backed implementation plugs into. All
/// writes are upserts keyed by campaign id; `update` enforces the monotonic
/// phase invariant and refuses the write otherwise.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Idempotent upsert on id.
    async fn insert(&self, campaign: Campaign) -> Result<(), EngineError>;

    /// Partial update. A non-monotonic phase write is rejected without mutating.
    async fn update(&self, id: Uuid, patch: CampaignPatch) -> Result<Campaign, EngineError>;

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, EngineError>;

    async fn list_by_status(&self, phase: Phase) -> Result<Vec<Campaign>, EngineError>;

    /// All campaigns, newest first.
    async fn list_all(&self) -> Result<Vec<Campaign>, EngineError>;

    /// Deleting a processing campaign requires `force`; forced deletion
    /// assumes the caller ran cleanup first.
    async fn delete(&self, id: Uuid, force: bool) -> Result<bool, EngineError>;

    async fn reuse_record(&self) -> Result<Option<ReuseRecord>, EngineError>;

    async fn save_reuse_record(&self, record: ReuseRecord) -> Result<(), EngineError>;

    async fn clear_reuse_record(&self) -> Result<(), EngineError>;

    async fn upsert_release(&self, release: EngineRelease) -> Result<(), EngineError>;

    async fn get_release(&self, release_name: &str) -> Result<Option<EngineRelease>, EngineError>;
}

const BACKOFF_BASE_DELAY: Duration = Duration::from_millis(250);
const BACKOFF_MAX_ATTEMPTS: u32 = 4;

/// Retry a store operation on transient failures with exponential backoff,
/// then surface `StoreUnavailable`. Scheduling treats that as "back off and
/// retry the tick", never as a campaign failure.
pub async fn with_backoff<T, F, Fut>(operation: &str, mut f: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut delay = BACKOFF_BASE_DELAY;
    let mut last_error: Option<EngineError> = None;

    for attempt in 1..=BACKOFF_MAX_ATTEMPTS {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.tag() == Tag::Transient => {
                warn!(
                    "store operation `{}` failed (attempt {}/{}): {}",
                    operation, attempt, BACKOFF_MAX_ATTEMPTS, err
                );
                last_error = Some(err);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }

    Err(match last_error {
        Some(err) => EngineError::new_store_unavailable(operation, err),
        None => EngineError::new_store_unavailable(operation, "no attempt executed"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn backoff_retries_transient_errors_then_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));

        let err = with_backoff("update", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EngineError::new_transient("store hiccup"))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.tag(), Tag::StoreUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), BACKOFF_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn backoff_passes_through_non_transient_errors() {
        let ret = with_backoff("update", || async {
            Err::<(), _>(EngineError::new_invalid_campaign("bad request"))
        })
        .await;

        assert_eq!(ret.unwrap_err().tag(), Tag::Configuration);
    }

    #[tokio::test]
    async fn backoff_returns_first_success() {
        let calls = AtomicU32::new(0);
        let ret = with_backoff("get", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, EngineError>(42)
        })
        .await;

        assert_eq!(ret.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
