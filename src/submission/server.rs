use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cleanup::CleanupEngine;
use crate::errors::{EngineError, Tag};
use crate::io_models::campaign::{
    Campaign, CampaignPatch, CampaignRequest, Phase, Priority, QueueStatusCounts,
};
use crate::scheduler::{Scheduler, SchedulerStatus};
use crate::store::CampaignStore;
use crate::submission::HealthBody;

#[derive(Clone)]
pub struct QueueState {
    pub store: Arc<dyn CampaignStore>,
    pub scheduler: Arc<Scheduler>,
    pub cleanup: Arc<CleanupEngine>,
}

type ApiError = (StatusCode, String);

fn to_api_error(err: EngineError) -> ApiError {
    let status = match err.tag() {
        Tag::Configuration => StatusCode::BAD_REQUEST,
        Tag::Internal => StatusCode::CONFLICT,
        Tag::StoreUnavailable | Tag::Transient => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.user_message())
}

fn not_found(id: Uuid) -> ApiError {
    (StatusCode::NOT_FOUND, format!("campaign `{id}` not found"))
}

/// The campaign queue surface owned by the scheduler process.
pub fn queue_router(state: QueueState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/queue/deployment", post(enqueue_campaign))
        .route("/queue/list", get(list_campaigns))
        .route("/queue/status", get(queue_status))
        .route("/queue/{id}", get(get_campaign).delete(delete_campaign))
        .route("/queue/{id}/cancel", post(cancel_campaign))
        .route("/queue/{id}/priority", post(change_priority))
        .route("/queue/{id}/status", patch(patch_status))
        .route("/scheduler/start", post(scheduler_start))
        .route("/scheduler/stop", post(scheduler_stop))
        .route("/scheduler/status", get(scheduler_status))
        .route("/scheduler/config", post(scheduler_config))
        .route("/scheduler/process-now", post(scheduler_process_now))
        .with_state(state)
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody::healthy("benchmark-engine-queue"))
}

async fn enqueue_campaign(
    State(state): State<QueueState>,
    Json(request): Json<CampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let campaign = Campaign::from_request(request);
    info!(
        "enqueuing campaign {} (priority {}, {} benchmarks)",
        campaign.id,
        campaign.priority,
        campaign.benchmarks.len()
    );
    state.store.insert(campaign.clone()).await.map_err(to_api_error)?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

async fn list_campaigns(State(state): State<QueueState>) -> Result<Json<Vec<Campaign>>, ApiError> {
    let campaigns = state.store.list_all().await.map_err(to_api_error)?;
    Ok(Json(campaigns))
}

async fn queue_status(State(state): State<QueueState>) -> Result<Json<QueueStatusCounts>, ApiError> {
    let campaigns = state.store.list_all().await.map_err(to_api_error)?;
    let mut counts = QueueStatusCounts {
        total: campaigns.len(),
        ..Default::default()
    };
    for campaign in campaigns {
        match campaign.phase {
            Phase::Pending => counts.pending += 1,
            Phase::Processing => counts.processing += 1,
            Phase::Completed => counts.completed += 1,
            Phase::Failed => counts.failed += 1,
            Phase::Cancelled => counts.cancelled += 1,
        }
    }
    Ok(Json(counts))
}

async fn get_campaign(
    State(state): State<QueueState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    match state.store.get(id).await.map_err(to_api_error)? {
        Some(campaign) => Ok(Json(campaign)),
        None => Err(not_found(id)),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct DeletedResponse {
    deleted: bool,
}

async fn delete_campaign(
    State(state): State<QueueState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let Some(campaign) = state.store.get(id).await.map_err(to_api_error)? else {
        return Err(not_found(id));
    };

    // A forced delete of live work tears its resources down first.
    if params.force && !campaign.phase.is_terminal() {
        state.cleanup.cleanup_campaign(&campaign, "force deleted").await;
    }

    let deleted = state.store.delete(id, params.force).await.map_err(to_api_error)?;
    Ok(Json(DeletedResponse { deleted }))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn cancel_campaign(
    State(state): State<QueueState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    if state.store.get(id).await.map_err(to_api_error)?.is_none() {
        return Err(not_found(id));
    }
    let cancelled = state.scheduler.cancel_campaign(id).await.map_err(to_api_error)?;
    Ok(Json(CancelResponse { cancelled }))
}

#[derive(Debug, Deserialize)]
struct PriorityBody {
    priority: Priority,
}

async fn change_priority(
    State(state): State<QueueState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PriorityBody>,
) -> Result<Json<Campaign>, ApiError> {
    let Some(campaign) = state.store.get(id).await.map_err(to_api_error)? else {
        return Err(not_found(id));
    };
    if campaign.phase != Phase::Pending {
        return Err((
            StatusCode::CONFLICT,
            format!("priority can only change while pending, campaign is {}", campaign.phase),
        ));
    }

    let updated = state
        .store
        .update(
            id,
            CampaignPatch {
                priority: Some(body.priority),
                ..Default::default()
            },
        )
        .await
        .map_err(to_api_error)?;
    Ok(Json(updated))
}

/// Partial status patch from the peer process, subject to the monotonic
/// phase invariant.
async fn patch_status(
    State(state): State<QueueState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<CampaignPatch>,
) -> Result<Json<Campaign>, ApiError> {
    if state.store.get(id).await.map_err(to_api_error)?.is_none() {
        return Err(not_found(id));
    }
    let updated = state.store.update(id, patch).await.map_err(to_api_error)?;
    Ok(Json(updated))
}

async fn scheduler_start(State(state): State<QueueState>) -> Json<SchedulerStatus> {
    state.scheduler.start();
    Json(state.scheduler.status().await)
}

async fn scheduler_stop(State(state): State<QueueState>) -> Json<SchedulerStatus> {
    state.scheduler.stop();
    Json(state.scheduler.status().await)
}

async fn scheduler_status(State(state): State<QueueState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

#[derive(Debug, Deserialize)]
struct SchedulerConfigBody {
    poll_interval: u64,
}

async fn scheduler_config(
    State(state): State<QueueState>,
    Json(body): Json<SchedulerConfigBody>,
) -> Json<SchedulerStatus> {
    let requested = std::time::Duration::from_secs(body.poll_interval);
    let applied = state.scheduler.set_poll_interval(requested).await;
    if applied != requested {
        warn!("poll interval {}s clamped to {}s", body.poll_interval, applied.as_secs());
    }
    Json(state.scheduler.status().await)
}

async fn scheduler_process_now(State(state): State<QueueState>) -> StatusCode {
    state.scheduler.process_now();
    StatusCode::ACCEPTED
}
