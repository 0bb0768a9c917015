use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::{ClusterOps, JobPhase};
use crate::errors::{EngineError, Tag};
use crate::io_models::campaign::CampaignRequest;
use crate::submission::peer::QueueClient;
use crate::submission::{DeployBody, DeployedBody, DeploymentListingBody, HealthBody, JobStatusBody};

const DEFAULT_LOG_TAIL_LINES: i64 = 100;

/// State of the job-deploy process: it owns cluster access for benchmark
/// jobs and forwards campaign submissions to the queue-owner peer.
#[derive(Clone)]
pub struct DeployState {
    pub cluster: Arc<dyn ClusterOps>,
    pub default_namespace: String,
    pub queue: Option<Arc<QueueClient>>,
}

type ApiError = (StatusCode, String);

fn to_api_error(err: EngineError) -> ApiError {
    let status = match err.tag() {
        Tag::Configuration => StatusCode::UNPROCESSABLE_ENTITY,
        Tag::Transient | Tag::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.user_message())
}

pub fn deploy_router(state: DeployState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/deploy", post(deploy_manifest))
        .route("/delete", post(delete_manifest))
        .route("/deployments", get(list_deployments))
        .route("/jobs/{name}/status", get(job_status))
        .route("/jobs/{name}/delete", axum::routing::delete(delete_job))
        .route("/jobs/{name}/logs", get(job_logs))
        .route("/queue/deployment", post(forward_campaign))
        .with_state(state)
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody::healthy("benchmark-engine-deployer"))
}

async fn deploy_manifest(
    State(state): State<DeployState>,
    Json(body): Json<DeployBody>,
) -> Result<Json<DeployedBody>, ApiError> {
    let namespace = body.namespace.unwrap_or_else(|| state.default_namespace.clone());
    let applied = state
        .cluster
        .apply_manifest(&body.manifest_text, &namespace)
        .await
        .map_err(to_api_error)?;

    Ok(Json(DeployedBody {
        resource_kind: applied.kind,
        resource_name: applied.resource_name,
        namespace,
    }))
}

#[derive(Debug, Serialize)]
struct DeleteManifestResponse {
    deleted_resources: Vec<DeletedResourceBody>,
}

#[derive(Debug, Serialize)]
struct DeletedResourceBody {
    kind: String,
    name: String,
    namespace: String,
}

async fn delete_manifest(
    State(state): State<DeployState>,
    Json(body): Json<DeployBody>,
) -> Result<Json<DeleteManifestResponse>, ApiError> {
    let namespace = body.namespace.unwrap_or_else(|| state.default_namespace.clone());
    let deleted = state
        .cluster
        .delete_manifest(&body.manifest_text, &namespace)
        .await
        .map_err(to_api_error)?;

    Ok(Json(DeleteManifestResponse {
        deleted_resources: deleted
            .into_iter()
            .map(|d| DeletedResourceBody {
                kind: d.kind,
                name: d.name,
                namespace: d.namespace,
            })
            .collect(),
    }))
}

async fn list_deployments(State(state): State<DeployState>) -> Result<Json<Vec<DeploymentListingBody>>, ApiError> {
    let listings = state.cluster.list_jobs(None).await.map_err(to_api_error)?;
    Ok(Json(
        listings
            .into_iter()
            .map(|l| DeploymentListingBody {
                resource_kind: l.resource_kind,
                resource_name: l.resource_name,
                namespace: l.namespace,
                status: l.status,
                manifest_text: l.manifest_text,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
struct NamespaceParams {
    #[serde(default)]
    namespace: Option<String>,
}

async fn job_status(
    State(state): State<DeployState>,
    Path(name): Path<String>,
    Query(params): Query<NamespaceParams>,
) -> Result<Json<JobStatusBody>, ApiError> {
    let namespace = params.namespace.unwrap_or_else(|| state.default_namespace.clone());
    let status = state.cluster.job_status(&name, &namespace).await.map_err(to_api_error)?;

    if status.phase == JobPhase::NotFound {
        return Err((
            StatusCode::NOT_FOUND,
            format!("job `{name}` not found in namespace `{namespace}`"),
        ));
    }

    Ok(Json(JobStatusBody::from_status(&name, &namespace, &status)))
}

#[derive(Debug, Serialize)]
struct JobDeletedResponse {
    deleted: bool,
}

async fn delete_job(
    State(state): State<DeployState>,
    Path(name): Path<String>,
    Query(params): Query<NamespaceParams>,
) -> Result<Json<JobDeletedResponse>, ApiError> {
    let namespace = params.namespace.unwrap_or_else(|| state.default_namespace.clone());
    let deleted = state.cluster.delete_job(&name, &namespace).await.map_err(to_api_error)?;
    Ok(Json(JobDeletedResponse { deleted }))
}

#[derive(Debug, Deserialize)]
struct LogParams {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    tail_lines: Option<i64>,
}

#[derive(Debug, Serialize)]
struct JobLogsResponse {
    job_name: String,
    namespace: String,
    logs: Vec<String>,
    timestamp: chrono::DateTime<Utc>,
}

async fn job_logs(
    State(state): State<DeployState>,
    Path(name): Path<String>,
    Query(params): Query<LogParams>,
) -> Result<Json<JobLogsResponse>, ApiError> {
    let namespace = params.namespace.unwrap_or_else(|| state.default_namespace.clone());
    let logs = state
        .cluster
        .job_logs(&name, &namespace, params.tail_lines.unwrap_or(DEFAULT_LOG_TAIL_LINES))
        .await
        .map_err(to_api_error)?;

    Ok(Json(JobLogsResponse {
        job_name: name,
        namespace,
        logs,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
struct ForwardedCampaignResponse {
    id: Uuid,
}

/// Engine install requests land here but are never installed here: they are
/// translated into a campaign and enqueued into the scheduler process.
async fn forward_campaign(
    State(state): State<DeployState>,
    Json(request): Json<CampaignRequest>,
) -> Result<(StatusCode, Json<ForwardedCampaignResponse>), ApiError> {
    let Some(queue) = &state.queue else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "no queue peer configured for campaign forwarding".to_string(),
        ));
    };

    let id = queue.enqueue(&request).await.map_err(to_api_error)?;
    info!("forwarded campaign {} to the queue peer", id);
    Ok((StatusCode::ACCEPTED, Json(ForwardedCampaignResponse { id })))
}
