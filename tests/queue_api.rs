//! Queue surface behavior through the axum router.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use benchmark_engine::cleanup::CleanupEngine;
use benchmark_engine::cluster::{ClusterOps, JobBackend};
use benchmark_engine::executor::ExecutorConfig;
use benchmark_engine::io_models::campaign::{Campaign, QueueStatusCounts};
use benchmark_engine::reuse::ReuseCache;
use benchmark_engine::scheduler::{DEFAULT_POLL_INTERVAL, Scheduler};
use benchmark_engine::store::CampaignStore;
use benchmark_engine::store::memory::MemoryStore;
use benchmark_engine::submission::server::{QueueState, queue_router};

use common::{FakeCluster, FakeJobs};

fn router() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let cluster: Arc<dyn ClusterOps> = Arc::new(FakeCluster::new());
    let jobs: Arc<dyn JobBackend> = Arc::new(FakeJobs::all_succeeding());
    let store_dyn: Arc<dyn CampaignStore> = store.clone();

    let cleanup = Arc::new(CleanupEngine::new(cluster.clone(), jobs.clone(), store_dyn.clone()));
    let reuse = Arc::new(ReuseCache::new(store_dyn.clone(), cluster.clone()));
    let scheduler = Arc::new(Scheduler::new(
        store_dyn.clone(),
        cluster,
        jobs,
        cleanup.clone(),
        reuse,
        ExecutorConfig::default(),
        DEFAULT_POLL_INTERVAL,
        false, // no background processing in these tests
    ));

    (
        queue_router(QueueState {
            store: store_dyn,
            scheduler,
            cleanup,
        }),
        store,
    )
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn enqueue_then_fetch_round_trips() {
    let (router, _store) = router();

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/queue/deployment",
            serde_json::json!({
                "engine": { "model_identifier": "M/toy" },
                "benchmarks": [{ "manifest_text": "kind: Job\nmetadata:\n  name: b1\n" }],
                "priority": "high"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Campaign = body_json(response).await;
    assert_eq!(created.phase.to_string(), "pending");
    assert_eq!(created.priority.to_string(), "high");
    assert_eq!(created.total_steps(), 2);

    let response = router
        .oneshot(empty_request("GET", &format!("/queue/{}", created.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched: Campaign = body_json(response).await;
    assert_eq!(fetched.id, created.id);
}

#[tokio::test]
async fn queue_status_counts_by_phase() {
    let (router, _store) = router();

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(json_request("POST", "/queue/deployment", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = router.oneshot(empty_request("GET", "/queue/status")).await.unwrap();
    let counts: QueueStatusCounts = body_json(response).await;
    assert_eq!(counts.total, 3);
    assert_eq!(counts.pending, 3);
    assert_eq!(counts.processing, 0);
}

#[tokio::test]
async fn priority_changes_only_while_pending() {
    let (router, store) = router();

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/queue/deployment",
            serde_json::json!({ "priority": "low" }),
        ))
        .await
        .unwrap();
    let created: Campaign = body_json(response).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/queue/{}/priority", created.id),
            serde_json::json!({ "priority": "urgent" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Campaign = body_json(response).await;
    assert_eq!(updated.priority.to_string(), "urgent");

    // once terminal, priority is frozen
    store
        .update(
            created.id,
            benchmark_engine::io_models::campaign::CampaignPatch::phase(
                benchmark_engine::io_models::campaign::Phase::Completed,
            ),
        )
        .await
        .unwrap();
    let response = router
        .oneshot(json_request(
            "POST",
            &format!("/queue/{}/priority", created.id),
            serde_json::json!({ "priority": "low" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn status_patch_rejects_phase_regressions() {
    let (router, store) = router();

    let response = router
        .clone()
        .oneshot(json_request("POST", "/queue/deployment", serde_json::json!({})))
        .await
        .unwrap();
    let created: Campaign = body_json(response).await;

    store
        .update(
            created.id,
            benchmark_engine::io_models::campaign::CampaignPatch::phase(
                benchmark_engine::io_models::campaign::Phase::Completed,
            ),
        )
        .await
        .unwrap();

    let response = router
        .oneshot(json_request(
            "PATCH",
            &format!("/queue/{}/status", created.id),
            serde_json::json!({ "status": "processing" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn delete_requires_force_for_processing_campaigns() {
    let (router, store) = router();

    let response = router
        .clone()
        .oneshot(json_request("POST", "/queue/deployment", serde_json::json!({})))
        .await
        .unwrap();
    let created: Campaign = body_json(response).await;

    store
        .update(
            created.id,
            benchmark_engine::io_models::campaign::CampaignPatch::phase(
                benchmark_engine::io_models::campaign::Phase::Processing,
            ),
        )
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(empty_request("DELETE", &format!("/queue/{}", created.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .oneshot(empty_request("DELETE", &format!("/queue/{}?force=true", created.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(store.get(created.id).await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_on_missing_campaign_is_404() {
    let (router, _store) = router();
    let response = router
        .oneshot(empty_request(
            "POST",
            &format!("/queue/{}/cancel", uuid::Uuid::new_v4()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
