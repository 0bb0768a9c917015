use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::StatusCode;
use url::Url;
use uuid::Uuid;

use crate::cluster::{AppliedResource, JobBackend, JobListing, JobStatus};
use crate::errors::EngineError;
use crate::io_models::campaign::{Campaign, CampaignPatch, CampaignRequest};
use crate::submission::{DeployBody, DeployedBody, DeploymentListingBody, JobStatusBody};

const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// one connection pool for every peer client of the process
static PEER_HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(PEER_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
});

fn peer_client() -> reqwest::Client {
    PEER_HTTP_CLIENT.clone()
}

/// `JobBackend` over the peer process's job-deploy surface. The names the
/// peer returns are recorded for tracking and logs; release naming stays
/// with the deterministic formula.
pub struct DeployerClient {
    base_url: Url,
    http: reqwest::Client,
}

impl DeployerClient {
    pub fn new(base_url: Url) -> DeployerClient {
        DeployerClient {
            base_url,
            http: peer_client(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl JobBackend for DeployerClient {
    async fn submit_job(&self, manifest_text: &str, namespace: &str) -> Result<AppliedResource, EngineError> {
        let body = DeployBody {
            manifest_text: manifest_text.to_string(),
            namespace: Some(namespace.to_string()),
        };

        let response = self
            .http
            .post(self.endpoint("/deploy"))
            .json(&body)
            .send()
            .await
            .map_err(|err| EngineError::new_peer_http_error("deploy a job", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::new_peer_http_error(
                "deploy a job",
                format!("HTTP {status}: {text}"),
            ));
        }

        let deployed: DeployedBody = response
            .json()
            .await
            .map_err(|err| EngineError::new_peer_http_error("parse the deploy response", err))?;

        Ok(AppliedResource {
            kind: deployed.resource_kind,
            resource_name: deployed.resource_name,
        })
    }

    async fn job_status(&self, name: &str, namespace: &str) -> Result<JobStatus, EngineError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/jobs/{name}/status")))
            .query(&[("namespace", namespace)])
            .send()
            .await
            .map_err(|err| EngineError::new_peer_http_error("get job status", err))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(JobStatus::not_found()),
            status if status.is_success() => {
                let body: JobStatusBody = response
                    .json()
                    .await
                    .map_err(|err| EngineError::new_peer_http_error("parse the job status", err))?;
                Ok(body.into_status())
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(EngineError::new_peer_http_error(
                    "get job status",
                    format!("HTTP {status}: {text}"),
                ))
            }
        }
    }

    async fn delete_job(&self, name: &str, namespace: &str) -> Result<bool, EngineError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("/jobs/{name}/delete")))
            .query(&[("namespace", namespace)])
            .send()
            .await
            .map_err(|err| EngineError::new_peer_http_error("delete a job", err))?;

        match response.status() {
            // 404 means already deleted
            StatusCode::NOT_FOUND => Ok(true),
            status if status.is_success() => Ok(true),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(EngineError::new_peer_http_error(
                    "delete a job",
                    format!("HTTP {status}: {text}"),
                ))
            }
        }
    }

    async fn list_jobs(&self, namespace: Option<&str>) -> Result<Vec<JobListing>, EngineError> {
        let mut request = self.http.get(self.endpoint("/deployments"));
        if let Some(ns) = namespace {
            request = request.query(&[("namespace", ns)]);
        }

        let response = request
            .send()
            .await
            .map_err(|err| EngineError::new_peer_http_error("list deployments", err))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(EngineError::new_peer_http_error(
                "list deployments",
                format!("HTTP {status}"),
            ));
        }

        let listings: Vec<DeploymentListingBody> = response
            .json()
            .await
            .map_err(|err| EngineError::new_peer_http_error("parse the deployments list", err))?;

        Ok(listings
            .into_iter()
            .map(|l| JobListing {
                resource_kind: l.resource_kind,
                resource_name: l.resource_name,
                namespace: l.namespace,
                status: l.status,
                manifest_text: l.manifest_text,
            })
            .collect())
    }
}

/// Forwards campaigns into the queue-owner process's store: the process that
/// accepts install requests never installs anything itself.
pub struct QueueClient {
    base_url: Url,
    http: reqwest::Client,
}

impl QueueClient {
    pub fn new(base_url: Url) -> QueueClient {
        QueueClient {
            base_url,
            http: peer_client(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// POST /queue/deployment on the peer; returns the assigned campaign id.
    pub async fn enqueue(&self, request: &CampaignRequest) -> Result<Uuid, EngineError> {
        let response = self
            .http
            .post(self.endpoint("/queue/deployment"))
            .json(request)
            .send()
            .await
            .map_err(|err| EngineError::new_peer_http_error("enqueue a campaign", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::new_peer_http_error(
                "enqueue a campaign",
                format!("HTTP {status}: {text}"),
            ));
        }

        let campaign: Campaign = response
            .json()
            .await
            .map_err(|err| EngineError::new_peer_http_error("parse the enqueue response", err))?;
        Ok(campaign.id)
    }

    /// PATCH /queue/{id}/status on the peer, subject to its monotonic-phase
    /// checks.
    pub async fn patch_status(&self, id: Uuid, patch: &CampaignPatch) -> Result<(), EngineError> {
        let response = self
            .http
            .patch(self.endpoint(&format!("/queue/{id}/status")))
            .json(patch)
            .send()
            .await
            .map_err(|err| EngineError::new_peer_http_error("patch campaign status", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::new_peer_http_error(
                "patch campaign status",
                format!("HTTP {status}: {text}"),
            ));
        }

        Ok(())
    }
}
