pub mod deploy_server;
pub mod peer;
pub mod server;

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};

use crate::cluster::{JobPhase, JobStatus};

/// Body of the job-deploy surface's POST /deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployBody {
    pub manifest_text: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedBody {
    pub resource_kind: String,
    pub resource_name: String,
    pub namespace: String,
}

/// Job status as it travels between the two processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusBody {
    pub job_name: String,
    pub namespace: String,
    pub phase: String,
    pub active_count: u32,
    pub succeeded_count: u32,
    pub failed_count: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatusBody {
    pub fn from_status(job_name: &str, namespace: &str, status: &JobStatus) -> JobStatusBody {
        JobStatusBody {
            job_name: job_name.to_string(),
            namespace: namespace.to_string(),
            phase: status.phase.as_str().to_string(),
            active_count: status.active_count,
            succeeded_count: status.succeeded_count,
            failed_count: status.failed_count,
            started_at: status.started_at,
            completed_at: status.completed_at,
        }
    }

    pub fn into_status(self) -> JobStatus {
        let phase = match self.phase.as_str() {
            "running" => JobPhase::Running,
            "succeeded" | "completed" => JobPhase::Succeeded,
            "failed" | "error" => JobPhase::Failed,
            "not_found" => JobPhase::NotFound,
            _ => JobPhase::Pending,
        };
        JobStatus {
            phase,
            active_count: self.active_count,
            succeeded_count: self.succeeded_count,
            failed_count: self.failed_count,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// One record of the job-deploy surface's GET /deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListingBody {
    #[serde(alias = "resource_type")]
    pub resource_kind: String,
    pub resource_name: String,
    pub namespace: String,
    pub status: String,
    #[serde(default, alias = "yaml_content")]
    pub manifest_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthBody {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthBody {
    pub fn healthy(service: &str) -> HealthBody {
        HealthBody {
            status: "healthy".to_string(),
            service: service.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_body_round_trips_phases() {
        let status = JobStatus::not_found();
        let body = JobStatusBody::from_status("bench-1", "default", &status);
        assert_eq!(body.phase, "not_found");
        assert_eq!(body.into_status().phase, JobPhase::NotFound);
    }

    #[test]
    fn completed_is_accepted_as_succeeded() {
        let body = JobStatusBody {
            job_name: "bench-1".to_string(),
            namespace: "default".to_string(),
            phase: "completed".to_string(),
            active_count: 0,
            succeeded_count: 1,
            failed_count: 0,
            started_at: None,
            completed_at: None,
        };
        assert_eq!(body.into_status().phase, JobPhase::Succeeded);
    }

    #[test]
    fn deployment_listing_accepts_legacy_field_names() {
        let body: DeploymentListingBody = serde_json::from_str(
            r#"{
                "resource_type": "job",
                "resource_name": "benchmark-job-1",
                "namespace": "default",
                "status": "deployed",
                "yaml_content": "kind: Job"
            }"#,
        )
        .unwrap();
        assert_eq!(body.resource_kind, "job");
        assert_eq!(body.manifest_text.as_deref(), Some("kind: Job"));
    }
}
