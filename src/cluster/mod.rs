use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::cmd::helm::Helm;
pub use crate::cmd::helm::{ReleasePhase, ReleaseStatus};
use crate::errors::EngineError;
use crate::services::kube_client::KubeClient;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum JobPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    NotFound,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Running => "running",
            JobPhase::Succeeded => "succeeded",
            JobPhase::Failed => "failed",
            JobPhase::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub active_count: u32,
    pub succeeded_count: u32,
    pub failed_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn not_found() -> JobStatus {
        JobStatus {
            phase: JobPhase::NotFound,
            active_count: 0,
            succeeded_count: 0,
            failed_count: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppliedResource {
    pub kind: String,
    pub resource_name: String,
}

#[derive(Debug, Clone)]
pub struct DeletedResource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone)]
pub struct PodSummary {
    pub pod_name: String,
    pub phase: String,
    pub ready: bool,
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkloadSummary {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub replicas: u32,
    pub ready_replicas: u32,
}

/// A benchmark job as seen by a job backend, used by cleanup to discover
/// work that survived a crash between "applied" and "recorded".
#[derive(Debug, Clone)]
pub struct JobListing {
    pub resource_kind: String,
    pub resource_name: String,
    pub namespace: String,
    pub status: String,
    pub manifest_text: Option<String>,
}

/// The one seam that talks to the cluster. Everything above it (monitors,
/// cleanup, executor, scheduler) is exercised in tests against fakes of this
/// trait.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn install_release(
        &self,
        release_name: &str,
        chart_path: &Path,
        namespace: &str,
        values_text: &str,
    ) -> Result<(), EngineError>;

    /// Returns true when the release is gone, including when it never existed.
    async fn uninstall_release(&self, release_name: &str, namespace: &str) -> Result<bool, EngineError>;

    async fn release_status(&self, release_name: &str, namespace: &str) -> Result<ReleaseStatus, EngineError>;

    /// User-supplied values of a live release, None when the release does not exist.
    async fn release_values(&self, release_name: &str, namespace: &str)
    -> Result<Option<serde_json::Value>, EngineError>;

    async fn pod_readiness(&self, release_name: &str, namespace: &str) -> Result<bool, EngineError>;

    /// (desired, ready) replicas of the backing workload, None when absent.
    async fn workload_readiness(&self, release_name: &str, namespace: &str)
    -> Result<Option<(u32, u32)>, EngineError>;

    async fn apply_manifest(&self, manifest_text: &str, namespace: &str) -> Result<AppliedResource, EngineError>;

    async fn delete_manifest(&self, manifest_text: &str, namespace: &str) -> Result<Vec<DeletedResource>, EngineError>;

    async fn job_status(&self, name: &str, namespace: &str) -> Result<JobStatus, EngineError>;

    async fn delete_job(&self, name: &str, namespace: &str) -> Result<bool, EngineError>;

    async fn list_pods_for_job(&self, name: &str, namespace: &str) -> Result<Vec<PodSummary>, EngineError>;

    async fn list_releases_by_label(&self, label: &str, namespace: &str) -> Result<Vec<WorkloadSummary>, EngineError>;

    async fn list_jobs(&self, namespace: Option<&str>) -> Result<Vec<JobListing>, EngineError>;

    async fn delete_release_leftovers(&self, release_name: &str, namespace: &str) -> Result<(), EngineError>;

    async fn job_logs(&self, name: &str, namespace: &str, tail_lines: i64) -> Result<Vec<String>, EngineError>;

    async fn stream_pod_log(
        &self,
        pod_name: &str,
        namespace: &str,
        tail_lines: i64,
        follow: bool,
    ) -> Result<BoxStream<'static, String>, EngineError>;
}

/// Where benchmark jobs are submitted and watched: either this process's own
/// cluster adapter, or the peer deployer process over HTTP.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn submit_job(&self, manifest_text: &str, namespace: &str) -> Result<AppliedResource, EngineError>;

    async fn job_status(&self, name: &str, namespace: &str) -> Result<JobStatus, EngineError>;

    async fn delete_job(&self, name: &str, namespace: &str) -> Result<bool, EngineError>;

    async fn list_jobs(&self, namespace: Option<&str>) -> Result<Vec<JobListing>, EngineError>;
}

/// The real thing: helm for release lifecycle, the typed kube client for
/// everything else. Helm runs as an external process on the blocking pool.
pub struct LiveCluster {
    helm: Helm,
    kube: KubeClient,
}

impl LiveCluster {
    pub fn new(helm: Helm, kube: KubeClient) -> LiveCluster {
        LiveCluster { helm, kube }
    }

    pub fn with_helm_timeout(mut self, timeout: Duration) -> LiveCluster {
        self.helm = self.helm.with_command_timeout(timeout);
        self
    }

    async fn helm_blocking<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(Helm) -> Result<T, crate::cmd::helm::HelmError> + Send + 'static,
    {
        let helm = self.helm.clone();
        tokio::task::spawn_blocking(move || f(helm))
            .await
            .map_err(|err| EngineError::new_internal(format!("helm task panicked: {err}")))?
            .map_err(|err| EngineError::new_helm_error("helm", err))
    }
}

#[async_trait]
impl ClusterOps for LiveCluster {
    async fn install_release(
        &self,
        release_name: &str,
        chart_path: &Path,
        namespace: &str,
        values_text: &str,
    ) -> Result<(), EngineError> {
        let (release, chart, ns, values) = (
            release_name.to_string(),
            chart_path.to_path_buf(),
            namespace.to_string(),
            values_text.to_string(),
        );

        let ret = {
            let helm = self.helm.clone();
            tokio::task::spawn_blocking(move || helm.install_release(&release, &chart, &ns, &values))
                .await
                .map_err(|err| EngineError::new_internal(format!("helm task panicked: {err}")))?
        };

        match ret {
            Ok(()) => Ok(()),
            Err(crate::cmd::helm::HelmError::ReleaseConflict(name)) => {
                Err(EngineError::new_release_conflict(&name, namespace))
            }
            Err(err) => Err(EngineError::new_helm_error(release_name, err)),
        }
    }

    async fn uninstall_release(&self, release_name: &str, namespace: &str) -> Result<bool, EngineError> {
        let (release, ns) = (release_name.to_string(), namespace.to_string());
        self.helm_blocking(move |helm| helm.uninstall_release(&release, &ns)).await
    }

    async fn release_status(&self, release_name: &str, namespace: &str) -> Result<ReleaseStatus, EngineError> {
        let (release, ns) = (release_name.to_string(), namespace.to_string());
        self.helm_blocking(move |helm| helm.release_status(&release, &ns)).await
    }

    async fn release_values(
        &self,
        release_name: &str,
        namespace: &str,
    ) -> Result<Option<serde_json::Value>, EngineError> {
        let (release, ns) = (release_name.to_string(), namespace.to_string());
        self.helm_blocking(move |helm| helm.get_values(&release, &ns)).await
    }

    async fn pod_readiness(&self, release_name: &str, namespace: &str) -> Result<bool, EngineError> {
        self.kube.pod_readiness(release_name, namespace).await
    }

    async fn workload_readiness(
        &self,
        release_name: &str,
        namespace: &str,
    ) -> Result<Option<(u32, u32)>, EngineError> {
        self.kube.workload_readiness(release_name, namespace).await
    }

    async fn apply_manifest(&self, manifest_text: &str, namespace: &str) -> Result<AppliedResource, EngineError> {
        self.kube.apply_manifest(manifest_text, namespace).await
    }

    async fn delete_manifest(&self, manifest_text: &str, namespace: &str) -> Result<Vec<DeletedResource>, EngineError> {
        self.kube.delete_manifest(manifest_text, namespace).await
    }

    async fn job_status(&self, name: &str, namespace: &str) -> Result<JobStatus, EngineError> {
        self.kube.job_status(name, namespace).await
    }

    async fn delete_job(&self, name: &str, namespace: &str) -> Result<bool, EngineError> {
        self.kube.delete_job(name, namespace).await
    }

    async fn list_pods_for_job(&self, name: &str, namespace: &str) -> Result<Vec<PodSummary>, EngineError> {
        self.kube.list_pods_for_job(name, namespace).await
    }

    async fn list_releases_by_label(&self, label: &str, namespace: &str) -> Result<Vec<WorkloadSummary>, EngineError> {
        self.kube.list_workloads_by_label(label, namespace).await
    }

    async fn list_jobs(&self, namespace: Option<&str>) -> Result<Vec<JobListing>, EngineError> {
        let jobs = self.kube.list_jobs(namespace).await?;
        Ok(jobs
            .into_iter()
            .map(|job| {
                let status = job.status.unwrap_or_default();
                let state = if status.succeeded.unwrap_or(0) > 0 {
                    "completed"
                } else if status.active.unwrap_or(0) > 0 {
                    "running"
                } else if status.failed.unwrap_or(0) > 0 {
                    "failed"
                } else {
                    "pending"
                };
                JobListing {
                    resource_kind: "job".to_string(),
                    resource_name: job.metadata.name.unwrap_or_default(),
                    namespace: job.metadata.namespace.unwrap_or_default(),
                    status: state.to_string(),
                    manifest_text: None,
                }
            })
            .collect())
    }

    async fn delete_release_leftovers(&self, release_name: &str, namespace: &str) -> Result<(), EngineError> {
        self.kube.delete_release_leftovers(release_name, namespace).await
    }

    async fn job_logs(&self, name: &str, namespace: &str, tail_lines: i64) -> Result<Vec<String>, EngineError> {
        self.kube.job_logs(name, namespace, tail_lines).await
    }

    async fn stream_pod_log(
        &self,
        pod_name: &str,
        namespace: &str,
        tail_lines: i64,
        follow: bool,
    ) -> Result<BoxStream<'static, String>, EngineError> {
        self.kube.stream_pod_log(pod_name, namespace, tail_lines, follow).await
    }
}

pub fn live_cluster(kubeconfig_path: Option<PathBuf>, kube: KubeClient) -> LiveCluster {
    LiveCluster::new(Helm::new(kubeconfig_path, &[]), kube)
}

/// Submits jobs straight through this process's cluster adapter.
pub struct LocalJobBackend {
    cluster: std::sync::Arc<dyn ClusterOps>,
}

impl LocalJobBackend {
    pub fn new(cluster: std::sync::Arc<dyn ClusterOps>) -> LocalJobBackend {
        LocalJobBackend { cluster }
    }
}

#[async_trait]
impl JobBackend for LocalJobBackend {
    async fn submit_job(&self, manifest_text: &str, namespace: &str) -> Result<AppliedResource, EngineError> {
        self.cluster.apply_manifest(manifest_text, namespace).await
    }

    async fn job_status(&self, name: &str, namespace: &str) -> Result<JobStatus, EngineError> {
        self.cluster.job_status(name, namespace).await
    }

    async fn delete_job(&self, name: &str, namespace: &str) -> Result<bool, EngineError> {
        self.cluster.delete_job(name, namespace).await
    }

    async fn list_jobs(&self, namespace: Option<&str>) -> Result<Vec<JobListing>, EngineError> {
        self.cluster.list_jobs(namespace).await
    }
}
