//! Scripted in-memory fakes of the cluster seams, shared by the end-to-end
//! scenario tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use benchmark_engine::cluster::{
    AppliedResource, ClusterOps, DeletedResource, JobBackend, JobListing, JobPhase, JobStatus, PodSummary,
    ReleasePhase, ReleaseStatus, WorkloadSummary,
};
use benchmark_engine::errors::EngineError;
use benchmark_engine::services::kube_client::job_name_from_manifest;

#[derive(Clone)]
pub struct FakeRelease {
    pub phase: ReleasePhase,
    pub pods_ready: bool,
    pub values: Option<serde_json::Value>,
}

impl FakeRelease {
    pub fn deployed_and_ready(values: Option<serde_json::Value>) -> FakeRelease {
        FakeRelease {
            phase: ReleasePhase::Deployed,
            pods_ready: true,
            values,
        }
    }
}

/// What an install does to the release it creates.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum InstallBehavior {
    BecomesReady,
    KeepsFailing,
}

pub struct FakeCluster {
    pub releases: Mutex<HashMap<String, FakeRelease>>,
    pub install_behavior: Mutex<InstallBehavior>,
    pub install_count: AtomicU32,
    pub uninstall_count: AtomicU32,
    pub installed_names: Mutex<Vec<String>>,
    pub installed_values: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> FakeCluster {
        FakeCluster {
            releases: Mutex::new(HashMap::new()),
            install_behavior: Mutex::new(InstallBehavior::BecomesReady),
            install_count: AtomicU32::new(0),
            uninstall_count: AtomicU32::new(0),
            installed_names: Mutex::new(Vec::new()),
            installed_values: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_engines() -> FakeCluster {
        let cluster = FakeCluster::new();
        *cluster.install_behavior.lock().unwrap() = InstallBehavior::KeepsFailing;
        cluster
    }

    pub fn installs(&self) -> u32 {
        self.install_count.load(Ordering::SeqCst)
    }

    pub fn uninstalls(&self) -> u32 {
        self.uninstall_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn install_release(
        &self,
        release_name: &str,
        _chart_path: &Path,
        _namespace: &str,
        values_text: &str,
    ) -> Result<(), EngineError> {
        self.install_count.fetch_add(1, Ordering::SeqCst);
        self.installed_names.lock().unwrap().push(release_name.to_string());
        self.installed_values.lock().unwrap().push(values_text.to_string());

        // keep the values readable for the conflict resolver, like helm does
        let values = serde_yaml::from_str::<serde_json::Value>(values_text).ok();
        let release = match *self.install_behavior.lock().unwrap() {
            InstallBehavior::BecomesReady => FakeRelease::deployed_and_ready(values),
            InstallBehavior::KeepsFailing => FakeRelease {
                phase: ReleasePhase::Failed,
                pods_ready: false,
                values,
            },
        };
        self.releases.lock().unwrap().insert(release_name.to_string(), release);
        Ok(())
    }

    async fn uninstall_release(&self, release_name: &str, _namespace: &str) -> Result<bool, EngineError> {
        self.uninstall_count.fetch_add(1, Ordering::SeqCst);
        self.releases.lock().unwrap().remove(release_name);
        Ok(true)
    }

    async fn release_status(&self, release_name: &str, _namespace: &str) -> Result<ReleaseStatus, EngineError> {
        let releases = self.releases.lock().unwrap();
        Ok(match releases.get(release_name) {
            Some(release) => ReleaseStatus {
                phase: release.phase,
                description: String::new(),
            },
            None => ReleaseStatus {
                phase: ReleasePhase::Unknown,
                description: format!("release `{release_name}` not found"),
            },
        })
    }

    async fn release_values(
        &self,
        release_name: &str,
        _namespace: &str,
    ) -> Result<Option<serde_json::Value>, EngineError> {
        Ok(self
            .releases
            .lock()
            .unwrap()
            .get(release_name)
            .and_then(|r| r.values.clone()))
    }

    async fn pod_readiness(&self, release_name: &str, _namespace: &str) -> Result<bool, EngineError> {
        Ok(self
            .releases
            .lock()
            .unwrap()
            .get(release_name)
            .map(|r| r.pods_ready)
            .unwrap_or(false))
    }

    async fn workload_readiness(
        &self,
        release_name: &str,
        _namespace: &str,
    ) -> Result<Option<(u32, u32)>, EngineError> {
        Ok(self
            .releases
            .lock()
            .unwrap()
            .get(release_name)
            .map(|r| if r.pods_ready { (1, 1) } else { (1, 0) }))
    }

    async fn apply_manifest(&self, _: &str, _: &str) -> Result<AppliedResource, EngineError> {
        unimplemented!("benchmark jobs go through the job backend")
    }

    async fn delete_manifest(&self, _: &str, _: &str) -> Result<Vec<DeletedResource>, EngineError> {
        Ok(vec![])
    }

    async fn job_status(&self, _: &str, _: &str) -> Result<JobStatus, EngineError> {
        Ok(JobStatus::not_found())
    }

    async fn delete_job(&self, _: &str, _: &str) -> Result<bool, EngineError> {
        Ok(true)
    }

    async fn list_pods_for_job(&self, _: &str, _: &str) -> Result<Vec<PodSummary>, EngineError> {
        Ok(vec![])
    }

    async fn list_releases_by_label(&self, _: &str, _: &str) -> Result<Vec<WorkloadSummary>, EngineError> {
        let releases = self.releases.lock().unwrap();
        Ok(releases
            .iter()
            .filter(|(_, r)| r.pods_ready)
            .map(|(name, _)| WorkloadSummary {
                name: name.clone(),
                labels: Default::default(),
                replicas: 1,
                ready_replicas: 1,
            })
            .collect())
    }

    async fn list_jobs(&self, _: Option<&str>) -> Result<Vec<JobListing>, EngineError> {
        Ok(vec![])
    }

    async fn delete_release_leftovers(&self, _: &str, _: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn job_logs(&self, _: &str, _: &str, _: i64) -> Result<Vec<String>, EngineError> {
        Ok(vec![])
    }

    async fn stream_pod_log(
        &self,
        _: &str,
        _: &str,
        _: i64,
        _: bool,
    ) -> Result<futures::stream::BoxStream<'static, String>, EngineError> {
        unimplemented!()
    }
}

/// A submitted job and the status script it plays back.
pub struct FakeJob {
    pub script: Vec<JobPhase>,
    pub deleted: bool,
}

pub struct FakeJobs {
    pub jobs: Mutex<HashMap<String, FakeJob>>,
    pub submissions: Mutex<Vec<String>>,
    pub submitted_manifests: Mutex<Vec<String>>,
    pub delete_count: AtomicU32,
    /// Script assigned to each submitted job, in submission order; the last
    /// entry repeats for later submissions.
    pub scripts: Mutex<Vec<Vec<JobPhase>>>,
}

impl FakeJobs {
    /// Every job runs briefly then succeeds.
    pub fn all_succeeding() -> FakeJobs {
        FakeJobs::with_scripts(vec![vec![JobPhase::Running, JobPhase::Succeeded]])
    }

    pub fn with_scripts(scripts: Vec<Vec<JobPhase>>) -> FakeJobs {
        FakeJobs {
            jobs: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            submitted_manifests: Mutex::new(Vec::new()),
            delete_count: AtomicU32::new(0),
            scripts: Mutex::new(scripts),
        }
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn manifests(&self) -> Vec<String> {
        self.submitted_manifests.lock().unwrap().clone()
    }

    pub fn was_deleted(&self, name: &str) -> bool {
        self.jobs.lock().unwrap().get(name).map(|j| j.deleted).unwrap_or(false)
    }
}

#[async_trait]
impl JobBackend for FakeJobs {
    async fn submit_job(&self, manifest_text: &str, _namespace: &str) -> Result<AppliedResource, EngineError> {
        let mut submissions = self.submissions.lock().unwrap();
        let index = submissions.len();
        let name = job_name_from_manifest(manifest_text).unwrap_or_else(|| format!("benchmark-job-{}", index + 1));
        submissions.push(name.clone());
        self.submitted_manifests.lock().unwrap().push(manifest_text.to_string());

        let scripts = self.scripts.lock().unwrap();
        let script = scripts.get(index).or_else(|| scripts.last()).cloned().unwrap_or_default();
        self.jobs.lock().unwrap().insert(
            name.clone(),
            FakeJob {
                script,
                deleted: false,
            },
        );

        Ok(AppliedResource {
            kind: "Job".to_string(),
            resource_name: name,
        })
    }

    async fn job_status(&self, name: &str, _namespace: &str) -> Result<JobStatus, EngineError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(name) else {
            return Ok(JobStatus::not_found());
        };

        let phase = if job.script.len() > 1 {
            job.script.remove(0)
        } else {
            job.script.first().copied().unwrap_or(JobPhase::NotFound)
        };

        Ok(JobStatus {
            phase,
            active_count: u32::from(phase == JobPhase::Running),
            succeeded_count: u32::from(phase == JobPhase::Succeeded),
            failed_count: u32::from(phase == JobPhase::Failed),
            started_at: None,
            completed_at: None,
        })
    }

    async fn delete_job(&self, name: &str, _namespace: &str) -> Result<bool, EngineError> {
        self.delete_count.fetch_add(1, Ordering::SeqCst);
        if let Some(job) = self.jobs.lock().unwrap().get_mut(name) {
            job.deleted = true;
        }
        Ok(true)
    }

    async fn list_jobs(&self, _: Option<&str>) -> Result<Vec<JobListing>, EngineError> {
        Ok(vec![])
    }
}
