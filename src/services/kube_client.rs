use std::path::Path;

use futures::AsyncBufReadExt;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service, ServiceAccount};
use kube::Api;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::config::{InClusterError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use serde::Deserialize;

use crate::cluster::{AppliedResource, DeletedResource, JobPhase, JobStatus, PodSummary, WorkloadSummary};
use crate::errors::EngineError;
use crate::kubers_utils::{kube_delete_all_from_selector, kube_get_resources_by_selector};

pub const SUPPORTED_MANIFEST_KINDS: [&str; 5] = ["Job", "Deployment", "Service", "ConfigMap", "Secret"];

/// Label put on every pod of a helm release by the chart conventions.
pub fn release_pod_selector(release_name: &str) -> String {
    format!("app.kubernetes.io/instance={release_name}")
}

#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    pub async fn new(kubeconfig_path: Option<&Path>) -> Result<KubeClient, EngineError> {
        let client = match kubeconfig_path {
            Some(path) => create_kube_client(path).await,
            None => create_kube_client_in_cluster().await,
        }
        .map_err(|err| EngineError::new_k8s_error("connect to", "kubernetes cluster", err))?;

        Ok(KubeClient { client })
    }

    pub fn from_client(client: kube::Client) -> KubeClient {
        KubeClient { client }
    }

    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }

    /// Apply all documents of a manifest text. Documents without a namespace
    /// get the provided one. Any kind outside the supported set rejects the
    /// whole manifest before anything is created.
    pub async fn apply_manifest(&self, manifest_text: &str, namespace: &str) -> Result<AppliedResource, EngineError> {
        let documents = parse_manifest_documents(manifest_text)?;
        if documents.is_empty() {
            return Err(EngineError::new_invalid_campaign("Manifest contains no document"));
        }

        for doc in &documents {
            let kind = document_kind(doc);
            if !SUPPORTED_MANIFEST_KINDS.contains(&kind.as_str()) {
                return Err(EngineError::new_unsupported_manifest_kind(&kind));
            }
        }

        let mut applied: Vec<AppliedResource> = Vec::with_capacity(documents.len());
        for mut doc in documents {
            inject_namespace(&mut doc, namespace);
            let kind = document_kind(&doc);
            let name = document_name(&doc);
            let ns = document_namespace(&doc).unwrap_or_else(|| namespace.to_string());

            match kind.as_str() {
                "Job" => self.create_from_document::<Job>(doc, &ns).await?,
                "Deployment" => self.create_from_document::<Deployment>(doc, &ns).await?,
                "Service" => self.create_from_document::<Service>(doc, &ns).await?,
                "ConfigMap" => self.create_from_document::<ConfigMap>(doc, &ns).await?,
                "Secret" => self.create_from_document::<Secret>(doc, &ns).await?,
                other => return Err(EngineError::new_unsupported_manifest_kind(other)),
            }

            info!("applied {} `{}` in namespace {}", kind, name, ns);
            applied.push(AppliedResource {
                kind,
                resource_name: name,
            });
        }

        // The first document is the main resource of the manifest
        Ok(applied.remove(0))
    }

    async fn create_from_document<K>(&self, doc: serde_yaml::Value, namespace: &str) -> Result<(), EngineError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + serde::de::DeserializeOwned
            + serde::Serialize,
        <K as kube::Resource>::DynamicType: Default,
    {
        let name = document_name(&doc);
        let resource: K = serde_yaml::from_value(doc)
            .map_err(|err| EngineError::new_invalid_campaign(format!("Invalid manifest document: {err}")))?;

        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), &resource)
            .await
            .map_err(|err| EngineError::new_k8s_error("create", &format!("{namespace}/{name}"), err))?;

        Ok(())
    }

    /// Delete every resource named by the manifest. Not-found is a success.
    pub async fn delete_manifest(
        &self,
        manifest_text: &str,
        namespace: &str,
    ) -> Result<Vec<DeletedResource>, EngineError> {
        let documents = parse_manifest_documents(manifest_text)?;
        let mut deleted = Vec::with_capacity(documents.len());

        for doc in documents {
            let kind = document_kind(&doc);
            let name = document_name(&doc);
            let ns = document_namespace(&doc).unwrap_or_else(|| namespace.to_string());

            let outcome = match kind.as_str() {
                "Job" => self.delete_resource::<Job>(&name, &ns, DeleteParams::background()).await,
                "Deployment" => self.delete_resource::<Deployment>(&name, &ns, DeleteParams::background()).await,
                "Service" => self.delete_resource::<Service>(&name, &ns, DeleteParams::default()).await,
                "ConfigMap" => self.delete_resource::<ConfigMap>(&name, &ns, DeleteParams::default()).await,
                "Secret" => self.delete_resource::<Secret>(&name, &ns, DeleteParams::default()).await,
                other => return Err(EngineError::new_unsupported_manifest_kind(other)),
            };
            outcome?;

            deleted.push(DeletedResource {
                kind,
                name,
                namespace: ns,
            });
        }

        Ok(deleted)
    }

    async fn delete_resource<K>(&self, name: &str, namespace: &str, params: DeleteParams) -> Result<(), EngineError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + serde::de::DeserializeOwned,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(e) if is_error_code(&e, 404) => Ok(()),
            Err(e) => Err(EngineError::new_k8s_error("delete", &format!("{namespace}/{name}"), e)),
        }
    }

    /// Job phase from conditions first, then from the actual pod states.
    /// Around completion the job object can briefly disagree with its pods.
    pub async fn job_status(&self, name: &str, namespace: &str) -> Result<JobStatus, EngineError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let job = match api.get(name).await {
            Ok(job) => job,
            Err(e) if is_error_code(&e, 404) => return Ok(JobStatus::not_found()),
            Err(e) => return Err(EngineError::new_k8s_error("get job", &format!("{namespace}/{name}"), e)),
        };

        let status = job.status.unwrap_or_default();
        let active = status.active.unwrap_or(0).max(0) as u32;
        let succeeded = status.succeeded.unwrap_or(0).max(0) as u32;
        let failed = status.failed.unwrap_or(0).max(0) as u32;
        let started_at = status.start_time.as_ref().map(|t| t.0);
        let completed_at = status.completion_time.as_ref().map(|t| t.0);

        let mut phase = JobPhase::Pending;
        if let Some(conditions) = &status.conditions {
            for condition in conditions {
                if condition.status != "True" {
                    continue;
                }
                match condition.type_.as_str() {
                    "Complete" => phase = JobPhase::Succeeded,
                    "Failed" => phase = JobPhase::Failed,
                    _ => continue,
                }
                break;
            }
        }

        if phase == JobPhase::Pending {
            phase = self.job_phase_from_pods(name, namespace, active).await;
        }

        Ok(JobStatus {
            phase,
            active_count: active,
            succeeded_count: succeeded,
            failed_count: failed,
            started_at,
            completed_at,
        })
    }

    async fn job_phase_from_pods(&self, name: &str, namespace: &str, active: u32) -> JobPhase {
        let pods = match self.list_pods_for_job(name, namespace).await {
            Ok(pods) => pods,
            Err(err) => {
                warn!("could not check pod states for job {}/{}: {}", namespace, name, err);
                return if active > 0 { JobPhase::Running } else { JobPhase::Pending };
            }
        };

        if pods.is_empty() {
            return JobPhase::Pending;
        }

        let count = |wanted: &str| pods.iter().filter(|p| p.phase == wanted).count();
        let running = count("Running");
        let succeeded = count("Succeeded");
        let failed = count("Failed");
        let pending = pods.len() - running - succeeded - failed;

        if running > 0 {
            JobPhase::Running
        } else if succeeded > 0 && failed == 0 && pending == 0 {
            JobPhase::Succeeded
        } else if failed > 0 && succeeded == 0 && pending == 0 {
            JobPhase::Failed
        } else if failed > 0 {
            // Some pods failed but others may still recover
            JobPhase::Running
        } else {
            JobPhase::Pending
        }
    }

    pub async fn delete_job(&self, name: &str, namespace: &str) -> Result<bool, EngineError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(e) if is_error_code(&e, 404) => Ok(true),
            Err(e) => Err(EngineError::new_k8s_error("delete job", &format!("{namespace}/{name}"), e)),
        }
    }

    pub async fn list_pods_for_job(&self, name: &str, namespace: &str) -> Result<Vec<PodSummary>, EngineError> {
        let selector = format!("job-name={name}");
        let pods: kube::core::ObjectList<Pod> =
            kube_get_resources_by_selector(&self.client, namespace, &selector).await?;

        Ok(pods.items.into_iter().map(pod_summary).collect())
    }

    pub async fn list_jobs(&self, namespace: Option<&str>) -> Result<Vec<Job>, EngineError> {
        let api: Api<Job> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let jobs = api
            .list(&ListParams::default())
            .await
            .map_err(|err| EngineError::new_k8s_error("list", "jobs", err))?;
        Ok(jobs.items)
    }

    /// True iff at least one pod of the release exists, every pod is Running
    /// and every container reports ready.
    pub async fn pod_readiness(&self, release_name: &str, namespace: &str) -> Result<bool, EngineError> {
        let selector = release_pod_selector(release_name);
        let pods: kube::core::ObjectList<Pod> =
            kube_get_resources_by_selector(&self.client, namespace, &selector).await?;

        if pods.items.is_empty() {
            debug!("no pods found for release {}", release_name);
            return Ok(false);
        }

        for pod in pods.items {
            let summary = pod_summary(pod);
            if summary.phase != "Running" || !summary.ready {
                debug!("pod {} not ready (phase {})", summary.pod_name, summary.phase);
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// (desired, ready) replicas of the release's backing workload. The chart
    /// names its Deployment or StatefulSet after the release.
    pub async fn workload_readiness(
        &self,
        release_name: &str,
        namespace: &str,
    ) -> Result<Option<(u32, u32)>, EngineError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match deployments.get(release_name).await {
            Ok(deployment) => {
                let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0).max(0) as u32;
                let ready = deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0)
                    .max(0) as u32;
                return Ok(Some((desired, ready)));
            }
            Err(e) if is_error_code(&e, 404) => {}
            Err(e) => {
                return Err(EngineError::new_k8s_error(
                    "get deployment",
                    &format!("{namespace}/{release_name}"),
                    e,
                ));
            }
        }

        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        match statefulsets.get(release_name).await {
            Ok(statefulset) => {
                let desired = statefulset.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0).max(0) as u32;
                let ready = statefulset
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0)
                    .max(0) as u32;
                Ok(Some((desired, ready)))
            }
            Err(e) if is_error_code(&e, 404) => Ok(None),
            Err(e) => Err(EngineError::new_k8s_error(
                "get statefulset",
                &format!("{namespace}/{release_name}"),
                e,
            )),
        }
    }

    pub async fn list_workloads_by_label(
        &self,
        label: &str,
        namespace: &str,
    ) -> Result<Vec<WorkloadSummary>, EngineError> {
        let mut workloads = Vec::new();

        let deployments: kube::core::ObjectList<Deployment> =
            kube_get_resources_by_selector(&self.client, namespace, label).await?;
        for deployment in deployments.items {
            workloads.push(WorkloadSummary {
                name: deployment.metadata.name.clone().unwrap_or_default(),
                labels: deployment.metadata.labels.clone().unwrap_or_default(),
                replicas: deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0).max(0) as u32,
                ready_replicas: deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0)
                    .max(0) as u32,
            });
        }

        let statefulsets: kube::core::ObjectList<StatefulSet> =
            kube_get_resources_by_selector(&self.client, namespace, label).await?;
        for statefulset in statefulsets.items {
            workloads.push(WorkloadSummary {
                name: statefulset.metadata.name.clone().unwrap_or_default(),
                labels: statefulset.metadata.labels.clone().unwrap_or_default(),
                replicas: statefulset.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0).max(0) as u32,
                ready_replicas: statefulset
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0)
                    .max(0) as u32,
            });
        }

        Ok(workloads)
    }

    /// Hanging auxiliary objects a failed or conflicting install leaves
    /// behind: service accounts named after the release, and anything still
    /// carrying the release instance label.
    pub async fn delete_release_leftovers(&self, release_name: &str, namespace: &str) -> Result<(), EngineError> {
        let service_accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        for name in [release_name.to_string(), format!("{release_name}-sa")] {
            match service_accounts.delete(&name, &DeleteParams::default()).await {
                Ok(_) => info!("deleted service account {}/{}", namespace, name),
                Err(e) if is_error_code(&e, 404) => {}
                Err(e) => warn!("failed to delete service account {}/{}: {}", namespace, name, e),
            }
        }

        let selector = release_pod_selector(release_name);
        kube_delete_all_from_selector::<Deployment>(&self.client, &selector, namespace).await?;
        kube_delete_all_from_selector::<StatefulSet>(&self.client, &selector, namespace).await?;
        kube_delete_all_from_selector::<Service>(&self.client, &selector, namespace).await?;
        kube_delete_all_from_selector::<ConfigMap>(&self.client, &selector, namespace).await?;
        kube_delete_all_from_selector::<Pod>(&self.client, &selector, namespace).await?;

        Ok(())
    }

    /// Tail of every pod of a job, each line prefixed with its pod name.
    pub async fn job_logs(&self, name: &str, namespace: &str, tail_lines: i64) -> Result<Vec<String>, EngineError> {
        let pods = self.list_pods_for_job(name, namespace).await?;
        if pods.is_empty() {
            return Err(EngineError::new_invalid_campaign(format!(
                "No pods found for job `{name}` in namespace `{namespace}`"
            )));
        }

        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..Default::default()
        };

        let mut all_logs = Vec::new();
        for pod in pods {
            match api.logs(&pod.pod_name, &params).await {
                Ok(text) => {
                    all_logs.extend(
                        text.lines()
                            .filter(|line| !line.trim().is_empty())
                            .map(|line| format!("[{}] {}", pod.pod_name, line)),
                    );
                }
                Err(e) if is_error_code(&e, 400) => {
                    all_logs.push(format!("[{}] No logs available yet", pod.pod_name));
                }
                Err(e) => {
                    return Err(EngineError::new_k8s_error(
                        "get logs of",
                        &format!("{namespace}/{}", pod.pod_name),
                        e,
                    ));
                }
            }
        }

        Ok(all_logs)
    }

    pub async fn stream_pod_log(
        &self,
        pod_name: &str,
        namespace: &str,
        tail_lines: i64,
        follow: bool,
    ) -> Result<BoxStream<'static, String>, EngineError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            tail_lines: Some(tail_lines),
            follow,
            ..Default::default()
        };

        let reader = api
            .log_stream(pod_name, &params)
            .await
            .map_err(|err| EngineError::new_k8s_error("stream logs of", &format!("{namespace}/{pod_name}"), err))?;

        Ok(reader.lines().filter_map(|line| async { line.ok() }).boxed())
    }
}

async fn create_kube_client<P: AsRef<Path>>(kubeconfig_path: P) -> Result<kube::Client, kube::Error> {
    let to_err = |err: KubeconfigError| -> kube::Error {
        kube::Error::Service(Box::<dyn std::error::Error + Send + Sync>::from(err.to_string()))
    };

    let kubeconfig = Kubeconfig::read_from(kubeconfig_path).map_err(to_err)?;

    // build kube client: the kube config must have already the good context selected
    let kube_config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(to_err)?;
    let kube_client = kube::Client::try_from(kube_config)?;

    // Try to contact the api to verify we are correctly connected
    kube_client.apiserver_version().await?;
    Ok(kube_client)
}

async fn create_kube_client_in_cluster() -> Result<kube::Client, kube::Error> {
    let to_err = |err: InClusterError| -> kube::Error {
        kube::Error::Service(Box::<dyn std::error::Error + Send + Sync>::from(err.to_string()))
    };

    let kube_config = kube::Config::incluster().map_err(to_err)?;
    let kube_client = kube::Client::try_from(kube_config)?;

    kube_client.apiserver_version().await?;
    Ok(kube_client)
}

fn is_error_code(e: &kube::Error, http_code_number: u16) -> bool {
    matches!(e, kube::Error::Api(x) if x.code == http_code_number)
}

fn pod_summary(pod: Pod) -> PodSummary {
    let status = pod.status.unwrap_or_default();
    let containers: Vec<String> = status
        .container_statuses
        .as_ref()
        .map(|statuses| statuses.iter().map(|s| s.name.clone()).collect())
        .unwrap_or_default();
    let ready = status
        .container_statuses
        .as_ref()
        .map(|statuses| !statuses.is_empty() && statuses.iter().all(|s| s.ready))
        .unwrap_or(false);

    PodSummary {
        pod_name: pod.metadata.name.unwrap_or_default(),
        phase: status.phase.unwrap_or_default(),
        ready,
        containers,
    }
}

pub fn parse_manifest_documents(manifest_text: &str) -> Result<Vec<serde_yaml::Value>, EngineError> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest_text) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|err| EngineError::new_invalid_campaign(format!("Invalid YAML manifest: {err}")))?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

pub fn document_kind(doc: &serde_yaml::Value) -> String {
    doc.get("kind").and_then(|k| k.as_str()).unwrap_or_default().to_string()
}

pub fn document_name(doc: &serde_yaml::Value) -> String {
    doc.get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string()
}

pub fn document_namespace(doc: &serde_yaml::Value) -> Option<String> {
    doc.get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(|n| n.as_str())
        .map(|s| s.to_string())
}

fn inject_namespace(doc: &mut serde_yaml::Value, namespace: &str) {
    use serde_yaml::{Mapping, Value};

    let Some(mapping) = doc.as_mapping_mut() else {
        return;
    };
    let metadata = mapping
        .entry(Value::String("metadata".to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let Some(metadata) = metadata.as_mapping_mut() else {
        return;
    };
    metadata
        .entry(Value::String("namespace".to_string()))
        .or_insert_with(|| Value::String(namespace.to_string()));
}

/// The name of the first Job document of a manifest, used to re-identify a
/// job when the requested name and the manifest disagree.
pub fn job_name_from_manifest(manifest_text: &str) -> Option<String> {
    let documents = parse_manifest_documents(manifest_text).ok()?;
    documents
        .iter()
        .find(|doc| document_kind(doc) == "Job")
        .map(document_name)
        .filter(|name| !name.is_empty())
}
