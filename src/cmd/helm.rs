use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use retry::OperationResult;
use retry::delay::Fixed;

use crate::cmd::command::{CommandError, CommandOutput, does_binary_exist, run_command};
use crate::cmd::structs::{HelmListItem, HelmStatusJson};
use crate::constants::KUBECONFIG;

const HELM_DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug, Clone)]
pub enum HelmError {
    #[error("A live release named `{0}` already exists")]
    ReleaseConflict(String),

    #[error("Helm command timed out: {0}")]
    Timeout(String),

    #[error("Cannot parse helm output: {0}")]
    InvalidOutput(String),

    #[error("Helm command failed: {0}")]
    CmdError(String),
}

/// Release phases as reported by `helm status`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReleasePhase {
    PendingInstall,
    PendingUpgrade,
    Deployed,
    Failed,
    Unknown,
}

impl ReleasePhase {
    fn from_helm_status(status: &str) -> ReleasePhase {
        match status {
            "deployed" => ReleasePhase::Deployed,
            "pending-install" => ReleasePhase::PendingInstall,
            "pending-upgrade" => ReleasePhase::PendingUpgrade,
            "failed" => ReleasePhase::Failed,
            _ => ReleasePhase::Unknown,
        }
    }
}

impl Display for ReleasePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReleasePhase::PendingInstall => "pending-install",
            ReleasePhase::PendingUpgrade => "pending-upgrade",
            ReleasePhase::Deployed => "deployed",
            ReleasePhase::Failed => "failed",
            ReleasePhase::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReleaseStatus {
    pub phase: ReleasePhase,
    pub description: String,
}

/// Thin wrapper around the helm binary. The install is intentionally issued
/// without `--wait`: readiness is monitored separately with failure budgets,
/// so every invocation here is short-lived and bounded by `command_timeout`.
#[derive(Clone)]
pub struct Helm {
    kubeconfig: Option<PathBuf>,
    common_envs: Vec<(String, String)>,
    command_timeout: Duration,
}

impl Helm {
    pub fn new<P: AsRef<Path>>(kubeconfig: Option<P>, common_envs: &[(&str, &str)]) -> Helm {
        if !does_binary_exist("helm") {
            warn!("helm binary not found in PATH, release operations will fail");
        }

        Helm {
            kubeconfig: kubeconfig.map(|p| p.as_ref().to_path_buf()),
            common_envs: common_envs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            command_timeout: HELM_DEFAULT_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Helm {
        self.command_timeout = timeout;
        self
    }

    fn envs(&self) -> Vec<(&str, &str)> {
        let mut envs = Vec::with_capacity(self.common_envs.len() + 1);
        if let Some(path) = &self.kubeconfig {
            envs.push((KUBECONFIG, path.to_str().unwrap_or_default()));
        }
        envs.extend(self.common_envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        envs
    }

    fn exec(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput, HelmError> {
        match run_command("helm", args, &self.envs(), self.command_timeout) {
            Ok(output) => Ok(output),
            Err(CommandError::Timeout(deadline)) => {
                Err(HelmError::Timeout(format!("helm {cmd} after {}s", deadline.as_secs())))
            }
            Err(CommandError::ExitStatusError { stderr, .. }) => Err(HelmError::CmdError(format!("helm {cmd}: {stderr}"))),
            Err(err) => Err(HelmError::CmdError(format!("helm {cmd}: {err}"))),
        }
    }

    /// Install a release from a values document. Fails with `ReleaseConflict`
    /// when a different live release already owns the name.
    pub fn install_release(
        &self,
        release_name: &str,
        chart_path: &Path,
        namespace: &str,
        values_text: &str,
    ) -> Result<(), HelmError> {
        let mut values_file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .map_err(|err| HelmError::CmdError(format!("cannot create values file: {err}")))?;
        values_file
            .write_all(values_text.as_bytes())
            .map_err(|err| HelmError::CmdError(format!("cannot write values file: {err}")))?;

        let chart = chart_path.to_str().unwrap_or_default();
        let values_path = values_file.path().to_str().unwrap_or_default().to_string();
        let args = vec![
            "install",
            release_name,
            chart,
            "--namespace",
            namespace,
            "--create-namespace",
            "--values",
            values_path.as_str(),
        ];

        info!("installing release {} in namespace {}", release_name, namespace);
        match self.exec("install", &args) {
            Ok(_) => Ok(()),
            Err(HelmError::CmdError(msg)) if msg.contains("cannot re-use a name that is still in use") => {
                Err(HelmError::ReleaseConflict(release_name.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Uninstall a release. Absence is a success, never an error.
    pub fn uninstall_release(&self, release_name: &str, namespace: &str) -> Result<bool, HelmError> {
        let args = vec!["uninstall", release_name, "--namespace", namespace];

        info!("uninstalling release {} from namespace {}", release_name, namespace);
        match self.exec("uninstall", &args) {
            Ok(_) => Ok(true),
            Err(HelmError::CmdError(msg)) if msg.contains("release: not found") => Ok(true),
            Err(err) => Err(err),
        }
    }

    pub fn release_status(&self, release_name: &str, namespace: &str) -> Result<ReleaseStatus, HelmError> {
        let args = vec!["status", release_name, "--namespace", namespace, "-o", "json"];

        // status reads hit the cluster API and deserve a couple of retries
        let ret = retry::retry(Fixed::from(Duration::from_secs(5)).take(2), || {
            match self.exec("status", &args) {
                Ok(output) => OperationResult::Ok(Some(output.stdout)),
                Err(HelmError::CmdError(msg)) if msg.contains("release: not found") => OperationResult::Ok(None),
                Err(err @ HelmError::Timeout(_)) => OperationResult::Err(err),
                Err(err) => OperationResult::Retry(err),
            }
        });

        let stdout = match ret {
            Ok(Some(stdout)) => stdout,
            Ok(None) => {
                return Ok(ReleaseStatus {
                    phase: ReleasePhase::Unknown,
                    description: format!("release `{release_name}` not found"),
                });
            }
            Err(retry::Error { error, .. }) => return Err(error),
        };

        let status: HelmStatusJson =
            serde_json::from_str(&stdout).map_err(|err| HelmError::InvalidOutput(err.to_string()))?;

        Ok(ReleaseStatus {
            phase: ReleasePhase::from_helm_status(&status.info.status),
            description: status.info.description,
        })
    }

    /// User-supplied values of a live release, used to compare the primary
    /// model of a conflicting release against the incoming campaign.
    pub fn get_values(&self, release_name: &str, namespace: &str) -> Result<Option<serde_json::Value>, HelmError> {
        let args = vec!["get", "values", release_name, "--namespace", namespace, "-o", "json"];

        let output = match self.exec("get values", &args) {
            Ok(output) => output,
            Err(HelmError::CmdError(msg)) if msg.contains("release: not found") => return Ok(None),
            Err(err) => return Err(err),
        };

        if output.stdout.trim().is_empty() || output.stdout.trim() == "null" {
            return Ok(Some(serde_json::Value::Null));
        }

        serde_json::from_str(&output.stdout)
            .map(Some)
            .map_err(|err| HelmError::InvalidOutput(err.to_string()))
    }

    pub fn list_releases(&self, namespace: Option<&str>) -> Result<Vec<HelmListItem>, HelmError> {
        let mut args = vec!["list", "-o", "json"];
        match namespace {
            Some(ns) => {
                args.push("--namespace");
                args.push(ns);
            }
            None => args.push("-A"),
        }

        let output = self.exec("list", &args)?;
        serde_json::from_str(&output.stdout).map_err(|err| HelmError::InvalidOutput(err.to_string()))
    }
}
