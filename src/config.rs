use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants;
use crate::executor::ExecutorConfig;
use crate::monitor::{EngineMonitorParams, JobMonitorParams};
use crate::scheduler::DEFAULT_POLL_INTERVAL;

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Environment knobs, all with sane defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub poll_interval: Duration,
    pub scheduler_auto_start: bool,
    pub engine_namespace: String,
    pub engine_chart_path: PathBuf,
    pub engine_monitor: EngineMonitorParams,
    pub job_monitor: JobMonitorParams,
    pub deployer_service_url: Option<String>,
    pub store_url: Option<String>,
    pub kubeconfig_path: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Settings {
        let engine_monitor = EngineMonitorParams {
            timeout: Duration::from_secs(env_u64(constants::ENGINE_TIMEOUT, 600)),
            max_failures: env_u32(constants::ENGINE_MAX_FAILURES, 3),
            retry_delay: Duration::from_secs(env_u64(constants::ENGINE_FAILURE_RETRY_DELAY, 30)),
            ..EngineMonitorParams::default()
        };
        let job_monitor = JobMonitorParams {
            timeout: Duration::from_secs(env_u64(constants::JOB_TIMEOUT, 3600)),
            max_failures: env_u32(constants::JOB_MAX_FAILURES, 3),
            retry_delay: Duration::from_secs(env_u64(constants::JOB_FAILURE_RETRY_DELAY, 60)),
            ..JobMonitorParams::default()
        };

        Settings {
            poll_interval: Duration::from_secs(env_u64(
                constants::QUEUE_SCHEDULER_POLL_INTERVAL,
                DEFAULT_POLL_INTERVAL.as_secs(),
            )),
            scheduler_auto_start: env_bool(constants::QUEUE_SCHEDULER_AUTO_START, true),
            engine_namespace: env_string(constants::ENGINE_NAMESPACE, "engines"),
            engine_chart_path: PathBuf::from(env_string(constants::ENGINE_CHART_PATH, "./charts/engine")),
            engine_monitor,
            job_monitor,
            deployer_service_url: env::var(constants::DEPLOYER_SERVICE_URL).ok(),
            store_url: env::var(constants::STORE_URL).ok(),
            kubeconfig_path: env::var(constants::KUBECONFIG).ok().map(PathBuf::from),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            engine_namespace: self.engine_namespace.clone(),
            chart_path: self.engine_chart_path.clone(),
            engine_monitor: self.engine_monitor,
            job_monitor: self.job_monitor,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            poll_interval: DEFAULT_POLL_INTERVAL,
            scheduler_auto_start: true,
            engine_namespace: "engines".to_string(),
            engine_chart_path: PathBuf::from("./charts/engine"),
            engine_monitor: EngineMonitorParams::default(),
            job_monitor: JobMonitorParams::default(),
            deployer_service_url: None,
            store_url: None,
            kubeconfig_path: None,
        }
    }
}
