pub const KUBECONFIG: &str = "KUBECONFIG";

pub const QUEUE_SCHEDULER_POLL_INTERVAL: &str = "QUEUE_SCHEDULER_POLL_INTERVAL";
pub const QUEUE_SCHEDULER_AUTO_START: &str = "QUEUE_SCHEDULER_AUTO_START";

pub const JOB_MAX_FAILURES: &str = "JOB_MAX_FAILURES";
pub const JOB_FAILURE_RETRY_DELAY: &str = "JOB_FAILURE_RETRY_DELAY";
pub const JOB_TIMEOUT: &str = "JOB_TIMEOUT";

pub const ENGINE_MAX_FAILURES: &str = "ENGINE_MAX_FAILURES";
pub const ENGINE_FAILURE_RETRY_DELAY: &str = "ENGINE_FAILURE_RETRY_DELAY";
pub const ENGINE_TIMEOUT: &str = "ENGINE_TIMEOUT";
pub const ENGINE_NAMESPACE: &str = "ENGINE_NAMESPACE";
pub const ENGINE_CHART_PATH: &str = "ENGINE_CHART_PATH";

pub const DEPLOYER_SERVICE_URL: &str = "DEPLOYER_SERVICE_URL";
pub const STORE_URL: &str = "STORE_URL";

pub const SERVER_HOST: &str = "SERVER_HOST";
pub const SERVER_PORT: &str = "SERVER_PORT";
