use std::fmt::{Display, Formatter};
use std::time::Duration;

use thiserror::Error;

use crate::cmd::helm::HelmError;

/// Tag: error taxonomy. Policies are decided on the tag, never on message text.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Tag {
    /// Cluster API 5xx, store reconnect, peer HTTP 5xx. Retried locally with bounded backoff.
    Transient,
    /// Invalid campaign or manifest. Fails the campaign immediately, nothing to clean up.
    Configuration,
    /// Release-name clash with a different configuration.
    ResourceConflict,
    /// Engine or job consumed max_failures.
    ReadinessExhausted,
    /// Readiness wall-clock exceeded.
    Timeout,
    /// User-initiated cancellation.
    Cancelled,
    /// Store kept failing after backoff; the scheduler backs off, campaigns are not failed.
    StoreUnavailable,
    /// Invariant violation. Log, abort the tick, do not mutate the campaign.
    Internal,
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Tag::Transient => "transient",
            Tag::Configuration => "configuration",
            Tag::ResourceConflict => "resource-conflict",
            Tag::ReadinessExhausted => "readiness-exhausted",
            Tag::Timeout => "timeout",
            Tag::Cancelled => "cancelled",
            Tag::StoreUnavailable => "store-unavailable",
            Tag::Internal => "internal",
        })
    }
}

/// EngineError: the only error type crossing component boundaries. Carries
/// enough context (resource, step, underlying cause) to be logged without
/// further lookup.
#[derive(Debug, Clone, Error)]
#[error("[{tag}] {message}")]
pub struct EngineError {
    tag: Tag,
    message: String,
    resource: Option<String>,
    step: Option<String>,
    underlying_error: Option<String>,
}

impl EngineError {
    fn new(tag: Tag, message: String) -> Self {
        EngineError {
            tag,
            message,
            resource: None,
            step: None,
            underlying_error: None,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    pub fn underlying_error(&self) -> Option<&str> {
        self.underlying_error.as_deref()
    }

    pub fn is_cancel(&self) -> bool {
        self.tag == Tag::Cancelled
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_underlying(mut self, err: impl ToString) -> Self {
        self.underlying_error = Some(err.to_string());
        self
    }

    /// One human line, the shape stored on a terminal campaign.
    pub fn user_message(&self) -> String {
        self.message.clone()
    }

    pub fn new_transient(message: impl Into<String>) -> Self {
        Self::new(Tag::Transient, message.into())
    }

    pub fn new_invalid_campaign(message: impl Into<String>) -> Self {
        Self::new(Tag::Configuration, message.into())
    }

    pub fn new_unsupported_manifest_kind(kind: &str) -> Self {
        Self::new(
            Tag::Configuration,
            format!("Unsupported manifest kind `{kind}`, supported kinds are Job, Deployment, Service, ConfigMap and Secret"),
        )
    }

    pub fn new_release_conflict(release_name: &str, namespace: &str) -> Self {
        Self::new(
            Tag::ResourceConflict,
            format!("A different live release named `{release_name}` already exists in namespace `{namespace}`"),
        )
        .with_resource(format!("{namespace}/{release_name}"))
    }

    pub fn new_readiness_exhausted(resource: &str, failures: u32, max_failures: u32) -> Self {
        Self::new(
            Tag::ReadinessExhausted,
            format!("`{resource}` failed {failures} times, exceeding maximum failures ({max_failures})"),
        )
        .with_resource(resource)
    }

    pub fn new_readiness_timeout(resource: &str, elapsed: Duration, timeout: Duration) -> Self {
        Self::new(
            Tag::Timeout,
            format!(
                "`{resource}` was not ready after {}s (timeout: {}s)",
                elapsed.as_secs(),
                timeout.as_secs()
            ),
        )
        .with_resource(resource)
    }

    pub fn new_task_cancellation_requested() -> Self {
        Self::new(Tag::Cancelled, "cancelled by user".to_string())
    }

    pub fn new_store_unavailable(operation: &str, underlying: impl ToString) -> Self {
        Self::new(
            Tag::StoreUnavailable,
            format!("Campaign store unavailable while executing `{operation}`"),
        )
        .with_underlying(underlying)
    }

    pub fn new_invalid_phase_transition(resource: &str, from: &str, to: &str) -> Self {
        Self::new(
            Tag::Internal,
            format!("Refusing non-monotonic phase transition {from} -> {to} for `{resource}`"),
        )
        .with_resource(resource)
    }

    pub fn new_internal(message: impl Into<String>) -> Self {
        Self::new(Tag::Internal, message.into())
    }

    pub fn new_k8s_error(what: &str, resource: &str, err: kube::Error) -> Self {
        let tag = match &err {
            kube::Error::Api(e) if e.code >= 500 => Tag::Transient,
            kube::Error::Api(_) => Tag::Internal,
            // connection-level trouble is worth retrying
            _ => Tag::Transient,
        };
        Self::new(tag, format!("Error while trying to {what} `{resource}`"))
            .with_resource(resource)
            .with_underlying(err)
    }

    pub fn new_helm_error(resource: &str, err: HelmError) -> Self {
        Self::new(Tag::Transient, format!("Helm error on `{resource}`"))
            .with_resource(resource)
            .with_underlying(err)
    }

    pub fn new_peer_http_error(what: &str, err: impl ToString) -> Self {
        Self::new(Tag::Transient, format!("Peer deployer error while trying to {what}")).with_underlying(err)
    }
}
