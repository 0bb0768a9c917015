use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::io_models::benchmark::BenchmarkSpec;
use crate::io_models::engine::EngineSpec;

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Scheduling rank, lower runs first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }

    fn order(&self) -> u8 {
        match self {
            Phase::Pending => 0,
            Phase::Processing => 1,
            Phase::Completed | Phase::Failed | Phase::Cancelled => 2,
        }
    }

    /// Monotonic under pending < processing < terminal; the terminal set is
    /// absorbing. Writing the same phase again is allowed (idempotent upsert).
    pub fn can_transition_to(&self, next: Phase) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.order() > self.order()
    }
}

/// Terminal state of a submitted benchmark job.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JobTerminalState {
    Succeeded,
    Failed,
    TerminatedByTimeout,
    TerminatedByMaxFailures,
}

/// A benchmark job the campaign actually created. The cluster name can differ
/// from the requested one when the manifest carries its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    pub name: String,
    pub namespace: String,
    pub original_name: String,
    #[serde(default)]
    pub had_deployment_error: bool,
    #[serde(default)]
    pub terminal_state: Option<JobTerminalState>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReleaseState {
    Deploying,
    Running,
    Failed,
    Stopped,
    CleanedUp,
}

/// The controller's view of an installed engine release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRelease {
    pub release_name: String,
    pub namespace: String,
    pub phase: ReleaseState,
    pub values_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl EngineRelease {
    pub fn deploying(release_name: &str, namespace: &str, values_fingerprint: Option<String>) -> EngineRelease {
        let now = Utc::now();
        EngineRelease {
            release_name: release_name.to_string(),
            namespace: namespace.to_string(),
            phase: ReleaseState::Deploying,
            values_fingerprint,
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }
}

/// At most one per process: maps the fingerprint of the last installed values
/// document to the release it created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReuseRecord {
    pub values_fingerprint: String,
    pub values_text: String,
    pub release_name: String,
    pub namespace: String,
    pub campaign_id: Uuid,
}

/// Enqueue body of the submission surface.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CampaignRequest {
    #[serde(default)]
    pub engine: Option<EngineSpec>,
    #[serde(default)]
    pub skip_engine: bool,
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkSpec>,
    #[serde(default)]
    pub priority: Priority,
}

pub mod step {
    pub const ENGINE_DEPLOY: &str = "engine_deploy";
    pub const BENCHMARK_JOBS: &str = "benchmark_jobs";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const CANCELLED: &str = "cancelled";

    pub fn benchmark_running(index: usize) -> String {
        format!("benchmark_{}_running", index + 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    #[serde(default)]
    pub engine: Option<EngineSpec>,
    #[serde(default)]
    pub skip_engine: bool,
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkSpec>,
    pub priority: Priority,
    pub phase: Phase,
    pub current_step: String,
    #[serde(default)]
    pub completed_steps: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engine_release_id: Option<String>,
    #[serde(default)]
    pub created_jobs: Vec<JobRecord>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub cleanup_attempted: bool,
    #[serde(default)]
    pub cleanup_successful: bool,
}

impl Campaign {
    pub fn from_request(request: CampaignRequest) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            engine: request.engine,
            skip_engine: request.skip_engine,
            benchmarks: request.benchmarks,
            priority: request.priority,
            phase: Phase::Pending,
            current_step: "pending".to_string(),
            completed_steps: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            engine_release_id: None,
            created_jobs: Vec::new(),
            error_message: None,
            cleanup_attempted: false,
            cleanup_successful: false,
        }
    }

    /// One step for the engine provision unless skipped, plus one per benchmark.
    pub fn total_steps(&self) -> u32 {
        let engine_step = if self.skip_engine { 0 } else { 1 };
        engine_step + self.benchmarks.len() as u32
    }
}

/// Partial update applied through the store. `phase` is checked against the
/// monotonicity invariant at write time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignPatch {
    #[serde(default, alias = "status")]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub completed_steps: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engine_release_id: Option<String>,
    #[serde(default)]
    pub created_jobs: Option<Vec<JobRecord>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub cleanup_attempted: Option<bool>,
    #[serde(default)]
    pub cleanup_successful: Option<bool>,
}

impl CampaignPatch {
    pub fn phase(phase: Phase) -> CampaignPatch {
        CampaignPatch {
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, campaign: &mut Campaign) {
        if let Some(phase) = self.phase {
            campaign.phase = phase;
        }
        if let Some(step) = &self.current_step {
            campaign.current_step = step.clone();
        }
        if let Some(steps) = self.completed_steps {
            campaign.completed_steps = steps;
        }
        if let Some(at) = self.started_at {
            campaign.started_at.get_or_insert(at);
        }
        if let Some(at) = self.completed_at {
            campaign.completed_at.get_or_insert(at);
        }
        if let Some(release) = &self.engine_release_id {
            campaign.engine_release_id = Some(release.clone());
        }
        if let Some(jobs) = &self.created_jobs {
            campaign.created_jobs = jobs.clone();
        }
        if let Some(msg) = &self.error_message {
            campaign.error_message = Some(msg.clone());
        }
        if let Some(priority) = self.priority {
            campaign.priority = priority;
        }
        if let Some(attempted) = self.cleanup_attempted {
            campaign.cleanup_attempted = attempted;
        }
        if let Some(successful) = self.cleanup_successful {
            campaign.cleanup_successful = successful;
        }
    }
}

/// Aggregate counts by phase for the queue status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatusCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign_with(benchmarks: usize, skip_engine: bool) -> Campaign {
        let benchmarks = (0..benchmarks)
            .map(|i| BenchmarkSpec {
                manifest_text: "kind: Job".to_string(),
                namespace: "default".to_string(),
                name: Some(format!("bench-{i}")),
            })
            .collect();
        Campaign::from_request(CampaignRequest {
            engine: None,
            skip_engine,
            benchmarks,
            priority: Priority::Medium,
        })
    }

    #[test]
    fn priority_is_strictly_ordered() {
        assert!(Priority::Urgent.rank() < Priority::High.rank());
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
        assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"urgent\"");
    }

    #[test]
    fn phase_transitions_follow_the_dag() {
        assert!(Phase::Pending.can_transition_to(Phase::Processing));
        assert!(Phase::Pending.can_transition_to(Phase::Cancelled));
        assert!(Phase::Processing.can_transition_to(Phase::Completed));
        assert!(Phase::Processing.can_transition_to(Phase::Failed));
        assert!(Phase::Processing.can_transition_to(Phase::Cancelled));

        assert!(!Phase::Processing.can_transition_to(Phase::Pending));
        assert!(!Phase::Completed.can_transition_to(Phase::Processing));
        assert!(!Phase::Failed.can_transition_to(Phase::Cancelled));
        assert!(!Phase::Cancelled.can_transition_to(Phase::Completed));

        // re-asserting the current phase is a no-op, not a violation
        assert!(Phase::Completed.can_transition_to(Phase::Completed));
    }

    #[test]
    fn total_steps_counts_engine_provision_unless_skipped() {
        assert_eq!(campaign_with(3, false).total_steps(), 4);
        assert_eq!(campaign_with(3, true).total_steps(), 3);
        assert_eq!(campaign_with(0, false).total_steps(), 1);
        assert_eq!(campaign_with(0, true).total_steps(), 0);
    }

    #[test]
    fn patch_does_not_overwrite_first_timestamps() {
        let mut campaign = campaign_with(1, false);
        let first = Utc::now();
        CampaignPatch {
            started_at: Some(first),
            ..Default::default()
        }
        .apply_to(&mut campaign);

        let later = first + chrono::Duration::seconds(42);
        CampaignPatch {
            started_at: Some(later),
            ..Default::default()
        }
        .apply_to(&mut campaign);

        assert_eq!(campaign.started_at, Some(first));
    }

    #[test]
    fn external_status_patch_accepts_status_alias() {
        let patch: CampaignPatch = serde_json::from_str(r#"{"status": "processing"}"#).unwrap();
        assert_eq!(patch.phase, Some(Phase::Processing));
    }

    #[test]
    fn step_labels_are_one_based() {
        assert_eq!(step::benchmark_running(0), "benchmark_1_running");
        assert_eq!(step::benchmark_running(2), "benchmark_3_running");
    }
}
