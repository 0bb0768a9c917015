pub mod engine;
pub mod job;

pub use engine::{EngineMonitorParams, EngineWaitOutcome, wait_engine_ready};
pub use job::{JobMonitorParams, JobWaitOutcome, wait_job_complete};
