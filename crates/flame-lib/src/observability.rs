//! Structured job logging
//!
//! Gives every significant point of a profiling job a consistent set of
//! fields (`event`, `job_id`, `language`) so a job can be followed in the
//! agent's JSON logs.

use crate::error::ProfilerError;
use crate::models::ProfilingJob;
use std::time::Duration;
use tracing::{error, info};

/// Structured logger bound to a single job
#[derive(Clone)]
pub struct StructuredLogger {
    job_id: String,
    language: String,
}

impl StructuredLogger {
    pub fn new(job: &ProfilingJob) -> Self {
        Self {
            job_id: job.id.clone(),
            language: job.language.to_string(),
        }
    }

    /// Log agent startup for this job
    pub fn log_job_started(&self, version: &str, profiler: &str, job: &ProfilingJob) {
        info!(
            event = "job_started",
            job_id = %self.job_id,
            language = %self.language,
            profiler = %profiler,
            agent_version = %version,
            pod = %job.target.pod_name,
            namespace = %job.namespace,
            container = %job.target.container_name,
            duration_secs = job.duration_secs(),
            "Profiling job started"
        );
    }

    /// Log a completed step and its wall time
    pub fn log_step_completed(&self, step: &str, elapsed: Duration) {
        info!(
            event = "step_completed",
            job_id = %self.job_id,
            language = %self.language,
            step = %step,
            elapsed_ms = elapsed.as_millis() as u64,
            "Profiling step completed"
        );
    }

    /// Log the terminal failure of the job
    pub fn log_job_failed(&self, err: &ProfilerError) {
        error!(
            event = "job_failed",
            job_id = %self.job_id,
            language = %self.language,
            step = %err.step(),
            error = %err,
            "Profiling job failed"
        );
    }

    /// Log successful completion of the job
    pub fn log_job_finished(&self, elapsed: Duration) {
        info!(
            event = "job_finished",
            job_id = %self.job_id,
            language = %self.language,
            elapsed_ms = elapsed.as_millis() as u64,
            "Profiling job finished"
        );
    }

    /// Log agent shutdown before the job completed
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            job_id = %self.job_id,
            reason = %reason,
            "Agent shutting down"
        );
    }
}
