//! Agent configuration
//!
//! The controller hands the job to the agent through `FLAME_*` environment
//! variables on the job's container. Tool locations default to the layout
//! of the agent image and can be overridden the same way
//! (e.g. `FLAME_FLAMEGRAPH_OUTPUT`).

use anyhow::{Context, Result};
use flame_lib::{ProfilerError, ProfilingJob, TargetRef, ToolPaths};
use serde::Deserialize;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Unique id of the profiling job
    pub job_id: String,

    /// Target language as requested by the operator
    pub language: String,

    /// Profiling duration in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    /// Namespace of the target pod
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub pod_name: String,

    #[serde(default)]
    pub pod_uid: String,

    #[serde(default)]
    pub container_name: String,

    /// Runtime id of the target container
    pub container_id: String,

    /// Only profile processes with this name
    #[serde(default)]
    pub process_name: Option<String>,

    #[serde(flatten)]
    pub paths: ToolPaths,
}

fn default_duration_secs() -> u64 {
    60
}

fn default_namespace() -> String {
    "default".to_string()
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("FLAME").try_parsing(true))
            .build()
            .context("Failed to read agent environment")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    /// Build the job this agent was started for
    pub fn to_job(&self) -> Result<ProfilingJob, ProfilerError> {
        Ok(ProfilingJob {
            id: self.job_id.clone(),
            language: self.language.parse()?,
            target: TargetRef {
                pod_name: self.pod_name.clone(),
                pod_uid: self.pod_uid.clone(),
                container_name: self.container_name.clone(),
                container_id: self.container_id.clone(),
                process_name: self.process_name.clone().filter(|name| !name.is_empty()),
            },
            namespace: self.namespace.clone(),
            duration: Duration::from_secs(self.duration_secs),
        })
    }
}
