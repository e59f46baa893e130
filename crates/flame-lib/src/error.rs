//! Error taxonomy for the profiling side of a job

use std::path::PathBuf;
use thiserror::Error;

/// Failure of an external process invocation
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String },
}

/// Failure of a profiling job, tagged by the step that failed
#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("environment discovery failed at {what}: {source}")]
    EnvironmentDiscovery {
        what: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("failed to relocate kernel sources to {}: {source}", destination.display())]
    EnvironmentSetup {
        destination: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("could not find a process for container {container_id}")]
    TargetNotFound { container_id: String },

    #[error("profiler execution failed: {source}")]
    ProfilerExecution {
        #[source]
        source: CommandError,
    },

    #[error("flame graph rendering failed: {source}")]
    Render {
        #[source]
        source: CommandError,
    },

    #[error("failed to publish {}: {source}", path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: CommandError,
    },

    #[error("could not find profiler for language {0}")]
    UnsupportedLanguage(String),
}

impl ProfilerError {
    /// Name of the job step that produced this error
    pub fn step(&self) -> &'static str {
        match self {
            ProfilerError::EnvironmentDiscovery { .. } => "environment_discovery",
            ProfilerError::EnvironmentSetup { .. } => "environment_setup",
            ProfilerError::TargetNotFound { .. } => "target_discovery",
            ProfilerError::ProfilerExecution { .. } => "profiling",
            ProfilerError::Render { .. } => "rendering",
            ProfilerError::Publish { .. } => "publishing",
            ProfilerError::UnsupportedLanguage(_) => "dispatch",
        }
    }
}

/// A log line that is not a well-formed agent event
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("line is not an agent event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("result payload could not be decoded: {0}")]
    Payload(String),
}
