//! Core data models shared by the controller and the in-cluster agent

use crate::error::ProfilerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Implementation language of the profiled process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Go,
    Python,
    Ruby,
    Node,
}

impl Language {
    /// Every supported language, in table order
    pub const ALL: [Language; 5] = [
        Language::Java,
        Language::Go,
        Language::Python,
        Language::Ruby,
        Language::Node,
    ];

    /// Lowercase name used on the wire and in job environment variables
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::Go => "go",
            Language::Python => "python",
            Language::Ruby => "ruby",
            Language::Node => "node",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ProfilerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "java" => Ok(Language::Java),
            "go" | "golang" => Ok(Language::Go),
            "python" => Ok(Language::Python),
            "ruby" => Ok(Language::Ruby),
            "node" | "nodejs" => Ok(Language::Node),
            _ => Err(ProfilerError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Reference to the workload being profiled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub pod_name: String,
    pub pod_uid: String,
    pub container_name: String,
    /// Runtime container id, possibly still carrying a `docker://` style prefix
    pub container_id: String,
    /// Optional process name filter when the container runs several processes
    pub process_name: Option<String>,
}

/// A single bounded profiling request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingJob {
    pub id: String,
    pub language: Language,
    pub target: TargetRef,
    pub namespace: String,
    pub duration: Duration,
}

impl ProfilingJob {
    /// Requested duration in whole seconds, never zero
    pub fn duration_secs(&self) -> u64 {
        self.duration.as_secs().max(1)
    }
}

/// Progress stages reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfilingStage {
    Started,
    Ended,
}
