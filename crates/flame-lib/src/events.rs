//! Line-delimited JSON events written by the agent and read by the controller
//!
//! The agent's standard output is the only channel back to the operator,
//! so progress, failures and the rendered artifact all travel as one JSON
//! object per line.

use crate::error::EventParseError;
use crate::models::ProfilingStage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Event emitted by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Event {
    Progress(ProgressData),
    Result(ResultData),
    Error(ErrorData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    pub time: DateTime<Utc>,
    pub stage: ProfilingStage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultData {
    pub time: DateTime<Utc>,
    pub file_name: String,
    /// Base64 of the gzip-compressed artifact
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub time: DateTime<Utc>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl Event {
    pub fn progress(stage: ProfilingStage) -> Self {
        Event::Progress(ProgressData {
            time: Utc::now(),
            stage,
        })
    }

    pub fn error(reason: impl Into<String>, step: Option<&str>) -> Self {
        Event::Error(ErrorData {
            time: Utc::now(),
            reason: reason.into(),
            step: step.map(str::to_string),
        })
    }

    /// Parse one log line, delimiter included
    pub fn parse(line: &str) -> Result<Self, EventParseError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }

    /// Serialize as a single newline-terminated line
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl ResultData {
    /// Compress and encode an artifact for transport
    pub fn encode(file_name: impl Into<String>, artifact: &[u8]) -> std::io::Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(artifact)?;
        let compressed = encoder.finish()?;

        Ok(Self {
            time: Utc::now(),
            file_name: file_name.into(),
            result: STANDARD.encode(compressed),
        })
    }

    /// Recover the original artifact bytes
    pub fn decode(&self) -> Result<Vec<u8>, EventParseError> {
        let compressed = STANDARD
            .decode(self.result.as_bytes())
            .map_err(|e| EventParseError::Payload(e.to_string()))?;

        let mut artifact = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut artifact)
            .map_err(|e| EventParseError::Payload(e.to_string()))?;

        Ok(artifact)
    }
}
