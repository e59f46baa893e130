//! Publication of agent events and the rendered artifact

use crate::error::{CommandError, ProfilerError};
use crate::events::{Event, ResultData};
use crate::models::ProfilingStage;
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Sink that hands a finished artifact back to the operator
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    async fn publish(&self, path: &Path) -> Result<(), ProfilerError>;
}

/// Destination for serialized event lines
pub trait EventSink: Send + Sync {
    fn write_line(&self, line: &str) -> std::io::Result<()>;
}

/// Writes events to the process's standard output
#[derive(Debug, Default, Clone)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(line.as_bytes())?;
        handle.flush()
    }
}

/// Collects event lines in memory
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl EventSink for MemorySink {
    fn write_line(&self, line: &str) -> std::io::Result<()> {
        self.lines
            .lock()
            .map_err(|_| std::io::Error::other("event sink poisoned"))?
            .push(line.to_string());
        Ok(())
    }
}

/// Emits agent events as JSON lines on a sink
#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn stdout() -> Self {
        Self::new(Arc::new(StdoutSink))
    }

    pub fn emit(&self, event: &Event) -> std::io::Result<()> {
        let line = event.to_line().map_err(std::io::Error::other)?;
        self.sink.write_line(&line)
    }

    pub fn progress(&self, stage: ProfilingStage) -> std::io::Result<()> {
        self.emit(&Event::progress(stage))
    }

    pub fn error(&self, err: &ProfilerError) -> std::io::Result<()> {
        self.emit(&Event::error(err.to_string(), Some(err.step())))
    }
}

#[async_trait]
impl ArtifactPublisher for EventPublisher {
    async fn publish(&self, path: &Path) -> Result<(), ProfilerError> {
        let to_publish_error = |source: std::io::Error| ProfilerError::Publish {
            path: path.to_path_buf(),
            source: CommandError::Io {
                path: path.to_path_buf(),
                source,
            },
        };

        let artifact = tokio::fs::read(path).await.map_err(to_publish_error)?;
        if artifact.is_empty() {
            return Err(to_publish_error(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "rendered artifact is empty",
            )));
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "flamegraph.svg".to_string());

        let data = ResultData::encode(file_name, &artifact).map_err(to_publish_error)?;
        self.emit(&Event::Result(data)).map_err(to_publish_error)?;

        info!(path = %path.display(), bytes = artifact.len(), "Published flame graph");
        Ok(())
    }
}
