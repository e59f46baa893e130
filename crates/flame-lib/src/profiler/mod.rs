//! Language-specific profiling strategies
//!
//! A [`ProfilerTable`] is built once per process from the closed set of
//! supported languages. Each strategy is stateless: everything it touches
//! (tool locations, the process runner, the artifact sink) lives in the
//! shared [`ProfilerContext`].

mod bpf;
mod jvm;
mod perf;
mod python;
mod ruby;

#[cfg(test)]
mod tests;

pub use bpf::BpfProfiler;
pub use jvm::JvmProfiler;
pub use perf::PerfProfiler;
pub use python::PythonProfiler;
pub use ruby::RubyProfiler;

use crate::error::{CommandError, ProfilerError};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::{Language, ProfilingJob};
use crate::process::find_process_id;
use crate::publish::ArtifactPublisher;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A profiling strategy for one language family
#[async_trait]
pub trait Profiler: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Prepare the local environment; most strategies need nothing
    async fn set_up(
        &self,
        _job: &ProfilingJob,
        _cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        Ok(())
    }

    /// Profile the target, render the flame graph and publish it
    async fn invoke(
        &self,
        job: &ProfilingJob,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError>;
}

/// Locations of the tools and scratch files baked into the agent image
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub kernel_sources_dir: PathBuf,
    pub modules_root: PathBuf,
    pub bcc_profiler: PathBuf,
    pub raw_output: PathBuf,
    pub flamegraph_script: PathBuf,
    pub stackcollapse_perf: PathBuf,
    pub flamegraph_output: PathBuf,
    pub async_profiler: PathBuf,
    pub py_spy: PathBuf,
    pub rbspy: PathBuf,
    pub perf: PathBuf,
    pub perf_data: PathBuf,
    pub perf_script_output: PathBuf,
    pub proc_root: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            kernel_sources_dir: PathBuf::from("/usr/src/kernel-source/"),
            modules_root: PathBuf::from("/lib/modules"),
            bcc_profiler: PathBuf::from("/app/bcc-profiler/profile"),
            raw_output: PathBuf::from("/tmp/raw_profile.txt"),
            flamegraph_script: PathBuf::from("/app/FlameGraph/flamegraph.pl"),
            stackcollapse_perf: PathBuf::from("/app/FlameGraph/stackcollapse-perf.pl"),
            flamegraph_output: PathBuf::from("/tmp/flamegraph.svg"),
            async_profiler: PathBuf::from("/app/async-profiler/profiler.sh"),
            py_spy: PathBuf::from("/app/py-spy"),
            rbspy: PathBuf::from("/app/rbspy"),
            perf: PathBuf::from("/app/perf"),
            perf_data: PathBuf::from("/tmp/perf.data"),
            perf_script_output: PathBuf::from("/tmp/perf.out"),
            proc_root: PathBuf::from("/proc"),
        }
    }
}

/// Everything a strategy needs to talk to the outside world
pub struct ProfilerContext {
    pub runner: Arc<dyn CommandRunner>,
    pub publisher: Arc<dyn ArtifactPublisher>,
    pub paths: ToolPaths,
}

impl ProfilerContext {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        publisher: Arc<dyn ArtifactPublisher>,
        paths: ToolPaths,
    ) -> Self {
        Self {
            runner,
            publisher,
            paths,
        }
    }

    /// Host pid of the profiled process
    pub async fn target_pid(&self, job: &ProfilingJob) -> Result<u32, ProfilerError> {
        let pid = find_process_id(&self.paths.proc_root, &job.target).await?;
        debug!(job_id = %job.id, pid, "Resolved target process");
        Ok(pid)
    }

    /// Run a profiling tool, mapping failures to the profiling step
    pub async fn run_profiler(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProfilerError> {
        self.runner
            .run(&spec, cancel)
            .await
            .map_err(|source| ProfilerError::ProfilerExecution { source })
    }

    /// Run a rendering tool, mapping failures to the rendering step
    pub async fn run_renderer(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        self.runner
            .run(&spec, cancel)
            .await
            .map(|_| ())
            .map_err(|source| ProfilerError::Render { source })
    }

    /// Pipe folded stacks through `flamegraph.pl` into the output file
    pub async fn render_flamegraph(
        &self,
        folded: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        let spec = CommandSpec::for_path(&self.paths.flamegraph_script)
            .stdin_from(folded)
            .stdout_to(&self.paths.flamegraph_output);
        self.run_renderer(spec, cancel).await
    }

    /// Hand the rendered flame graph to the publisher
    pub async fn publish_flamegraph(&self) -> Result<(), ProfilerError> {
        self.publisher.publish(&self.paths.flamegraph_output).await
    }
}

/// Strategy table keyed by language
pub struct ProfilerTable {
    profilers: HashMap<Language, Arc<dyn Profiler>>,
}

impl ProfilerTable {
    /// Build one instance per supported language
    pub fn new(ctx: Arc<ProfilerContext>) -> Self {
        let profilers = Language::ALL
            .iter()
            .map(|&language| (language, Self::build(language, ctx.clone())))
            .collect();

        Self { profilers }
    }

    fn build(language: Language, ctx: Arc<ProfilerContext>) -> Arc<dyn Profiler> {
        match language {
            Language::Java => Arc::new(JvmProfiler::new(ctx)),
            Language::Go => Arc::new(BpfProfiler::new(ctx)),
            Language::Python => Arc::new(PythonProfiler::new(ctx)),
            Language::Ruby => Arc::new(RubyProfiler::new(ctx)),
            Language::Node => Arc::new(PerfProfiler::new(ctx)),
        }
    }

    /// Resolve a profiler from a user-supplied language name
    pub fn resolve(&self, language: &str) -> Result<Arc<dyn Profiler>, ProfilerError> {
        let parsed: Language = language.parse()?;
        self.resolve_language(parsed)
    }

    pub fn resolve_language(
        &self,
        language: Language,
    ) -> Result<Arc<dyn Profiler>, ProfilerError> {
        self.profilers
            .get(&language)
            .cloned()
            .ok_or_else(|| ProfilerError::UnsupportedLanguage(language.to_string()))
    }
}

/// Map a filesystem failure during setup onto the setup step
pub(crate) fn setup_io_error(destination: &Path, source: std::io::Error) -> ProfilerError {
    ProfilerError::EnvironmentSetup {
        destination: destination.to_path_buf(),
        source: CommandError::Io {
            path: destination.to_path_buf(),
            source,
        },
    }
}
