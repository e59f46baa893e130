//! JVM profiling through async-profiler

use super::{Profiler, ProfilerContext};
use crate::error::ProfilerError;
use crate::exec::CommandSpec;
use crate::models::ProfilingJob;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sampled event; async-profiler renders the SVG itself
const PROFILED_EVENT: &str = "cpu";

pub struct JvmProfiler {
    ctx: Arc<ProfilerContext>,
}

impl JvmProfiler {
    pub fn new(ctx: Arc<ProfilerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Profiler for JvmProfiler {
    fn name(&self) -> &'static str {
        "jvm"
    }

    async fn invoke(
        &self,
        job: &ProfilingJob,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        let paths = &self.ctx.paths;
        let pid = self.ctx.target_pid(job).await?;

        let profile = CommandSpec::for_path(&paths.async_profiler)
            .arg("-d")
            .arg(job.duration_secs().to_string())
            .arg("-f")
            .arg(paths.flamegraph_output.display().to_string())
            .args(["-e", PROFILED_EVENT])
            .arg(pid.to_string());
        self.ctx.run_profiler(profile, cancel).await?;

        self.ctx.publish_flamegraph().await
    }
}
