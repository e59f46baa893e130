//! Ruby profiling through rbspy

use super::{Profiler, ProfilerContext};
use crate::error::ProfilerError;
use crate::exec::CommandSpec;
use crate::models::ProfilingJob;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct RubyProfiler {
    ctx: Arc<ProfilerContext>,
}

impl RubyProfiler {
    pub fn new(ctx: Arc<ProfilerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Profiler for RubyProfiler {
    fn name(&self) -> &'static str {
        "ruby"
    }

    async fn invoke(
        &self,
        job: &ProfilingJob,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        let paths = &self.ctx.paths;
        let pid = self.ctx.target_pid(job).await?;

        let profile = CommandSpec::for_path(&paths.rbspy)
            .args(["record", "--pid"])
            .arg(pid.to_string())
            .arg("--file")
            .arg(paths.flamegraph_output.display().to_string())
            .arg("--duration")
            .arg(job.duration_secs().to_string())
            .args(["--format", "flamegraph", "--silent"]);
        self.ctx.run_profiler(profile, cancel).await?;

        self.ctx.publish_flamegraph().await
    }
}
