//! Node.js profiling through `perf`
//!
//! Node must run with `--perf-basic-prof` for JIT frames to resolve.
//! The recorded samples go through `perf script`, the stack collapser
//! and finally `flamegraph.pl`.

use super::{Profiler, ProfilerContext};
use crate::error::ProfilerError;
use crate::exec::CommandSpec;
use crate::models::ProfilingJob;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SAMPLE_FREQUENCY_HZ: &str = "99";

pub struct PerfProfiler {
    ctx: Arc<ProfilerContext>,
}

impl PerfProfiler {
    pub fn new(ctx: Arc<ProfilerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Profiler for PerfProfiler {
    fn name(&self) -> &'static str {
        "perf"
    }

    async fn invoke(
        &self,
        job: &ProfilingJob,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        let paths = &self.ctx.paths;
        let pid = self.ctx.target_pid(job).await?;

        let record = CommandSpec::for_path(&paths.perf)
            .args(["record", "-F", SAMPLE_FREQUENCY_HZ, "-g", "-p"])
            .arg(pid.to_string())
            .arg("-o")
            .arg(paths.perf_data.display().to_string())
            .args(["--", "sleep"])
            .arg(job.duration_secs().to_string());
        self.ctx.run_profiler(record, cancel).await?;

        let script = CommandSpec::for_path(&paths.perf)
            .args(["script", "-i"])
            .arg(paths.perf_data.display().to_string())
            .stdout_to(&paths.perf_script_output);
        self.ctx.run_profiler(script, cancel).await?;

        let collapse = CommandSpec::for_path(&paths.stackcollapse_perf)
            .stdin_from(&paths.perf_script_output)
            .stdout_to(&paths.raw_output);
        self.ctx.run_renderer(collapse, cancel).await?;

        self.ctx.render_flamegraph(&paths.raw_output, cancel).await?;
        self.ctx.publish_flamegraph().await
    }
}
