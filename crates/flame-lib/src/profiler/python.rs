//! Python profiling through py-spy

use super::{Profiler, ProfilerContext};
use crate::error::ProfilerError;
use crate::exec::CommandSpec;
use crate::models::ProfilingJob;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct PythonProfiler {
    ctx: Arc<ProfilerContext>,
}

impl PythonProfiler {
    pub fn new(ctx: Arc<ProfilerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Profiler for PythonProfiler {
    fn name(&self) -> &'static str {
        "python"
    }

    async fn invoke(
        &self,
        job: &ProfilingJob,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        let paths = &self.ctx.paths;
        let pid = self.ctx.target_pid(job).await?;

        // -s includes subprocesses, -t adds thread ids to the stacks
        let profile = CommandSpec::for_path(&paths.py_spy)
            .args(["record", "-p"])
            .arg(pid.to_string())
            .arg("-o")
            .arg(paths.flamegraph_output.display().to_string())
            .arg("-d")
            .arg(job.duration_secs().to_string())
            .args(["-s", "-t"]);
        self.ctx.run_profiler(profile, cancel).await?;

        self.ctx.publish_flamegraph().await
    }
}
