//! Kernel-level sampling through the BCC `profile` tool
//!
//! BCC compiles its probes against the running kernel, so setup moves the
//! kernel sources shipped in the image to wherever the host's
//! `/lib/modules/<version>/build` link expects them.

use super::{setup_io_error, Profiler, ProfilerContext};
use crate::error::{CommandError, ProfilerError};
use crate::exec::CommandSpec;
use crate::models::ProfilingJob;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct BpfProfiler {
    ctx: Arc<ProfilerContext>,
}

impl BpfProfiler {
    pub fn new(ctx: Arc<ProfilerContext>) -> Self {
        Self { ctx }
    }

    async fn kernel_version(&self, cancel: &CancellationToken) -> Result<String, ProfilerError> {
        let output = self
            .ctx
            .runner
            .run(&CommandSpec::new("uname").arg("-r"), cancel)
            .await
            .map_err(|source| ProfilerError::EnvironmentDiscovery {
                what: "kernel version",
                source,
            })?;

        Ok(output.stdout.trim_end_matches('\n').trim().to_string())
    }

    async fn expected_sources_location(
        &self,
        kernel_version: &str,
    ) -> Result<PathBuf, ProfilerError> {
        let link = self
            .ctx
            .paths
            .modules_root
            .join(kernel_version)
            .join("build");

        let target = tokio::fs::read_link(&link).await.map_err(|source| {
            ProfilerError::EnvironmentDiscovery {
                what: "kernel headers link",
                source: CommandError::Io {
                    path: link.clone(),
                    source,
                },
            }
        })?;

        if target.is_absolute() {
            return Ok(target);
        }

        Ok(link.parent().map(|dir| dir.join(&target)).unwrap_or(target))
    }

    async fn move_sources(
        &self,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| setup_io_error(destination, source))?;
        }

        let spec = CommandSpec::new("mv")
            .arg(self.ctx.paths.kernel_sources_dir.display().to_string())
            .arg(destination.display().to_string());

        self.ctx
            .runner
            .run(&spec, cancel)
            .await
            .map_err(|source| ProfilerError::EnvironmentSetup {
                destination: destination.to_path_buf(),
                source,
            })?;

        Ok(())
    }
}

#[async_trait]
impl Profiler for BpfProfiler {
    fn name(&self) -> &'static str {
        "bpf"
    }

    async fn set_up(
        &self,
        job: &ProfilingJob,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        let kernel_version = self.kernel_version(cancel).await?;
        let destination = self.expected_sources_location(&kernel_version).await?;

        info!(
            job_id = %job.id,
            kernel_version = %kernel_version,
            destination = %destination.display(),
            "Relocating kernel sources"
        );

        self.move_sources(&destination, cancel).await
    }

    async fn invoke(
        &self,
        job: &ProfilingJob,
        cancel: &CancellationToken,
    ) -> Result<(), ProfilerError> {
        let paths = &self.ctx.paths;
        let pid = self.ctx.target_pid(job).await?;

        let profile = CommandSpec::for_path(&paths.bcc_profiler)
            .args(["-df", "-p"])
            .arg(pid.to_string())
            .arg(job.duration_secs().to_string())
            .stdout_to(&paths.raw_output);
        self.ctx.run_profiler(profile, cancel).await?;

        self.ctx.render_flamegraph(&paths.raw_output, cancel).await?;
        self.ctx.publish_flamegraph().await
    }
}
