//! Target process discovery
//!
//! Locates the host pid of the profiled workload by scanning `/proc` for
//! processes whose cgroup membership names the target container.

use crate::error::ProfilerError;
use crate::models::TargetRef;
use std::path::Path;
use tracing::{debug, warn};

/// Runtime prefixes Kubernetes puts in front of container ids
const RUNTIME_PREFIXES: &[&str] = &["docker://", "containerd://", "cri-o://"];

/// Name of the sandbox process every pod carries
const PAUSE_PROCESS: &str = "pause";

/// Strip the `<runtime>://` prefix from a container id
pub fn strip_runtime_prefix(container_id: &str) -> &str {
    RUNTIME_PREFIXES
        .iter()
        .find_map(|prefix| container_id.strip_prefix(prefix))
        .unwrap_or(container_id)
}

/// Find the lowest pid belonging to the target container
pub async fn find_process_id(proc_root: &Path, target: &TargetRef) -> Result<u32, ProfilerError> {
    let container_id = strip_runtime_prefix(&target.container_id);
    let not_found = || ProfilerError::TargetNotFound {
        container_id: container_id.to_string(),
    };

    if container_id.is_empty() {
        return Err(not_found());
    }

    let mut entries = tokio::fs::read_dir(proc_root).await.map_err(|_| not_found())?;
    let mut best: Option<u32> = None;

    while let Some(entry) = next_scanned(entries.next_entry().await, proc_root) {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };

        if best.is_some_and(|current| current <= pid) {
            continue;
        }

        let pid_dir = entry.path();
        // Processes may exit mid-scan; unreadable entries are skipped
        let Ok(cgroup) = tokio::fs::read_to_string(pid_dir.join("cgroup")).await else {
            continue;
        };
        if !cgroup.contains(container_id) {
            continue;
        }

        let comm = tokio::fs::read_to_string(pid_dir.join("comm"))
            .await
            .unwrap_or_default();
        let comm = comm.trim();

        if comm == PAUSE_PROCESS {
            continue;
        }
        if let Some(name) = &target.process_name {
            if comm != name {
                continue;
            }
        }

        debug!(pid, comm = %comm, "Matched target process");
        best = Some(pid);
    }

    best.ok_or_else(not_found)
}

/// Unwrap one `read_dir` step; a failed step ends the scan and is logged
fn next_scanned<T>(step: std::io::Result<Option<T>>, proc_root: &Path) -> Option<T> {
    step.unwrap_or_else(|e| {
        warn!(
            proc_root = %proc_root.display(),
            error = %e,
            "Process scan ended early"
        );
        None
    })
}
