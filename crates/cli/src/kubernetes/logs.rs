//! Attaching to the agent's output

use super::pod::ExecutionUnit;
use super::{ClusterApi, ClusterError, AGENT_CONTAINER_NAME};
use flame_lib::stream::{spawn_pipeline, CompletionSignal, EventHandler, DEFAULT_EVENT_CAPACITY};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Stream the agent container's log lines into `handler`
///
/// With `follow` the stream stays open until the container exits; without it
/// only the output written so far is delivered. Attach failures are returned
/// directly and no handler task is started.
pub async fn stream_logs<H>(
    cluster: &dyn ClusterApi,
    unit: &ExecutionUnit,
    handler: H,
    cancel: CancellationToken,
    follow: bool,
) -> Result<CompletionSignal, ClusterError>
where
    H: EventHandler,
{
    let source = cluster
        .pod_logs(&unit.namespace, &unit.name, AGENT_CONTAINER_NAME, follow)
        .await
        .map_err(|source| ClusterError::Attach {
            namespace: unit.namespace.clone(),
            name: unit.name.clone(),
            source,
        })?;

    debug!(pod = %unit.name, follow, "Attached to agent logs");
    Ok(spawn_pipeline(source, handler, cancel, DEFAULT_EVENT_CAPACITY))
}
