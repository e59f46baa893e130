//! The profiling command: launch the agent next to a pod and collect its flame graph

use crate::kubernetes::job::{build_job, job_name, JobSettings};
use crate::kubernetes::logs::stream_logs;
use crate::kubernetes::pod::resolve_container_id;
use crate::kubernetes::watch::{PodWatcher, StartOutcome, WaitPolicy};
use crate::kubernetes::ClusterApi;
use crate::output::{format_bytes, print_info, print_success, print_warning};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use flame_lib::events::{ErrorData, Event, ResultData};
use flame_lib::{EventHandler, Language, LogEvent, ProfilingJob, ProfilingStage, TargetRef};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Written when neither the operator nor the agent names the artifact
pub const DEFAULT_OUTPUT_FILE: &str = "flamegraph.svg";

/// One profiling request as given on the command line
#[derive(Debug, Clone)]
pub struct ProfileOptions {
    pub pod: String,
    pub namespace: String,
    /// Defaults to the first container of the pod
    pub container: Option<String>,
    pub language: String,
    pub duration: Duration,
    pub process_name: Option<String>,
    pub output: Option<PathBuf>,
    pub image: String,
    /// Defaults to the target's namespace
    pub job_namespace: Option<String>,
    pub wait: WaitPolicy,
}

/// What the agent reported over the course of a job
#[derive(Debug, Default)]
pub struct JobReport {
    pub started: bool,
    pub ended: bool,
    pub artifact: Option<PathBuf>,
    pub artifact_size: u64,
    pub error: Option<ErrorData>,
}

/// Interprets agent events from the job's log stream
pub struct ProfileEventHandler {
    report: Arc<Mutex<JobReport>>,
    output: Option<PathBuf>,
}

impl ProfileEventHandler {
    pub fn new(output: Option<PathBuf>) -> (Self, Arc<Mutex<JobReport>>) {
        let report = Arc::new(Mutex::new(JobReport::default()));
        (
            Self {
                report: report.clone(),
                output,
            },
            report,
        )
    }

    fn report(&self) -> std::sync::MutexGuard<'_, JobReport> {
        self.report.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn artifact_path(&self, data: &ResultData) -> PathBuf {
        if let Some(path) = &self.output {
            return path.clone();
        }
        Path::new(&data.file_name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE))
    }

    async fn save(&self, data: &ResultData) -> Result<()> {
        let artifact = data.decode().context("Failed to decode flame graph")?;
        let path = self.artifact_path(data);

        tokio::fs::write(&path, &artifact)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let mut report = self.report();
        report.artifact = Some(path);
        report.artifact_size = artifact.len() as u64;
        Ok(())
    }

    /// Apply one event; `Some(verdict)` once the stream is finished
    async fn apply(&self, event: Event) -> Option<bool> {
        match event {
            Event::Progress(progress) => match progress.stage {
                ProfilingStage::Started => {
                    self.report().started = true;
                    print_info("Profiling ...");
                    None
                }
                ProfilingStage::Ended => {
                    let mut report = self.report();
                    report.ended = true;
                    Some(report.error.is_none() && report.artifact.is_some())
                }
            },
            Event::Result(data) => match self.save(&data).await {
                Ok(()) => None,
                Err(e) => {
                    self.report().error = Some(ErrorData {
                        time: data.time,
                        reason: format!("{e:#}"),
                        step: Some("saving".to_string()),
                    });
                    Some(false)
                }
            },
            Event::Error(data) => {
                self.report().error = Some(data);
                Some(false)
            }
        }
    }
}

#[async_trait]
impl EventHandler for ProfileEventHandler {
    async fn handle(
        self,
        mut events: mpsc::Receiver<LogEvent>,
        done: oneshot::Sender<bool>,
        cancel: CancellationToken,
    ) {
        let verdict = loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break false,
                line = events.recv() => line,
            };

            // Stream closed without an end marker
            let Some(line) = line else {
                let report = self.report();
                break report.error.is_none() && report.artifact.is_some();
            };

            match Event::parse(&line.text()) {
                Ok(event) => {
                    if let Some(verdict) = self.apply(event).await {
                        break verdict;
                    }
                }
                Err(e) => debug!(line = %line.text().trim_end(), error = %e, "Ignoring agent output"),
            }
        };

        let _ = done.send(verdict);
    }
}

/// Run one profiling job against `cluster` and return the written artifact
pub async fn run(
    cluster: &dyn ClusterApi,
    options: &ProfileOptions,
    cancel: CancellationToken,
) -> Result<PathBuf> {
    let language: Language = options.language.parse()?;

    let watcher = PodWatcher::new(cluster, options.wait);
    let target = watcher.get_details(&options.pod, &options.namespace).await?;

    let container = options
        .container
        .clone()
        .or_else(|| target.container_names.first().cloned())
        .ok_or_else(|| anyhow!("pod {} has no containers", target.name))?;
    let container_id = resolve_container_id(&container, &target)?;
    let node_name = target
        .node_name
        .clone()
        .ok_or_else(|| anyhow!("pod {} is not scheduled on a node", target.name))?;

    let job = ProfilingJob {
        id: Uuid::new_v4().to_string(),
        language,
        target: TargetRef {
            pod_name: target.name.clone(),
            pod_uid: target.uid.clone(),
            container_name: container,
            container_id,
            process_name: options.process_name.clone(),
        },
        namespace: options.namespace.clone(),
        duration: options.duration,
    };
    let settings = JobSettings {
        image: options.image.clone(),
        node_name,
        namespace: options
            .job_namespace
            .clone()
            .unwrap_or_else(|| options.namespace.clone()),
    };

    info!(
        job_id = %job.id,
        language = %job.language,
        pod = %job.target.pod_name,
        container = %job.target.container_name,
        node = %settings.node_name,
        "Launching profiling job"
    );

    cluster
        .create_job(&settings.namespace, &build_job(&job, &settings))
        .await
        .context("Failed to create profiling job")?;

    let outcome = collect(cluster, &watcher, &job, &settings, options, cancel).await;

    let name = job_name(&job.id);
    if let Err(e) = cluster.delete_job(&settings.namespace, &name).await {
        warn!(job = %name, error = %e, "Failed to delete profiling job");
        print_warning(&format!("Could not delete job {name}, remove it manually"));
    }

    outcome
}

/// Wait for the agent and drain its events
async fn collect(
    cluster: &dyn ClusterApi,
    watcher: &PodWatcher<'_>,
    job: &ProfilingJob,
    settings: &JobSettings,
    options: &ProfileOptions,
    cancel: CancellationToken,
) -> Result<PathBuf> {
    print_info(&format!(
        "Waiting for profiler to start on node {}",
        settings.node_name
    ));
    let outcome = watcher
        .wait_for_start(&job.id, &settings.namespace, &cancel)
        .await?;
    let follow = matches!(outcome, StartOutcome::Running(_));

    let (handler, report) = ProfileEventHandler::new(options.output.clone());
    let signal = stream_logs(cluster, outcome.unit(), handler, cancel.clone(), follow).await?;
    if !signal.wait().await {
        debug!(job_id = %job.id, "Event stream ended without success");
    }

    let report = report.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(error) = &report.error {
        match &error.step {
            Some(step) => bail!("profiling failed during {step}: {}", error.reason),
            None => bail!("profiling failed: {}", error.reason),
        }
    }
    if cancel.is_cancelled() {
        bail!("profiling was interrupted");
    }

    match &report.artifact {
        Some(path) => {
            print_success(&format!(
                "Flame graph saved to {} ({})",
                path.display(),
                format_bytes(report.artifact_size)
            ));
            Ok(path.clone())
        }
        None if !follow => bail!("profiling job completed without result"),
        None if !report.started => bail!("profiling agent produced no events"),
        None if report.ended => bail!("profiler finished without producing a flame graph"),
        None => bail!("agent log stream closed before profiling ended"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::fake::{pod_with_phase, FakeCluster, ListAnswer};

    const SVG: &[u8] = b"<svg><g>main;work 42</g></svg>";

    fn options(output: PathBuf) -> ProfileOptions {
        ProfileOptions {
            pod: "checkout-7d9f".to_string(),
            namespace: "shop".to_string(),
            container: None,
            language: "go".to_string(),
            duration: Duration::from_secs(5),
            process_name: None,
            output: Some(output),
            image: "example.io/flame-agent:test".to_string(),
            job_namespace: None,
            wait: WaitPolicy::default(),
        }
    }

    fn agent_logs(events: &[Event]) -> Vec<u8> {
        let mut logs = b"agent booting\n".to_vec();
        for event in events {
            logs.extend_from_slice(event.to_line().unwrap().as_bytes());
        }
        logs
    }

    fn successful_run() -> Vec<u8> {
        agent_logs(&[
            Event::progress(ProfilingStage::Started),
            Event::Result(ResultData::encode("flamegraph.svg", SVG).unwrap()),
            Event::progress(ProfilingStage::Ended),
        ])
    }

    fn cluster(phase: &str, logs: &[u8]) -> FakeCluster {
        FakeCluster::new()
            .with_pod(pod_with_phase("checkout-7d9f", "shop", "Running"))
            .with_list_answers(vec![ListAnswer::Pods(vec![pod_with_phase(
                "kubectl-flame-job-x",
                "shop",
                phase,
            )])])
            .with_logs(logs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_writes_flamegraph() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.svg");
        let cluster = cluster("Running", &successful_run());

        let path = run(&cluster, &options(output.clone()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(path, output);
        assert_eq!(std::fs::read(&output).unwrap(), SVG);

        let created = cluster.created_jobs();
        assert_eq!(created.len(), 1);
        let name = created[0].metadata.name.clone().unwrap();
        assert_eq!(cluster.deleted_jobs(), vec![name]);
        assert_eq!(
            cluster.log_requests(),
            vec![(
                "kubectl-flame-job-x".to_string(),
                "kubectl-flame".to_string(),
                true
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_targets_default_container() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster("Running", &successful_run());

        run(
            &cluster,
            &options(dir.path().join("out.svg")),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let job = &cluster.created_jobs()[0];
        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.node_name.as_deref(), Some("node-a"));
        let env = pod.containers[0].env.as_ref().unwrap();
        let value = |key: &str| {
            env.iter()
                .find(|var| var.name == key)
                .and_then(|var| var.value.clone())
        };
        assert_eq!(value("FLAME_CONTAINER_NAME").as_deref(), Some("server"));
        assert_eq!(
            value("FLAME_CONTAINER_ID").as_deref(),
            Some("containerd://server-0001")
        );
        assert_eq!(value("FLAME_LANGUAGE").as_deref(), Some("go"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let logs = agent_logs(&[
            Event::progress(ProfilingStage::Started),
            Event::error(
                "could not find a process for container containerd://server-0001",
                Some("target_discovery"),
            ),
            Event::progress(ProfilingStage::Ended),
        ]);
        let cluster = cluster("Running", &logs);

        let err = run(
            &cluster,
            &options(dir.path().join("out.svg")),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("target_discovery"), "{message}");
        assert!(message.contains("could not find a process"), "{message}");
        assert_eq!(cluster.deleted_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_language_fails_before_cluster_access() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster("Running", &successful_run());
        let mut options = options(dir.path().join("out.svg"));
        options.language = "cobol".to_string();

        let err = run(&cluster, &options, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("cobol"));
        assert!(cluster.created_jobs().is_empty());
        assert_eq!(cluster.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_container() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster("Running", &successful_run());
        let mut options = options(dir.path().join("out.svg"));
        options.container = Some("debugger".to_string());

        let err = run(&cluster, &options, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("debugger"));
        assert!(cluster.created_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_pod_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = cluster("Failed", &successful_run());

        let err = run(
            &cluster,
            &options(dir.path().join("out.svg")),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("failed"));
        assert_eq!(cluster.deleted_jobs().len(), 1);
        assert!(cluster.log_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_pod_without_result() {
        let dir = tempfile::tempdir().unwrap();
        let logs = agent_logs(&[
            Event::progress(ProfilingStage::Started),
            Event::progress(ProfilingStage::Ended),
        ]);
        let cluster = cluster("Succeeded", &logs);

        let err = run(
            &cluster,
            &options(dir.path().join("out.svg")),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("completed without result"));
        assert!(!cluster.log_requests()[0].2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_pod_with_result_is_collected() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("late.svg");
        let cluster = cluster("Succeeded", &successful_run());

        run(&cluster, &options(output.clone()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(output).unwrap(), SVG);
    }

    #[tokio::test]
    async fn test_handler_uses_event_file_name_without_override() {
        let (handler, _report) = ProfileEventHandler::new(None);
        let data = ResultData::encode("/tmp/nested/flamegraph.svg", SVG).unwrap();
        assert_eq!(handler.artifact_path(&data), PathBuf::from("flamegraph.svg"));

        let data = ResultData::encode("", SVG).unwrap();
        assert_eq!(handler.artifact_path(&data), PathBuf::from(DEFAULT_OUTPUT_FILE));
    }

    #[tokio::test]
    async fn test_handler_stops_on_cancel() {
        let (handler, report) = ProfileEventHandler::new(None);
        let (_tx, rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        handler.handle(rx, done_tx, cancel).await;

        assert!(!done_rx.await.unwrap());
        assert!(!report.lock().unwrap().started);
    }
}
