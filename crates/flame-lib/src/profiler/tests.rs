//! Strategy tests against a scripted command runner
//!
//! Tool locations point into a temporary directory and every external
//! command is answered by [`ScriptedRunner`], so the full
//! setup/profile/render/publish sequence runs without the real tools.

use super::*;
use crate::error::CommandError;
use crate::events::Event;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::{Language, ProfilingJob, TargetRef};
use crate::publish::{EventPublisher, MemorySink};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;
use tokio_util::sync::CancellationToken;

const CONTAINER_ID: &str = "9c1e0b7a44f3";
const TARGET_PID: u32 = 4242;

/// Runner that records every invocation and answers from a script
#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    stdout: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl ScriptedRunner {
    fn answer(&self, program: &str, stdout: &str) {
        self.stdout
            .lock()
            .unwrap()
            .push((program.to_string(), stdout.to_string()));
    }

    fn fail(&self, program: &str) {
        self.failing.lock().unwrap().insert(program.to_string());
    }

    fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|spec| spec.program).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.clone());

        if self.failing.lock().unwrap().contains(&spec.program) {
            return Err(CommandError::Exit {
                program: spec.program.clone(),
                code: Some(1),
                stderr: "scripted failure".to_string(),
            });
        }

        let stdout = self
            .stdout
            .lock()
            .unwrap()
            .iter()
            .find(|(program, _)| program == &spec.program)
            .map(|(_, out)| out.clone())
            .unwrap_or_default();

        // Tools that write files produce something the next step can read
        if let Some(path) = &spec.stdout {
            std::fs::write(path, format!("output of {}\n", spec.program)).unwrap();
            return Ok(CommandOutput::default());
        }
        if let Some(pos) = spec.args.iter().position(|a| a == "-f" || a == "-o" || a == "--file") {
            if let Some(path) = spec.args.get(pos + 1) {
                if path.ends_with(".svg") {
                    std::fs::write(path, "<svg/>").unwrap();
                }
            }
        }

        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

struct Harness {
    temp_dir: TempDir,
    runner: Arc<ScriptedRunner>,
    sink: MemorySink,
    table: ProfilerTable,
    paths: ToolPaths,
}

impl Harness {
    async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let paths = ToolPaths {
            kernel_sources_dir: root.join("staging/kernel-source/"),
            modules_root: root.join("lib/modules"),
            bcc_profiler: root.join("app/bcc-profiler/profile"),
            raw_output: root.join("raw_profile.txt"),
            flamegraph_script: root.join("app/FlameGraph/flamegraph.pl"),
            stackcollapse_perf: root.join("app/FlameGraph/stackcollapse-perf.pl"),
            flamegraph_output: root.join("flamegraph.svg"),
            async_profiler: root.join("app/async-profiler/profiler.sh"),
            py_spy: root.join("app/py-spy"),
            rbspy: root.join("app/rbspy"),
            perf: root.join("app/perf"),
            perf_data: root.join("perf.data"),
            perf_script_output: root.join("perf.out"),
            proc_root: root.join("proc"),
        };

        let pid_dir = paths.proc_root.join(TARGET_PID.to_string());
        fs::create_dir_all(&pid_dir).await.unwrap();
        fs::write(pid_dir.join("comm"), "server\n").await.unwrap();
        fs::write(
            pid_dir.join("cgroup"),
            format!("0::/kubepods/burstable/pod1234/{CONTAINER_ID}\n"),
        )
        .await
        .unwrap();

        let runner = Arc::new(ScriptedRunner::default());
        let sink = MemorySink::new();
        let publisher = Arc::new(EventPublisher::new(Arc::new(sink.clone())));
        let ctx = Arc::new(ProfilerContext::new(
            runner.clone(),
            publisher,
            paths.clone(),
        ));

        Self {
            temp_dir,
            runner,
            sink,
            table: ProfilerTable::new(ctx),
            paths,
        }
    }

    fn program(&self, path: &std::path::Path) -> String {
        path.display().to_string()
    }

    fn published_artifact(&self) -> Option<Vec<u8>> {
        self.sink.lines().iter().find_map(|line| match Event::parse(line) {
            Ok(Event::Result(data)) => data.decode().ok(),
            _ => None,
        })
    }
}

fn job(language: Language) -> ProfilingJob {
    ProfilingJob {
        id: "7f3e".to_string(),
        language,
        target: TargetRef {
            pod_name: "checkout-7d9f".to_string(),
            pod_uid: "pod1234".to_string(),
            container_name: "server".to_string(),
            container_id: format!("containerd://{CONTAINER_ID}"),
            process_name: None,
        },
        namespace: "shop".to_string(),
        duration: Duration::from_secs(30),
    }
}

mod table_tests {
    use super::*;

    #[tokio::test]
    async fn test_every_supported_language_resolves() {
        let harness = Harness::new().await;
        for language in Language::ALL {
            assert!(harness.table.resolve(language.as_str()).is_ok());
        }
    }

    #[tokio::test]
    async fn test_java_resolves_to_jvm_profiler() {
        let harness = Harness::new().await;
        let profiler = harness.table.resolve("Java").unwrap();
        assert_eq!(profiler.name(), "jvm");

        // No discovery or relocation happens for the JVM
        profiler
            .set_up(&job(Language::Java), &CancellationToken::new())
            .await
            .unwrap();
        assert!(harness.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_language_mapping() {
        let harness = Harness::new().await;
        let names: Vec<_> = ["go", "python", "ruby", "node"]
            .iter()
            .map(|lang| harness.table.resolve(lang).unwrap().name())
            .collect();
        assert_eq!(names, vec!["bpf", "python", "ruby", "perf"]);
    }

    #[tokio::test]
    async fn test_unsupported_language_is_named() {
        let harness = Harness::new().await;
        let err = harness.table.resolve("COBOL").err().unwrap();

        assert!(matches!(err, ProfilerError::UnsupportedLanguage(ref lang) if lang == "COBOL"));
        assert!(err.to_string().contains("COBOL"));
        assert_eq!(err.step(), "dispatch");
    }

    #[tokio::test]
    async fn test_resolution_reuses_stateless_instances() {
        let harness = Harness::new().await;
        let first = harness.table.resolve("go").unwrap();
        let second = harness.table.resolve("golang").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}

mod bpf_tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_relocates_sources_to_linked_headers() {
        let harness = Harness::new().await;
        harness.runner.answer("uname", "5.4.0-generic\n");

        let headers = harness
            .temp_dir
            .path()
            .join("usr/src/kernels/5.4.0-generic");
        let link_dir = harness.paths.modules_root.join("5.4.0-generic");
        fs::create_dir_all(&link_dir).await.unwrap();
        std::os::unix::fs::symlink(&headers, link_dir.join("build")).unwrap();

        let profiler = harness.table.resolve("go").unwrap();
        profiler
            .set_up(&job(Language::Go), &CancellationToken::new())
            .await
            .unwrap();

        let calls = harness.runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program, "uname");
        assert_eq!(calls[0].args, vec!["-r"]);
        assert_eq!(calls[1].program, "mv");
        assert_eq!(
            calls[1].args,
            vec![
                harness.paths.kernel_sources_dir.display().to_string(),
                headers.display().to_string(),
            ]
        );
        // Intermediate directories exist for the move to land in
        assert!(headers.parent().unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_setup_fails_discovery_without_headers_link() {
        let harness = Harness::new().await;
        harness.runner.answer("uname", "6.1.0-cloud\n");

        let err = harness
            .table
            .resolve("go")
            .unwrap()
            .set_up(&job(Language::Go), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProfilerError::EnvironmentDiscovery { what: "kernel headers link", .. }
        ));
        assert_eq!(harness.runner.programs(), vec!["uname"]);
    }

    #[tokio::test]
    async fn test_setup_fails_discovery_when_uname_fails() {
        let harness = Harness::new().await;
        harness.runner.fail("uname");

        let err = harness
            .table
            .resolve("go")
            .unwrap()
            .set_up(&job(Language::Go), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.step(), "environment_discovery");
    }

    #[tokio::test]
    async fn test_setup_failed_move_reports_destination() {
        let harness = Harness::new().await;
        harness.runner.answer("uname", "5.4.0-generic\n");
        harness.runner.fail("mv");

        let headers = harness.temp_dir.path().join("usr/src/kernels/5.4.0-generic");
        let link_dir = harness.paths.modules_root.join("5.4.0-generic");
        fs::create_dir_all(&link_dir).await.unwrap();
        std::os::unix::fs::symlink(&headers, link_dir.join("build")).unwrap();

        let err = harness
            .table
            .resolve("go")
            .unwrap()
            .set_up(&job(Language::Go), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ProfilerError::EnvironmentSetup { destination, .. } => assert_eq!(destination, headers),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_profiles_renders_and_publishes() {
        let harness = Harness::new().await;
        let profiler = harness.table.resolve("go").unwrap();

        profiler
            .invoke(&job(Language::Go), &CancellationToken::new())
            .await
            .unwrap();

        let calls = harness.runner.calls();
        assert_eq!(calls.len(), 2);

        let profile = &calls[0];
        assert_eq!(profile.program, harness.program(&harness.paths.bcc_profiler));
        assert_eq!(profile.args, vec!["-df", "-p", "4242", "30"]);
        assert_eq!(profile.stdout.as_ref(), Some(&harness.paths.raw_output));

        let render = &calls[1];
        assert_eq!(render.program, harness.program(&harness.paths.flamegraph_script));
        assert!(render.args.is_empty());
        assert_eq!(render.stdin.as_ref(), Some(&harness.paths.raw_output));
        assert_eq!(render.stdout.as_ref(), Some(&harness.paths.flamegraph_output));

        let artifact = harness.published_artifact().unwrap();
        assert!(String::from_utf8_lossy(&artifact).contains("flamegraph.pl"));
    }

    #[tokio::test]
    async fn test_invoke_profiler_failure_stops_pipeline() {
        let harness = Harness::new().await;
        harness
            .runner
            .fail(&harness.program(&harness.paths.bcc_profiler));

        let err = harness
            .table
            .resolve("go")
            .unwrap()
            .invoke(&job(Language::Go), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.step(), "profiling");
        assert_eq!(harness.runner.calls().len(), 1);
        assert!(harness.sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_render_failure_is_not_published() {
        let harness = Harness::new().await;
        harness
            .runner
            .fail(&harness.program(&harness.paths.flamegraph_script));

        let err = harness
            .table
            .resolve("go")
            .unwrap()
            .invoke(&job(Language::Go), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProfilerError::Render { .. }));
        assert!(harness.published_artifact().is_none());
    }

    #[tokio::test]
    async fn test_invoke_without_target_process() {
        let harness = Harness::new().await;
        let mut missing = job(Language::Go);
        missing.target.container_id = "docker://ffffffff".to_string();

        let err = harness
            .table
            .resolve("go")
            .unwrap()
            .invoke(&missing, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProfilerError::TargetNotFound { .. }));
        assert!(harness.runner.calls().is_empty());
    }
}

mod runtime_profiler_tests {
    use super::*;

    #[tokio::test]
    async fn test_jvm_invocation_shape() {
        let harness = Harness::new().await;
        harness
            .table
            .resolve("java")
            .unwrap()
            .invoke(&job(Language::Java), &CancellationToken::new())
            .await
            .unwrap();

        let calls = harness.runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].args,
            vec![
                "-d".to_string(),
                "30".to_string(),
                "-f".to_string(),
                harness.paths.flamegraph_output.display().to_string(),
                "-e".to_string(),
                "cpu".to_string(),
                "4242".to_string(),
            ]
        );
        assert_eq!(harness.published_artifact().unwrap(), b"<svg/>");
    }

    #[tokio::test]
    async fn test_python_invocation_shape() {
        let harness = Harness::new().await;
        harness
            .table
            .resolve("python")
            .unwrap()
            .invoke(&job(Language::Python), &CancellationToken::new())
            .await
            .unwrap();

        let calls = harness.runner.calls();
        assert_eq!(calls[0].program, harness.program(&harness.paths.py_spy));
        assert_eq!(&calls[0].args[..3], &["record", "-p", "4242"]);
        assert!(calls[0].args.ends_with(&["-s".to_string(), "-t".to_string()]));
        assert!(harness.published_artifact().is_some());
    }

    #[tokio::test]
    async fn test_ruby_invocation_shape() {
        let harness = Harness::new().await;
        harness
            .table
            .resolve("ruby")
            .unwrap()
            .invoke(&job(Language::Ruby), &CancellationToken::new())
            .await
            .unwrap();

        let calls = harness.runner.calls();
        assert_eq!(calls[0].program, harness.program(&harness.paths.rbspy));
        assert!(calls[0].args.contains(&"--duration".to_string()));
        assert!(harness.published_artifact().is_some());
    }

    #[tokio::test]
    async fn test_perf_pipeline_order() {
        let harness = Harness::new().await;
        harness
            .table
            .resolve("node")
            .unwrap()
            .invoke(&job(Language::Node), &CancellationToken::new())
            .await
            .unwrap();

        let programs = harness.runner.programs();
        assert_eq!(
            programs,
            vec![
                harness.program(&harness.paths.perf),
                harness.program(&harness.paths.perf),
                harness.program(&harness.paths.stackcollapse_perf),
                harness.program(&harness.paths.flamegraph_script),
            ]
        );

        let calls = harness.runner.calls();
        assert_eq!(calls[0].args.last().unwrap(), "30");
        assert_eq!(calls[2].stdin.as_ref(), Some(&harness.paths.perf_script_output));
        assert!(harness.published_artifact().is_some());
    }

    #[tokio::test]
    async fn test_stack_collapse_failure_is_a_render_error() {
        let harness = Harness::new().await;
        harness
            .runner
            .fail(&harness.program(&harness.paths.stackcollapse_perf));

        let err = harness
            .table
            .resolve("node")
            .unwrap()
            .invoke(&job(Language::Node), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.step(), "rendering");
    }
}
