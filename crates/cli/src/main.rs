//! kubectl-flame
//!
//! Profiles a process running in a Kubernetes pod without restarting it.
//! A short-lived job is scheduled on the pod's node; the agent inside it
//! profiles the target and streams the flame graph back through its logs.

mod commands;
mod config;
mod kubernetes;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use commands::profile::{self, ProfileOptions};
use kubernetes::watch::WaitPolicy;
use kubernetes::KubeCluster;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Generate flame graphs for processes running in Kubernetes pods
#[derive(Parser)]
#[command(name = "kubectl-flame")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Name of the pod to profile
    pub pod: String,

    /// How long to profile for (e.g. 30s, 2m)
    #[arg(long, short = 't', default_value = "1m", value_parser = config::parse_duration)]
    pub time: Duration,

    /// Language of the target process (java, go, python, ruby, node)
    #[arg(long, short = 'l')]
    pub lang: String,

    /// Namespace of the target pod
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Container to profile (defaults to the pod's first container)
    #[arg(long, short)]
    pub container: Option<String>,

    /// Only profile processes with this name
    #[arg(long)]
    pub pgrep: Option<String>,

    /// Where to write the flame graph
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Agent image
    #[arg(long, env = "KUBECTL_FLAME_IMAGE")]
    pub image: Option<String>,

    /// Namespace to run the profiling job in (defaults to the pod's namespace)
    #[arg(long)]
    pub job_namespace: Option<String>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// How long to wait for the profiling pod to start
    #[arg(long, default_value = "5m", value_parser = config::parse_duration)]
    pub start_timeout: Duration,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = config::Config::load()?;
    let options = ProfileOptions {
        pod: cli.pod,
        namespace: cli.namespace.unwrap_or_else(|| settings.namespace()),
        container: cli.container,
        language: cli.lang,
        duration: cli.time,
        process_name: cli.pgrep,
        output: cli.file,
        image: cli.image.unwrap_or_else(|| settings.image()),
        job_namespace: cli.job_namespace.or(settings.job_namespace.clone()),
        wait: WaitPolicy {
            timeout: cli.start_timeout,
            ..WaitPolicy::default()
        },
    };
    debug!(image = %options.image, namespace = %options.namespace, "Resolved options");

    // Reject unknown languages before any cluster access
    let _: flame_lib::Language = options.language.parse()?;

    let client = kube_client(cli.kubeconfig.as_deref()).await?;
    let cluster = KubeCluster::new(client);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cleaning up profiling job");
            interrupt.cancel();
        }
    });

    profile::run(&cluster, &options, cancel).await?;
    Ok(())
}

async fn kube_client(kubeconfig: Option<&str>) -> Result<kube::Client> {
    let Some(path) = kubeconfig else {
        return kube::Client::try_default()
            .await
            .context("Failed to create Kubernetes client");
    };

    let path = config::kubeconfig_path(path)?;
    let kubeconfig = kube::config::Kubeconfig::read_from(&path)
        .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
    let client_config = kube::Config::from_custom_kubeconfig(
        kubeconfig,
        &kube::config::KubeConfigOptions::default(),
    )
    .await
    .context("Invalid kubeconfig")?;

    kube::Client::try_from(client_config).context("Failed to create Kubernetes client")
}
