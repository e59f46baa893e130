//! kubectl-flame agent
//!
//! Runs inside the ephemeral profiling job on the target's node. Its
//! standard output carries line-delimited JSON events back to the
//! controller; all logging therefore goes to stderr.

use anyhow::Result;
use flame_lib::{
    exec::TokioRunner,
    publish::EventPublisher,
    ProfilerContext, ProfilerError, ProfilerTable, ProfilingStage, StructuredLogger,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr; stdout is reserved for events
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting flame-agent");

    let config = config::AgentConfig::load()?;
    info!(job_id = %config.job_id, language = %config.language, "Agent configured");

    let publisher = EventPublisher::stdout();
    publisher.progress(ProfilingStage::Started)?;

    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    let outcome = run(&config, publisher.clone(), &cancel).await;

    if let Err(err) = &outcome {
        publisher.error(err)?;
    }
    publisher.progress(ProfilingStage::Ended)?;

    outcome.map_err(Into::into)
}

async fn run(
    config: &config::AgentConfig,
    publisher: EventPublisher,
    cancel: &CancellationToken,
) -> Result<(), ProfilerError> {
    let job = config.to_job()?;
    let logger = StructuredLogger::new(&job);

    let ctx = Arc::new(ProfilerContext::new(
        Arc::new(TokioRunner::new()),
        Arc::new(publisher),
        config.paths.clone(),
    ));
    let table = ProfilerTable::new(ctx);
    let profiler = table.resolve_language(job.language)?;

    logger.log_job_started(AGENT_VERSION, profiler.name(), &job);
    let started = Instant::now();

    let step = Instant::now();
    if let Err(err) = profiler.set_up(&job, cancel).await {
        logger.log_job_failed(&err);
        return Err(err);
    }
    logger.log_step_completed("set_up", step.elapsed());

    let step = Instant::now();
    if let Err(err) = profiler.invoke(&job, cancel).await {
        if cancel.is_cancelled() {
            logger.log_shutdown("termination signal received");
        }
        logger.log_job_failed(&err);
        return Err(err);
    }
    logger.log_step_completed("invoke", step.elapsed());

    logger.log_job_finished(started.elapsed());
    Ok(())
}

/// Cancel the job when the pod is asked to stop
async fn watch_signals(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    warn!("Termination requested, cancelling profiling job");
    cancel.cancel();
}
