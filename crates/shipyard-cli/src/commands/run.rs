//! Scheduler run command.

use anyhow::{Context, Result, bail};
use shipyard_core::QueueSource;
use shipyard_platform::{CloudFoundryClient, UaaTokenClient};
use shipyard_scheduler::completion;
use shipyard_scheduler::{
    BuildScheduler, ContainerBuilderPool, JobQueueSource, PgJobQueue, TimeoutReporter,
    TimeoutWatcher,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::load_config;

/// Run the scheduler until Ctrl-C.
pub async fn run(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.queues.is_empty() {
        bail!("No queues configured; set DATABASE_URL or add a queue node");
    }
    let Some(callback_url) = config.scheduling.callback_url.clone() else {
        bail!("No completion callback URL; set BUILDER_CALLBACK_URL or scheduler.callback-url");
    };

    let tokens = Arc::new(UaaTokenClient::new(config.auth.clone()));
    let platform = Arc::new(CloudFoundryClient::new(&config.platform, tokens)?);
    let pool = Arc::new(
        ContainerBuilderPool::new(platform, config.max_builds()).with_callback_url(callback_url),
    );

    let worker_id = format!("shipyard-{}", std::process::id());
    let mut sources: Vec<Arc<dyn QueueSource>> = Vec::with_capacity(config.queues.len());
    for queue in &config.queues {
        let backend = PgJobQueue::connect(queue, worker_id.clone())
            .await
            .with_context(|| format!("Failed to connect queue {}", queue.name))?;
        sources.push(Arc::new(JobQueueSource::new(queue.name.clone(), backend)));
    }

    info!(
        queues = sources.len(),
        max_builds = pool.max_builds(),
        poll_interval = ?config.scheduling.poll_interval,
        "Starting scheduler"
    );

    let cancel = CancellationToken::new();

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.scheduling.listen_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind completion server on {}", addr))?;
    let server = tokio::spawn(completion::serve(listener, pool.clone(), cancel.clone()));

    let watcher = config.scheduling.build_timeout.map(|build_timeout| {
        TimeoutWatcher::new(
            pool.clone(),
            TimeoutReporter::new(),
            build_timeout,
            config.scheduling.timeout_check_interval,
        )
        .spawn(cancel.clone())
    });

    let scheduler = BuildScheduler::new(pool, sources, config.scheduling.poll_interval);
    scheduler.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    scheduler.stop().await;
    cancel.cancel();
    scheduler.wait().await;
    match server.await {
        Ok(Err(e)) => error!(error = %e, "Completion server failed"),
        Err(e) => error!(error = %e, "Completion server panicked"),
        Ok(Ok(())) => {}
    }
    if let Some(watcher) = watcher {
        if let Err(e) = watcher.await {
            error!(error = %e, "Timeout watcher panicked");
        }
    }

    Ok(())
}
