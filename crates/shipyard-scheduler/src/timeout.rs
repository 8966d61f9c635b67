//! Build timeout reporting.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use shipyard_core::build::{LOG_CALLBACK, STATUS_CALLBACK};
use shipyard_core::{Build, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pool::ContainerBuilderPool;

pub const TIMEOUT_MESSAGE: &str = "The build timed out";
pub const LOG_SOURCE: &str = "Build scheduler";

/// Build status reported to the status callback for a failed build.
const STATUS_FAILED: u8 = 1;

/// Notifies a build's callbacks that it timed out.
#[derive(Clone, Default)]
pub struct TimeoutReporter {
    client: reqwest::Client,
}

impl TimeoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post the timeout to the build's log and status callbacks.
    ///
    /// Both requests are sent; the first failure is returned.
    pub async fn report_build_timeout(&self, build: &Build) -> Result<()> {
        let log_url = build
            .log_callback()
            .ok_or(Error::MissingCallback(LOG_CALLBACK))?;
        let status_url = build
            .status_callback()
            .ok_or(Error::MissingCallback(STATUS_CALLBACK))?;

        let message = STANDARD.encode(TIMEOUT_MESSAGE);
        let log_body = json!({ "source": LOG_SOURCE, "output": message });
        let status_body = json!({ "status": STATUS_FAILED, "message": message });

        let (log, status) = tokio::join!(
            self.post(log_url, &log_body),
            self.post(status_url, &status_body)
        );
        log?;
        status?;

        info!(build_id = %build.build_id, "Reported build timeout");
        Ok(())
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::HttpStatus {
                code: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Periodically frees builds that ran past the timeout and reports them.
pub struct TimeoutWatcher {
    pool: Arc<ContainerBuilderPool>,
    reporter: TimeoutReporter,
    build_timeout: Duration,
    check_interval: Duration,
}

impl TimeoutWatcher {
    pub fn new(
        pool: Arc<ContainerBuilderPool>,
        reporter: TimeoutReporter,
        build_timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            pool,
            reporter,
            build_timeout,
            check_interval,
        }
    }

    /// Release and report every timed-out build. Returns how many were found.
    pub async fn check_once(&self) -> usize {
        let timed_out = self.pool.take_timed_out_builds(self.build_timeout).await;

        for build in &timed_out {
            warn!(build_id = %build.build_id, timeout = ?self.build_timeout, "Build timed out");
            if let Err(e) = self.reporter.report_build_timeout(build).await {
                warn!(build_id = %build.build_id, error = %e, "Failed to report build timeout");
            }
        }
        timed_out.len()
    }

    /// Run [`check_once`](Self::check_once) every interval until cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.check_interval) => {
                        self.check_once().await;
                    }
                }
            }
        })
    }
}
