//! CLI command implementations.

pub mod fleet;
pub mod run;

use anyhow::{Context, Result};
use shipyard_config::{SchedulerConfig, parse_scheduler_config};
use shipyard_core::build::{LOG_CALLBACK, STATUS_CALLBACK};
use shipyard_core::{Build, JobPayload};
use shipyard_scheduler::TimeoutReporter;

/// Load configuration from a KDL file, or from the environment when no path is given.
pub fn load_config(path: Option<&str>) -> Result<SchedulerConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            parse_scheduler_config(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))
        }
        None => SchedulerConfig::from_env().context("Failed to load config from environment"),
    }
}

pub async fn report_timeout(log_callback: &str, status_callback: &str) -> Result<()> {
    let mut build = Build::from_payload(JobPayload::default());
    build
        .container_environment
        .insert(LOG_CALLBACK.to_string(), log_callback.to_string());
    build
        .container_environment
        .insert(STATUS_CALLBACK.to_string(), status_callback.to_string());

    TimeoutReporter::new()
        .report_build_timeout(&build)
        .await
        .context("Failed to report build timeout")?;

    println!("Reported timeout to {} and {}", log_callback, status_callback);
    Ok(())
}
