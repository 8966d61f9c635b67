//! Fleet health check command.

use anyhow::{Context, Result};
use shipyard_platform::{CloudFoundryClient, UaaTokenClient};
use std::sync::Arc;

use super::load_config;

/// Print the fleet state as JSON. Returns whether the fleet is healthy.
pub async fn check(config_path: Option<&str>) -> Result<bool> {
    let config = load_config(config_path)?;

    let tokens = Arc::new(UaaTokenClient::new(config.auth.clone()));
    let client = CloudFoundryClient::new(&config.platform, tokens)?;

    let state = client
        .get_build_containers_state()
        .await
        .context("Failed to fetch build container state")?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(state.is_healthy())
}
