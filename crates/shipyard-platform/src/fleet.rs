//! Fleet health aggregation.
//!
//! The checks run in a fixed order and the first failing one wins:
//! 1. fewer containers than expected
//! 2. not all containers STARTED
//! 3. unhealthy instances in any started container

use futures::future::join_all;
use shipyard_core::{BuildContainer, ContainerPlatform, FleetState, InstanceStateCount, Result};
use tracing::warn;

/// Error text for a container's instance states, if they are unhealthy.
pub fn instance_error(name: &str, counts: &InstanceStateCount) -> Option<String> {
    if counts.has_failed_instances() {
        Some(format!("{}: not all instances are running. {}", name, counts))
    } else if counts.is_empty() {
        Some(format!("{} has 0 running instances", name))
    } else {
        None
    }
}

/// Check fleet size and lifecycle state, returning the started containers.
pub fn check_fleet(
    expected: usize,
    containers: &[BuildContainer],
) -> std::result::Result<Vec<&BuildContainer>, String> {
    let found = containers.len();
    if found < expected {
        return Err(format!(
            "Expected {} build containers but only {} found.",
            expected, found
        ));
    }

    let started: Vec<_> = containers.iter().filter(|c| c.is_started()).collect();
    if started.len() != expected {
        return Err("Not all build containers are in the STARTED state.".to_string());
    }

    Ok(started)
}

/// Fetch instance states for every container concurrently and collect errors.
///
/// All requests are awaited before any failure is returned.
pub async fn fetch_all_app_instance_errors<P>(
    platform: &P,
    containers: &[BuildContainer],
) -> Result<Vec<String>>
where
    P: ContainerPlatform + ?Sized,
{
    let results = join_all(containers.iter().map(|container| async move {
        platform
            .fetch_app_instance_states(container)
            .await
            .map(|counts| (container, counts))
    }))
    .await;

    let mut errors = Vec::new();
    for result in results {
        let (container, counts) = result?;
        if let Some(error) = instance_error(&container.name, &counts) {
            errors.push(error);
        }
    }
    Ok(errors)
}

/// Reconcile the current fleet against `expected` containers.
///
/// Fleet problems are reported as [`FleetState::Unhealthy`]; only platform
/// API failures are returned as errors.
pub async fn build_containers_state<P>(platform: &P, expected: usize) -> Result<FleetState>
where
    P: ContainerPlatform + ?Sized,
{
    let containers = platform.fetch_build_containers().await?;
    let found = containers.len();

    let started = match check_fleet(expected, &containers) {
        Ok(started) => started,
        Err(error) => {
            warn!(expected, found, %error, "Build container fleet check failed");
            return Ok(FleetState::unhealthy(error));
        }
    };

    let started: Vec<BuildContainer> = started.into_iter().cloned().collect();
    let errors = fetch_all_app_instance_errors(platform, &started).await?;
    if !errors.is_empty() {
        warn!(count = errors.len(), "Build containers have unhealthy instances");
        return Ok(FleetState::unhealthy(errors.join("\n")));
    }

    Ok(FleetState::Healthy {
        expected,
        found,
        started: started.len(),
    })
}
