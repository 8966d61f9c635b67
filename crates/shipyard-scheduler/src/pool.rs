//! Builder pool backed by a fleet of build containers.

use async_trait::async_trait;
use shipyard_core::build::{BUILD_ID, BUILDER_CALLBACK};
use shipyard_core::{
    Build, BuildContainer, BuildId, BuilderPool, ContainerPlatform, Error, Result,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A build holding a slot. `container` is `None` while the idle list is being
/// refreshed for it.
#[derive(Debug, Clone)]
struct RunningBuild {
    build: Build,
    container: Option<BuildContainer>,
    started_at: Instant,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<BuildContainer>,
    running: HashMap<BuildId, RunningBuild>,
}

impl PoolState {
    fn busy_guids(&self) -> HashSet<String> {
        self.running
            .values()
            .filter_map(|running| running.container.as_ref())
            .map(|container| container.guid.clone())
            .collect()
    }

    /// Add started containers that are neither busy nor already idle.
    fn merge_idle(&mut self, containers: Vec<BuildContainer>) {
        let mut known = self.busy_guids();
        known.extend(self.idle.iter().map(|c| c.guid.clone()));

        for container in containers {
            if container.is_started() && known.insert(container.guid.clone()) {
                self.idle.push_back(container);
            }
        }
    }
}

/// Provisions builds into idle build containers, up to `max_builds` at once.
///
/// A slot is reserved under the state lock before any platform call, so
/// concurrent callers can never exceed the ceiling. The lock is never held
/// across platform I/O.
pub struct ContainerBuilderPool {
    platform: Arc<dyn ContainerPlatform>,
    max_builds: usize,
    callback_url: Option<String>,
    state: Mutex<PoolState>,
}

impl ContainerBuilderPool {
    pub fn new(platform: Arc<dyn ContainerPlatform>, max_builds: usize) -> Self {
        Self {
            platform,
            max_builds,
            callback_url: None,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Base URL of the completion server. Each build gets `BUILD_ID` and a
    /// `BUILDER_CALLBACK` pointing at `{base}/builds/{id}/callback`.
    pub fn with_callback_url(mut self, base: impl Into<String>) -> Self {
        self.callback_url = Some(base.into());
        self
    }

    pub fn max_builds(&self) -> usize {
        self.max_builds
    }

    /// Number of builds currently holding a slot.
    pub async fn running_builds(&self) -> usize {
        self.state.lock().await.running.len()
    }

    /// Remove and return builds that have been running longer than `max_age`.
    ///
    /// Their containers go back to the idle list.
    pub async fn take_timed_out_builds(&self, max_age: Duration) -> Vec<Build> {
        let mut state = self.state.lock().await;

        let expired: Vec<BuildId> = state
            .running
            .iter()
            .filter(|(_, running)| {
                running.container.is_some() && running.started_at.elapsed() >= max_age
            })
            .map(|(id, _)| *id)
            .collect();

        let mut builds = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(running) = state.running.remove(&id) {
                state.idle.extend(running.container);
                builds.push(running.build);
            }
        }
        builds
    }

    fn with_completion_callback(&self, mut build: Build) -> Build {
        if let Some(base) = &self.callback_url {
            let id = build.build_id.to_string();
            let callback = format!("{}/builds/{}/callback", base.trim_end_matches('/'), id);
            build.container_environment.insert(BUILD_ID.to_string(), id);
            build
                .container_environment
                .insert(BUILDER_CALLBACK.to_string(), callback);
        }
        build
    }

    /// Refresh the idle list from the platform and claim a container for the
    /// reserved slot. The reservation is dropped on failure.
    async fn claim_container(&self, build_id: BuildId) -> Result<BuildContainer> {
        let fetched = self.platform.fetch_build_containers().await;

        let mut state = self.state.lock().await;
        let containers = match fetched {
            Ok(containers) => containers,
            Err(e) => {
                state.running.remove(&build_id);
                return Err(e);
            }
        };
        state.merge_idle(containers);
        debug!(idle = state.idle.len(), "Refreshed idle build containers");

        let Some(container) = state.idle.pop_front() else {
            state.running.remove(&build_id);
            return Err(Error::NoContainerAvailable(format!(
                "{} of {} builds running and no idle container",
                state.running.len(),
                self.max_builds
            )));
        };

        match state.running.get_mut(&build_id) {
            Some(running) => {
                running.container = Some(container.clone());
                Ok(container)
            }
            None => {
                state.idle.push_back(container);
                Err(Error::CapacityExhausted)
            }
        }
    }
}

#[async_trait]
impl BuilderPool for ContainerBuilderPool {
    async fn can_start_build(&self) -> bool {
        self.state.lock().await.running.len() < self.max_builds
    }

    async fn start_build(&self, build: Build) -> Result<()> {
        let build = self.with_completion_callback(build);
        let build_id = build.build_id;

        let idle = {
            let mut state = self.state.lock().await;
            if state.running.len() >= self.max_builds {
                return Err(Error::CapacityExhausted);
            }

            let idle = state.idle.pop_front();
            state.running.insert(
                build_id,
                RunningBuild {
                    build: build.clone(),
                    container: idle.clone(),
                    started_at: Instant::now(),
                },
            );
            idle
        };

        let container = match idle {
            Some(container) => container,
            None => self.claim_container(build_id).await?,
        };

        if let Err(e) = self
            .platform
            .update_build_container(&container, &build.container_environment)
            .await
        {
            warn!(build_id = %build_id, container = %container.name, error = %e, "Failed to provision build");

            let mut state = self.state.lock().await;
            if state.running.remove(&build_id).is_some() {
                state.idle.push_back(container.clone());
            }
            return Err(Error::provisioning(container.name, e));
        }

        info!(build_id = %build_id, container = %container.name, "Started build");
        Ok(())
    }

    async fn release_build(&self, build_id: &BuildId) -> Option<Build> {
        let mut state = self.state.lock().await;
        let running = state.running.remove(build_id)?;

        if let Some(container) = running.container {
            debug!(build_id = %build_id, container = %container.name, "Released build");
            state.idle.push_back(container);
        }
        Some(running.build)
    }
}
