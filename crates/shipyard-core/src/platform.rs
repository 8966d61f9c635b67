//! Container platform and authentication traits.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::{BuildContainer, InstanceStateCount, Result};

/// Source of short-lived bearer tokens for platform API calls.
///
/// Callers fetch a token before every request; implementations decide
/// whether to cache.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Control-plane operations on the build container fleet.
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    /// List the containers running the configured build-worker image.
    async fn fetch_build_containers(&self) -> Result<Vec<BuildContainer>>;

    /// Count the instances of `container` in each runtime state.
    async fn fetch_app_instance_states(
        &self,
        container: &BuildContainer,
    ) -> Result<InstanceStateCount>;

    /// Replace the container's environment and restage it.
    async fn update_build_container(
        &self,
        container: &BuildContainer,
        environment: &HashMap<String, String>,
    ) -> Result<()>;
}
