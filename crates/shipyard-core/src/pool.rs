//! Builder pool trait.

use async_trait::async_trait;

use crate::{Build, BuildId, Result};

/// Concurrency gate in front of the build containers.
#[async_trait]
pub trait BuilderPool: Send + Sync {
    /// Whether the number of running builds is below the ceiling.
    async fn can_start_build(&self) -> bool;

    /// Provision `build` into an available container.
    ///
    /// Resolves once the container has been updated and restaged.
    async fn start_build(&self, build: Build) -> Result<()>;

    /// Free the capacity held by a finished build.
    ///
    /// Returns the build if it was running.
    async fn release_build(&self, build_id: &BuildId) -> Option<Build>;
}
