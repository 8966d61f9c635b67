//! Builds and the job payloads they are created from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::BuildId;

/// Environment variable carrying the URL build logs are posted to.
pub const LOG_CALLBACK: &str = "LOG_CALLBACK";
/// Environment variable carrying the URL build status is posted to.
pub const STATUS_CALLBACK: &str = "STATUS_CALLBACK";
/// Environment variable carrying the build's id.
pub const BUILD_ID: &str = "BUILD_ID";
/// Environment variable carrying the URL a container calls when its build is done.
pub const BUILDER_CALLBACK: &str = "BUILDER_CALLBACK";

/// A single environment override from a job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// The job specification carried by a queue message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Environment overrides applied to the build container.
    #[serde(default)]
    pub environment: Vec<EnvVar>,
}

/// A build ready to be handed to a builder pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub build_id: BuildId,
    /// Environment the build container is restaged with.
    pub container_environment: HashMap<String, String>,
}

impl Build {
    /// Create a build with a fresh id from a job payload.
    ///
    /// When a name appears more than once the last value wins.
    pub fn from_payload(payload: JobPayload) -> Self {
        let container_environment = payload
            .environment
            .into_iter()
            .map(|var| (var.name, var.value))
            .collect();

        Self {
            build_id: BuildId::new(),
            container_environment,
        }
    }

    pub fn log_callback(&self) -> Option<&str> {
        self.container_environment.get(LOG_CALLBACK).map(String::as_str)
    }

    pub fn status_callback(&self) -> Option<&str> {
        self.container_environment
            .get(STATUS_CALLBACK)
            .map(String::as_str)
    }
}
