//! Loading configuration from environment variables.

use crate::system::{
    DEFAULT_CLIENT_ID, DEFAULT_QUEUE_NAME, DEFAULT_VISIBILITY_TIMEOUT, SchedulingConfig,
};
use crate::{AuthConfig, ConfigError, ConfigResult, PlatformConfig, QueueConfig, SchedulerConfig};
use std::time::Duration;

pub const API_HOST: &str = "CLOUD_FOUNDRY_API_HOST";
pub const SPACE_GUID: &str = "BUILD_SPACE_GUID";
pub const BUILD_IMAGE: &str = "BUILD_CONTAINER_DOCKER_IMAGE_NAME";
pub const EXPECTED_CONTAINERS: &str = "EXPECTED_NUM_BUILD_CONTAINERS";
pub const TOKEN_URL: &str = "CLOUD_FOUNDRY_OAUTH_TOKEN_URL";
pub const USERNAME: &str = "DEPLOY_USER_USERNAME";
pub const PASSWORD: &str = "DEPLOY_USER_PASSWORD";
pub const CLIENT_ID: &str = "CLOUD_FOUNDRY_OAUTH_CLIENT_ID";
pub const POLL_INTERVAL_MS: &str = "POLL_INTERVAL_MS";
pub const MAX_BUILDS: &str = "MAX_CONCURRENT_BUILDS";
pub const BUILD_TIMEOUT_SECONDS: &str = "BUILD_TIMEOUT_SECONDS";
pub const TIMEOUT_CHECK_INTERVAL_SECONDS: &str = "TIMEOUT_CHECK_INTERVAL_SECONDS";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const QUEUE_NAMES: &str = "QUEUE_NAMES";
pub const VISIBILITY_TIMEOUT_SECONDS: &str = "QUEUE_VISIBILITY_TIMEOUT_SECONDS";
pub const CALLBACK_URL: &str = "BUILDER_CALLBACK_URL";
pub const LISTEN_PORT: &str = "PORT";

impl SchedulerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let platform = PlatformConfig {
            api_host: vars.required(API_HOST)?,
            space_guid: vars.required(SPACE_GUID)?,
            build_image: vars.required(BUILD_IMAGE)?,
            expected_containers: vars
                .number(EXPECTED_CONTAINERS)?
                .map(|n| n as usize)
                .ok_or_else(|| ConfigError::MissingField(EXPECTED_CONTAINERS.to_string()))?,
        };

        let auth = AuthConfig {
            token_url: vars.required(TOKEN_URL)?,
            username: vars.required(USERNAME)?,
            password: vars.required(PASSWORD)?,
            client_id: vars
                .optional(CLIENT_ID)
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
        };

        let defaults = SchedulingConfig::default();
        let scheduling = SchedulingConfig {
            poll_interval: vars
                .number(POLL_INTERVAL_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_builds: vars.number(MAX_BUILDS)?.map(|n| n as usize),
            build_timeout: vars.number(BUILD_TIMEOUT_SECONDS)?.map(Duration::from_secs),
            timeout_check_interval: vars
                .number(TIMEOUT_CHECK_INTERVAL_SECONDS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout_check_interval),
            callback_url: vars.optional(CALLBACK_URL),
            listen_port: vars
                .number(LISTEN_PORT)?
                .map(|port| {
                    u16::try_from(port).map_err(|_| {
                        ConfigError::invalid(LISTEN_PORT, format!("{} is out of range", port))
                    })
                })
                .transpose()?
                .unwrap_or(defaults.listen_port),
        };

        // No database means no queues, which is enough for fleet checks.
        let database_url = vars.optional(DATABASE_URL);
        let visibility_timeout = vars
            .number(VISIBILITY_TIMEOUT_SECONDS)?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT);
        let queue_names = vars
            .optional(QUEUE_NAMES)
            .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());
        let queues = match database_url {
            Some(database_url) => queue_names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| QueueConfig {
                    name: name.to_string(),
                    database_url: database_url.clone(),
                    visibility_timeout,
                })
                .collect(),
            None => Vec::new(),
        };

        let config = SchedulerConfig {
            platform,
            auth,
            scheduling,
            queues,
        };
        config.validate()?;
        Ok(config)
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> ConfigResult<String> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingField(key.to_string()))
    }

    fn number(&self, key: &str) -> ConfigResult<Option<u64>> {
        self.optional(key)
            .map(|value| {
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::invalid(key, e.to_string()))
            })
            .transpose()
    }
}
