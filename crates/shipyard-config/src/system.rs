//! Scheduler configuration and KDL parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_CLIENT_ID: &str = "cf";
pub const DEFAULT_QUEUE_NAME: &str = "builds";
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Complete scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub platform: PlatformConfig,
    pub auth: AuthConfig,
    pub scheduling: SchedulingConfig,
    pub queues: Vec<QueueConfig>,
}

/// Where the build container fleet lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the platform control-plane API.
    pub api_host: String,
    /// Deployment space holding the build containers.
    pub space_guid: String,
    /// Docker image identifying build containers.
    pub build_image: String,
    /// Number of build containers the fleet should have.
    pub expected_containers: usize,
}

/// Credentials for the OAuth token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub token_url: String,
    pub username: String,
    pub password: String,
    pub client_id: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_url", &self.token_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Poll loop and build lifetime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Delay between poll cycles of one queue source.
    pub poll_interval: Duration,
    /// Ceiling on concurrently running builds; defaults to the expected fleet size.
    pub max_builds: Option<usize>,
    /// Builds running longer than this are reported as timed out.
    pub build_timeout: Option<Duration>,
    pub timeout_check_interval: Duration,
    /// Externally reachable base URL of the completion server, handed to
    /// build containers so they can report that their build is done.
    pub callback_url: Option<String>,
    /// Port the completion server listens on.
    pub listen_port: u16,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_builds: None,
            build_timeout: None,
            timeout_check_interval: DEFAULT_TIMEOUT_CHECK_INTERVAL,
            callback_url: None,
            listen_port: DEFAULT_LISTEN_PORT,
        }
    }
}

/// A PostgreSQL-backed job queue to consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub database_url: String,
    /// How long a claimed job stays invisible before it is redelivered.
    pub visibility_timeout: Duration,
}

impl SchedulerConfig {
    /// Effective build ceiling.
    pub fn max_builds(&self) -> usize {
        self.scheduling
            .max_builds
            .unwrap_or(self.platform.expected_containers)
    }

    /// Check values that parse fine but cannot work.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.platform.expected_containers == 0 {
            return Err(ConfigError::invalid(
                "expected-containers",
                "must be at least 1",
            ));
        }
        if self.scheduling.max_builds == Some(0) {
            return Err(ConfigError::invalid("max-builds", "must be at least 1"));
        }
        if self.scheduling.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll-interval", "must be non-zero"));
        }
        url::Url::parse(&self.platform.api_host)
            .map_err(|e| ConfigError::invalid("api-host", e.to_string()))?;
        if let Some(callback_url) = &self.scheduling.callback_url {
            url::Url::parse(callback_url)
                .map_err(|e| ConfigError::invalid("callback-url", e.to_string()))?;
        }
        Ok(())
    }
}

/// Parse scheduler configuration from KDL text.
///
/// ```kdl
/// platform {
///     api-host "https://api.example.gov"
///     space-guid "space-guid"
///     build-image "builder:latest"
///     expected-containers 3
/// }
/// auth {
///     token-url "https://login.example.gov/oauth/token"
///     username "deployer"
///     password "secret"
/// }
/// scheduler {
///     poll-interval-ms 1000
///     build-timeout-secs 2700
///     callback-url "https://scheduler.example.gov"
/// }
/// queue "builds" {
///     database-url "postgres://localhost/shipyard"
/// }
/// ```
pub fn parse_scheduler_config(kdl: &str) -> ConfigResult<SchedulerConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut platform = None;
    let mut auth = None;
    let mut scheduling = SchedulingConfig::default();
    let mut queues = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "platform" => platform = Some(parse_platform(node)?),
            "auth" => auth = Some(parse_auth(node)?),
            "scheduler" => scheduling = parse_scheduling(node)?,
            "queue" => queues.push(parse_queue(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    let config = SchedulerConfig {
        platform: platform.ok_or_else(|| ConfigError::MissingField("platform".to_string()))?,
        auth: auth.ok_or_else(|| ConfigError::MissingField("auth".to_string()))?,
        scheduling,
        queues,
    };
    config.validate()?;
    Ok(config)
}

fn parse_platform(node: &KdlNode) -> ConfigResult<PlatformConfig> {
    Ok(PlatformConfig {
        api_host: required_string(node, "api-host")?,
        space_guid: required_string(node, "space-guid")?,
        build_image: required_string(node, "build-image")?,
        expected_containers: required_count(node, "expected-containers")?,
    })
}

fn parse_auth(node: &KdlNode) -> ConfigResult<AuthConfig> {
    Ok(AuthConfig {
        token_url: required_string(node, "token-url")?,
        username: required_string(node, "username")?,
        password: required_string(node, "password")?,
        client_id: child_string(node, "client-id")
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
    })
}

fn parse_scheduling(node: &KdlNode) -> ConfigResult<SchedulingConfig> {
    let defaults = SchedulingConfig::default();
    Ok(SchedulingConfig {
        poll_interval: child_count(node, "poll-interval-ms")?
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(defaults.poll_interval),
        max_builds: child_count(node, "max-builds")?,
        build_timeout: child_count(node, "build-timeout-secs")?
            .map(|secs| Duration::from_secs(secs as u64)),
        timeout_check_interval: child_count(node, "timeout-check-interval-secs")?
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(defaults.timeout_check_interval),
        callback_url: child_string(node, "callback-url"),
        listen_port: child_count(node, "listen-port")?
            .map(|port| {
                u16::try_from(port).map_err(|_| {
                    ConfigError::invalid("listen-port", format!("{} is out of range", port))
                })
            })
            .transpose()?
            .unwrap_or(defaults.listen_port),
    })
}

fn parse_queue(node: &KdlNode) -> ConfigResult<QueueConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("queue name".to_string()))?;

    Ok(QueueConfig {
        name,
        database_url: required_string(node, "database-url")?,
        visibility_timeout: child_count(node, "visibility-timeout-secs")?
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT),
    })
}

fn find_child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn child_string(node: &KdlNode, name: &str) -> Option<String> {
    find_child(node, name).and_then(get_first_string_arg)
}

fn required_string(node: &KdlNode, name: &str) -> ConfigResult<String> {
    child_string(node, name).ok_or_else(|| ConfigError::MissingField(name.to_string()))
}

fn child_count(node: &KdlNode, name: &str) -> ConfigResult<Option<usize>> {
    let Some(child) = find_child(node, name) else {
        return Ok(None);
    };

    let value = child
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::invalid(name, "expected an integer"))?;

    usize::try_from(value)
        .map(Some)
        .map_err(|_| ConfigError::invalid(name, format!("{} is out of range", value)))
}

fn required_count(node: &KdlNode, name: &str) -> ConfigResult<usize> {
    child_count(node, name)?.ok_or_else(|| ConfigError::MissingField(name.to_string()))
}
