//! Configuration for the Shipyard build scheduler.
//!
//! Configuration is read once at startup, either from environment
//! variables or from a KDL file, and passed into each component.

pub mod env;
pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    AuthConfig, PlatformConfig, QueueConfig, SchedulerConfig, SchedulingConfig,
    parse_scheduler_config,
};
