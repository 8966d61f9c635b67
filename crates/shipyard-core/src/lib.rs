//! Core domain types and traits for the Shipyard build scheduler.
//!
//! This crate contains:
//! - Build identifiers and the build/job payload types
//! - Build container and fleet state types
//! - The queue source, builder pool and container platform traits

pub mod build;
pub mod container;
pub mod error;
pub mod id;
pub mod platform;
pub mod pool;
pub mod queue;

pub use build::{Build, EnvVar, JobPayload};
pub use container::{BuildContainer, ContainerState, FleetState, InstanceStateCount};
pub use error::{Error, Result};
pub use id::BuildId;
pub use platform::{ContainerPlatform, TokenProvider};
pub use pool::BuilderPool;
pub use queue::{QueueMessage, QueueSource};
