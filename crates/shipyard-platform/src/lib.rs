//! Cloud Foundry integration for the Shipyard build scheduler.
//!
//! Provides:
//! - A control-plane client that lists, inspects and restages build containers
//! - OAuth token providers for authenticating API calls
//! - Fleet health aggregation over any container platform

pub mod auth;
pub mod cloud_foundry;
pub mod fleet;

pub use auth::{StaticToken, UaaTokenClient};
pub use cloud_foundry::CloudFoundryClient;
pub use shipyard_core::platform::{ContainerPlatform, TokenProvider};
