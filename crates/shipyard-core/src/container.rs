//! Build containers and fleet state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Instance states that mean a container is not fully running.
pub const FAILED_INSTANCE_STATES: [&str; 4] = ["CRASHED", "DOWN", "FLAPPING", "UNKNOWN"];

/// Lifecycle state of a platform application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContainerState {
    Started,
    Stopped,
    Other(String),
}

impl ContainerState {
    pub fn as_str(&self) -> &str {
        match self {
            ContainerState::Started => "STARTED",
            ContainerState::Stopped => "STOPPED",
            ContainerState::Other(s) => s,
        }
    }
}

impl From<String> for ContainerState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "STARTED" => ContainerState::Started,
            "STOPPED" => ContainerState::Stopped,
            _ => ContainerState::Other(value),
        }
    }
}

impl From<ContainerState> for String {
    fn from(state: ContainerState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform application acting as a build worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContainer {
    pub guid: String,
    /// Control-plane resource path, e.g. `/v2/apps/{guid}`.
    pub url: String,
    pub name: String,
    pub docker_image: Option<String>,
    pub state: ContainerState,
}

impl BuildContainer {
    pub fn is_started(&self) -> bool {
        self.state == ContainerState::Started
    }
}

/// Number of instances in each state for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceStateCount(BTreeMap<String, usize>);

impl InstanceStateCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more instance in `state`.
    pub fn record(&mut self, state: impl Into<String>) {
        *self.0.entry(state.into()).or_insert(0) += 1;
    }

    pub fn get(&self, state: &str) -> usize {
        self.0.get(state).copied().unwrap_or(0)
    }

    /// True when no instances were observed at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when any instance is crashed, down, flapping or unknown.
    pub fn has_failed_instances(&self) -> bool {
        FAILED_INSTANCE_STATES
            .iter()
            .any(|state| self.get(state) > 0)
    }
}

impl<S: Into<String>> FromIterator<S> for InstanceStateCount {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut counts = Self::new();
        for state in iter {
            counts.record(state);
        }
        counts
    }
}

/// Renders as compact JSON, e.g. `{"CRASHED":1,"RUNNING":2}`.
impl fmt::Display for InstanceStateCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Result of reconciling the fleet against its expected size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FleetState {
    Unhealthy {
        error: String,
    },
    Healthy {
        expected: usize,
        found: usize,
        started: usize,
    },
}

impl FleetState {
    pub fn unhealthy(error: impl Into<String>) -> Self {
        FleetState::Unhealthy {
            error: error.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, FleetState::Healthy { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            FleetState::Unhealthy { error } => Some(error),
            FleetState::Healthy { .. } => None,
        }
    }
}
