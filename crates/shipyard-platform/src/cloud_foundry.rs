//! Cloud Foundry v2 control-plane client.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use shipyard_config::PlatformConfig;
use shipyard_core::{
    BuildContainer, ContainerPlatform, ContainerState, Error, FleetState, InstanceStateCount,
    Result, TokenProvider,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::fleet;

/// Client for the platform API, scoped to one space and build image.
pub struct CloudFoundryClient {
    client: reqwest::Client,
    api_host: Url,
    space_guid: String,
    build_image: String,
    expected_containers: usize,
    tokens: Arc<dyn TokenProvider>,
}

#[derive(Debug, Deserialize)]
struct AppsPage {
    #[serde(default)]
    next_url: Option<String>,
    resources: Vec<AppResource>,
}

#[derive(Debug, Deserialize)]
struct AppResource {
    metadata: AppMetadata,
    entity: AppEntity,
}

#[derive(Debug, Deserialize)]
struct AppMetadata {
    guid: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct AppEntity {
    name: String,
    #[serde(default)]
    docker_image: Option<String>,
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
struct InstanceStats {
    state: String,
}

impl AppResource {
    fn into_container(self) -> BuildContainer {
        BuildContainer {
            guid: self.metadata.guid,
            url: self.metadata.url,
            name: self.entity.name,
            docker_image: self.entity.docker_image,
            state: self.entity.state,
        }
    }
}

impl CloudFoundryClient {
    pub fn new(config: &PlatformConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let api_host =
            Url::parse(&config.api_host).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_host,
            space_guid: config.space_guid.clone(),
            build_image: config.build_image.clone(),
            expected_containers: config.expected_containers,
            tokens,
        })
    }

    /// Reconcile the fleet against the expected container count.
    pub async fn get_build_containers_state(&self) -> Result<FleetState> {
        let state = fleet::build_containers_state(self, self.expected_containers).await?;
        if let FleetState::Healthy { found, started, .. } = &state {
            info!(found, started, "Build container fleet is healthy");
        }
        Ok(state)
    }

    /// Instance-level errors for each of `containers`.
    pub async fn fetch_all_app_instance_errors(
        &self,
        containers: &[BuildContainer],
    ) -> Result<Vec<String>> {
        fleet::fetch_all_app_instance_errors(self, containers).await
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.api_host
            .join(path)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// Send an authenticated request and return the response body.
    ///
    /// Any status of 400 or above is an error carrying the body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String> {
        let url = self.resolve(path)?;
        let token = self.tokens.access_token().await?;

        debug!(%method, %url, "Platform API request");

        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if status.is_client_error() || status.is_server_error() {
            let body = if text.is_empty() {
                format!("Received status code: {}", status.as_u16())
            } else {
                text
            };
            return Err(Error::HttpStatus {
                code: status.as_u16(),
                body,
            });
        }

        Ok(text)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.request(Method::GET, path, None).await?;
        serde_json::from_str(&body).map_err(|e| Error::Decode(e.to_string()))
    }
}

#[async_trait]
impl ContainerPlatform for CloudFoundryClient {
    async fn fetch_build_containers(&self) -> Result<Vec<BuildContainer>> {
        let mut containers = Vec::new();
        let mut next = Some(format!("/v2/spaces/{}/apps", self.space_guid));

        let mut visited = HashSet::new();

        while let Some(path) = next {
            if !visited.insert(path.clone()) {
                return Err(Error::Decode(format!("app listing pages loop back to {}", path)));
            }
            let page: AppsPage = self.get_json(&path).await?;
            containers.extend(
                page.resources
                    .into_iter()
                    .map(AppResource::into_container)
                    .filter(|c| c.docker_image.as_deref() == Some(self.build_image.as_str())),
            );
            next = page.next_url;
        }

        debug!(count = containers.len(), "Fetched build containers");
        Ok(containers)
    }

    async fn fetch_app_instance_states(
        &self,
        container: &BuildContainer,
    ) -> Result<InstanceStateCount> {
        let stats: HashMap<String, InstanceStats> = self
            .get_json(&format!("/v2/apps/{}/stats", container.guid))
            .await?;

        Ok(stats.into_values().map(|instance| instance.state).collect())
    }

    async fn update_build_container(
        &self,
        container: &BuildContainer,
        environment: &HashMap<String, String>,
    ) -> Result<()> {
        let body = serde_json::json!({ "environment_json": environment });
        self.request(Method::PUT, &container.url, Some(&body))
            .await?;

        self.request(Method::POST, &format!("{}/restage", container.url), None)
            .await?;

        info!(container = %container.name, "Restaged build container");
        Ok(())
    }
}
