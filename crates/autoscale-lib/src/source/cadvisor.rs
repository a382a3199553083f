//! cAdvisor v1.3 HTTP client

use super::{async_trait, AgentConnector, MetricsSource};
use crate::error::SourceError;
use crate::models::{ContainerStats, HostRecord};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Port the cAdvisor agent listens on in a Rancher environment
pub const DEFAULT_CADVISOR_PORT: u16 = 9244;

/// Body of a container info request
#[derive(Debug, Serialize)]
struct ContainerInfoRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_stats: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<DateTime<Utc>>,
}

/// Client for one host's cAdvisor agent
pub struct CadvisorClient {
    client: Client,
    base_url: Url,
}

impl CadvisorClient {
    /// Create a client for an agent address such as `http://10.0.0.1:9244/`
    pub fn new(address: &str) -> Result<Self, SourceError> {
        let mut address = address.to_string();
        if !address.ends_with('/') {
            address.push('/');
        }
        let base_url = Url::parse(&address)?.join("api/v1.3/")?;

        // No request timeout: a fetch waits for the agent as long as it takes
        let client = Client::builder()
            .build()
            .map_err(|e| SourceError::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn docker_url(&self, name: &str) -> Result<Url, SourceError> {
        if name.is_empty() {
            Ok(self.base_url.join("docker/")?)
        } else {
            Ok(self.base_url.join(&format!("docker/{}", name))?)
        }
    }

    /// POST a JSON query and decode a JSON response
    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, SourceError> {
        let url_str = url.to_string();
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| SourceError::Request {
                url: url_str.clone(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                url: url_str,
                status,
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|source| SourceError::Decode {
                url: url_str,
                source,
            })
    }
}

#[async_trait]
impl MetricsSource for CadvisorClient {
    async fn container_stats(
        &self,
        container_id: &str,
        start: DateTime<Utc>,
    ) -> Result<ContainerStats, SourceError> {
        let url = self.docker_url(container_id)?;
        let request = ContainerInfoRequest {
            num_stats: None,
            start: Some(start),
        };

        let found: HashMap<String, ContainerStats> = self.post_json(url, &request).await?;
        if found.len() != 1 {
            return Err(SourceError::UnexpectedContainerCount {
                name: container_id.to_string(),
                count: found.len(),
            });
        }

        // len() == 1 was checked above
        Ok(found.into_values().next().unwrap_or_default())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerStats>, SourceError> {
        let url = self.docker_url("")?;
        let request = ContainerInfoRequest {
            num_stats: Some(0),
            start: None,
        };
        let found: HashMap<String, ContainerStats> = self.post_json(url, &request).await?;

        debug!(base_url = %self.base_url, count = found.len(), "Listed agent containers");
        Ok(found.into_values().collect())
    }
}

/// Connects to the cAdvisor agent of each host on a fixed port
#[derive(Debug, Clone)]
pub struct CadvisorConnector {
    port: u16,
}

impl CadvisorConnector {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for CadvisorConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CADVISOR_PORT)
    }
}

impl AgentConnector for CadvisorConnector {
    fn address(&self, host: &HostRecord) -> String {
        format!("http://{}:{}/", host.agent_ip, self.port)
    }

    fn connect(&self, host: &HostRecord) -> Result<Arc<dyn MetricsSource>, SourceError> {
        Ok(Arc::new(CadvisorClient::new(&self.address(host))?))
    }
}
