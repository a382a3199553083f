//! Rancher metadata service client

use super::{async_trait, ScaleSource, ServiceCatalog};
use crate::error::SourceError;
use crate::models::{ContainerRecord, HostRecord, ServiceRecord, ServiceTarget};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Metadata endpoint reachable from every container in a Rancher environment
pub const DEFAULT_METADATA_URL: &str = "http://rancher-metadata.rancher.internal/2015-12-19";

/// Client for the Rancher metadata API
pub struct MetadataClient {
    client: Client,
    base_url: Url,
}

impl MetadataClient {
    /// Create a new metadata client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a GET request against the metadata API
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = self.base_url.join(path)?;
        let url_str = url.to_string();

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
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
impl ServiceCatalog for MetadataClient {
    async fn service(&self, target: &ServiceTarget) -> Result<ServiceRecord, SourceError> {
        self.get(&format!("stacks/{}/services/{}", target.stack, target.service))
            .await
    }

    async fn service_containers(
        &self,
        target: &ServiceTarget,
    ) -> Result<Vec<ContainerRecord>, SourceError> {
        let all: Vec<ContainerRecord> = self.get("containers").await?;
        let total = all.len();

        let containers: Vec<ContainerRecord> = all
            .into_iter()
            .filter(|c| c.stack_name == target.stack && c.service_name == target.service)
            .collect();

        debug!(
            target = %target,
            matched = containers.len(),
            total = total,
            "Filtered service containers"
        );
        Ok(containers)
    }

    async fn hosts(&self) -> Result<Vec<HostRecord>, SourceError> {
        self.get("hosts").await
    }
}

#[async_trait]
impl ScaleSource for MetadataClient {
    async fn current_scale(&self, target: &ServiceTarget) -> Result<u32, SourceError> {
        Ok(self.service(target).await?.scale)
    }
}
