//! Clients for the external systems the pipeline talks to
//!
//! The pipeline depends only on the traits defined here. The cAdvisor and
//! Rancher metadata HTTP clients are the production implementations; tests
//! substitute in-memory mocks.

mod cadvisor;
mod metadata;

pub use cadvisor::{CadvisorClient, CadvisorConnector, DEFAULT_CADVISOR_PORT};
pub use metadata::{MetadataClient, DEFAULT_METADATA_URL};

use crate::error::SourceError;
use crate::models::{ContainerRecord, ContainerStats, HostRecord, ServiceRecord, ServiceTarget};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use async_trait::async_trait;

/// Per-host metrics agent
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch the stats of one container recorded since `start`
    async fn container_stats(
        &self,
        container_id: &str,
        start: DateTime<Utc>,
    ) -> Result<ContainerStats, SourceError>;

    /// List all docker containers known to the agent
    async fn list_containers(&self) -> Result<Vec<ContainerStats>, SourceError>;
}

/// Orchestrator view of the watched service's replica count
#[async_trait]
pub trait ScaleSource: Send + Sync {
    async fn current_scale(&self, target: &ServiceTarget) -> Result<u32, SourceError>;
}

/// Orchestrator catalog used to resolve a service to containers and hosts
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn service(&self, target: &ServiceTarget) -> Result<ServiceRecord, SourceError>;

    /// Containers belonging to the service
    async fn service_containers(
        &self,
        target: &ServiceTarget,
    ) -> Result<Vec<ContainerRecord>, SourceError>;

    async fn hosts(&self) -> Result<Vec<HostRecord>, SourceError>;
}

/// Opens a metrics source for the agent running on a host
pub trait AgentConnector: Send + Sync {
    /// Address of the host's agent, used for logging and display
    fn address(&self, host: &HostRecord) -> String;

    fn connect(&self, host: &HostRecord) -> Result<Arc<dyn MetricsSource>, SourceError>;
}
