//! Library for watching a Rancher service until it is rescaled
//!
//! This crate provides the core functionality for:
//! - Resolving a service to its containers and their cAdvisor agents
//! - Concurrent per-container metrics polling with a fan-in queue
//! - Coordinated shutdown with a bounded drain of in-flight samples
//! - Watching the service scale and stopping once it changes
//! - Health checks and observability

pub mod api;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod resolver;
pub mod shutdown;
pub mod source;
pub mod watch;

pub use error::{AutoscaleError, AutoscaleResult, SourceError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pipeline::{Outcome, Pipeline, PipelineBuilder, PipelineConfig};
pub use shutdown::{FetchFailurePolicy, ShutdownCoordinator, ShutdownReason};
