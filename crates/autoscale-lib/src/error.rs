//! Error types for the autoscale pipeline.

use thiserror::Error;

/// Errors raised by the metadata and metrics clients.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("expected exactly one container for {name}, got {count}")]
    UnexpectedContainerCount { name: String, count: usize },

    #[error("{0}")]
    Other(String),
}

/// Errors that end the pipeline.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("invalid target {0:?}, expected <stack>/<service>")]
    InvalidTarget(String),

    #[error("failed to resolve {target}: {source}")]
    Resolution {
        target: String,
        #[source]
        source: SourceError,
    },

    #[error("metrics fetch failed for container {container_id}: {source}")]
    Fetch {
        container_id: String,
        #[source]
        source: SourceError,
    },

    #[error("scale query for {target} failed: {source}")]
    ScaleQuery {
        target: String,
        #[source]
        source: SourceError,
    },

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;
