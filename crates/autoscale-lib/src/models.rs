//! Core data models for the autoscale pipeline

use crate::error::{AutoscaleError, AutoscaleResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Label cAdvisor reports for the Rancher name of a docker container
pub const RANCHER_CONTAINER_NAME_LABEL: &str = "io.rancher.container.name";

/// A `<stack>/<service>` pair naming the watched service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub stack: String,
    pub service: String,
}

impl ServiceTarget {
    /// Parse a `<stack>/<service>` argument
    pub fn parse(raw: &str) -> AutoscaleResult<Self> {
        match raw.split_once('/') {
            Some((stack, service))
                if !stack.is_empty() && !service.is_empty() && !service.contains('/') =>
            {
                Ok(Self {
                    stack: stack.to_string(),
                    service: service.to_string(),
                })
            }
            _ => Err(AutoscaleError::InvalidTarget(raw.to_string())),
        }
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stack, self.service)
    }
}

/// A container being polled, owned by exactly one poller
#[derive(Debug, Clone)]
pub struct ContainerTarget {
    pub id: String,
    pub name: String,
    pub host_address: String,
    /// Start of the next sample window; never moves backwards
    pub last_fetch: DateTime<Utc>,
}

impl ContainerTarget {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host_address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host_address: host_address.into(),
            last_fetch: Utc::now(),
        }
    }

    /// Advance the window start, keeping it monotonic
    pub fn advance(&mut self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        self.last_fetch = self.last_fetch.max(issued_at);
        self.last_fetch
    }
}

/// One incremental metrics sample for a container
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub container_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub stats: ContainerStats,
}

/// Baseline and latest observed replica count of the watched service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceScaleState {
    pub baseline: u32,
    pub current: u32,
}

impl ServiceScaleState {
    pub fn new(baseline: u32) -> Self {
        Self {
            baseline,
            current: baseline,
        }
    }
}

/// Container info as returned by the cAdvisor v1.3 API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerStats {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub stats: Vec<StatsEntry>,
}

impl ContainerStats {
    /// Rancher container name carried in the docker labels
    pub fn rancher_name(&self) -> Option<&str> {
        self.labels
            .get(RANCHER_CONTAINER_NAME_LABEL)
            .map(String::as_str)
    }

    /// Most recent stats entry, if any
    pub fn latest(&self) -> Option<&StatsEntry> {
        self.stats.iter().max_by_key(|s| s.timestamp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cpu: CpuStats,
    #[serde(default)]
    pub memory: MemoryStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub usage: CpuUsage,
}

/// Cumulative CPU time in nanoseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub user: u64,
    #[serde(default)]
    pub system: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: u64,
    #[serde(default)]
    pub working_set: u64,
}

/// Service record from the Rancher metadata API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    #[serde(default)]
    pub stack_name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub scale: u32,
}

/// Container record from the Rancher metadata API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub primary_ip: String,
    #[serde(default)]
    pub host_uuid: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub stack_name: String,
    #[serde(default)]
    pub state: String,
}

/// Host record from the Rancher metadata API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub agent_ip: String,
    #[serde(default)]
    pub hostname: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_service_target_parse() {
        let target = ServiceTarget::parse("web/frontend").unwrap();
        assert_eq!(target.stack, "web");
        assert_eq!(target.service, "frontend");
        assert_eq!(target.to_string(), "web/frontend");
    }

    #[test]
    fn test_service_target_rejects_malformed() {
        for raw in ["", "web", "web/", "/frontend", "a/b/c"] {
            assert!(
                matches!(ServiceTarget::parse(raw), Err(AutoscaleError::InvalidTarget(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_container_target_advance_is_monotonic() {
        let mut target = ContainerTarget::new("abc", "web_frontend_1", "10.0.0.1");
        let start = target.last_fetch;

        let later = start + Duration::seconds(1);
        assert_eq!(target.advance(later), later);

        // A clock step backwards never rewinds the window start
        assert_eq!(target.advance(start), later);
    }

    #[test]
    fn test_container_stats_decode() {
        let json = r#"{
            "id": "abc123",
            "name": "/docker/abc123",
            "aliases": ["r-web_frontend_1", "abc123"],
            "labels": {"io.rancher.container.name": "web-frontend-1"},
            "stats": [
                {"timestamp": "2016-05-01T10:00:00Z", "cpu": {"usage": {"total": 100}}, "memory": {"usage": 2048, "working_set": 1024}},
                {"timestamp": "2016-05-01T10:00:01Z", "cpu": {"usage": {"total": 250}}, "memory": {"usage": 4096}}
            ]
        }"#;

        let stats: ContainerStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.rancher_name(), Some("web-frontend-1"));
        assert_eq!(stats.stats.len(), 2);

        let latest = stats.latest().unwrap();
        assert_eq!(latest.cpu.usage.total, 250);
        assert_eq!(latest.memory.usage, 4096);
        assert_eq!(latest.memory.working_set, 0);
    }
}
