//! Container target resolution
//!
//! Turns a `<stack>/<service>` target into the list of containers to poll:
//! the service and its containers come from the orchestrator catalog, the
//! hosts running them are looked up, and each host's metrics agent is asked
//! for its docker containers, matched back by the Rancher name label.

use crate::collector::PollTarget;
use crate::error::{AutoscaleError, AutoscaleResult, SourceError};
use crate::models::{
    ContainerRecord, ContainerStats, ContainerTarget, HostRecord, ServiceRecord, ServiceTarget,
};
use crate::source::{AgentConnector, ServiceCatalog};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A matched agent container and the host it runs on
#[derive(Debug, Clone)]
pub struct AgentContainer {
    pub stats: ContainerStats,
    pub host: HostRecord,
    pub address: String,
}

/// Everything resolved before polling starts
#[derive(Debug)]
pub struct ResolvedService {
    pub target: ServiceTarget,
    pub service: ServiceRecord,
    pub containers: Vec<ContainerRecord>,
    pub hosts: Vec<HostRecord>,
    pub agent_containers: Vec<AgentContainer>,
    pub poll_targets: Vec<PollTarget>,
}

impl ResolvedService {
    /// Replica count at startup
    pub fn baseline_scale(&self) -> u32 {
        self.service.scale
    }
}

/// Keep only the hosts running at least one of the containers
pub fn container_hosts(containers: &[ContainerRecord], hosts: Vec<HostRecord>) -> Vec<HostRecord> {
    let wanted: HashSet<&str> = containers.iter().map(|c| c.host_uuid.as_str()).collect();
    hosts
        .into_iter()
        .filter(|h| wanted.contains(h.uuid.as_str()))
        .collect()
}

/// Resolve a service to its poll targets
pub async fn resolve(
    catalog: &dyn ServiceCatalog,
    connector: &dyn AgentConnector,
    target: &ServiceTarget,
) -> AutoscaleResult<ResolvedService> {
    let failed = |source: SourceError| AutoscaleError::Resolution {
        target: target.to_string(),
        source,
    };

    let service = catalog.service(target).await.map_err(failed)?;
    info!(service = %service.name, scale = service.scale, "Resolved service");

    let containers = catalog.service_containers(target).await.map_err(failed)?;
    let hosts = container_hosts(&containers, catalog.hosts().await.map_err(failed)?);
    debug!(
        containers = containers.len(),
        hosts = hosts.len(),
        "Resolved service containers and hosts"
    );

    let names: HashSet<&str> = containers.iter().map(|c| c.name.as_str()).collect();
    let mut seen = HashSet::new();
    let mut agent_containers = Vec::new();
    let mut poll_targets = Vec::new();

    for host in &hosts {
        let address = connector.address(host);
        let source = connector.connect(host).map_err(failed)?;
        let listed = source.list_containers().await.map_err(failed)?;

        for stats in listed {
            let Some(rancher_name) = stats.rancher_name() else {
                continue;
            };
            if !names.contains(rancher_name) {
                continue;
            }
            if !seen.insert(stats.id.clone()) {
                warn!(container_id = %stats.id, "Container reported twice, polling it once");
                continue;
            }

            let target = ContainerTarget::new(&stats.id, rancher_name, &address);
            poll_targets.push(PollTarget::new(target, source.clone()));
            agent_containers.push(AgentContainer {
                stats,
                host: host.clone(),
                address: address.clone(),
            });
        }
    }

    if poll_targets.len() != containers.len() {
        warn!(
            expected = containers.len(),
            matched = poll_targets.len(),
            "Not every service container was found on a metrics agent"
        );
    }

    Ok(ResolvedService {
        target: target.clone(),
        service,
        containers,
        hosts,
        agent_containers,
        poll_targets,
    })
}
