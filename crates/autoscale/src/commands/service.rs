//! `autoscale service` command
//!
//! Resolves the service's containers, prints what was found, then runs the
//! monitoring pipeline until the service scale changes or the command is
//! interrupted.

use anyhow::{Context, Result};
use autoscale_lib::api::{self, ApiState};
use autoscale_lib::pipeline::Thresholds;
use autoscale_lib::resolver::{self, ResolvedService};
use autoscale_lib::source::{CadvisorConnector, MetadataClient};
use autoscale_lib::{
    collector::AggregateSummary, FetchFailurePolicy, HealthRegistry, Outcome, PipelineBuilder,
    PipelineMetrics, ServiceTarget,
};
use clap::{Args, ValueEnum};
use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::output::{
    color_state, format_bytes, or_dash, print_info, print_success, print_table, print_warning,
};

/// Exit status after an interrupt
const EXIT_INTERRUPTED: u8 = 130;

/// What to do when fetching one container's metrics fails
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OnFetchError {
    /// Stop monitoring and exit with an error
    #[default]
    Fatal,
    /// Stop polling only the failing container
    Isolate,
}

impl From<OnFetchError> for FetchFailurePolicy {
    fn from(value: OnFetchError) -> Self {
        match value {
            OnFetchError::Fatal => FetchFailurePolicy::Fatal,
            OnFetchError::Isolate => FetchFailurePolicy::Isolate,
        }
    }
}

#[derive(Debug, Args)]
pub struct ServiceArgs {
    /// Service to monitor (format: stack/service)
    pub target: String,

    /// CPU threshold in percent
    #[arg(long, default_value_t = 80.0)]
    pub cpu: f64,

    /// Memory threshold in percent
    #[arg(long, default_value_t = 80.0)]
    pub mem: f64,

    /// Observation period (e.g., 60s, 1m30s)
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub period: Duration,

    /// Wait after a scale up before exiting (e.g., 60s, 2m)
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub warmup: Duration,

    /// Rancher API URL
    #[arg(long, env = "CATTLE_URL")]
    pub url: Option<String>,

    /// Rancher API access key
    #[arg(long, env = "CATTLE_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    /// Rancher API secret key
    #[arg(long, env = "CATTLE_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Behavior when a container's metrics cannot be fetched
    #[arg(long, value_enum, env = "AUTOSCALE_ON_FETCH_ERROR", default_value = "fatal")]
    pub on_fetch_error: OnFetchError,

    /// Serve /healthz, /readyz and /metrics on this port
    #[arg(long, env = "AUTOSCALE_API_PORT")]
    pub api_port: Option<u16>,
}

impl ServiceArgs {
    fn thresholds(&self) -> Thresholds {
        Thresholds {
            cpu_percent: self.cpu,
            mem_percent: self.mem,
            period: self.period,
        }
    }
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "Service")]
    name: String,
    #[tabled(rename = "Stack")]
    stack: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Scale")]
    scale: u32,
}

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "State")]
    state: String,
}

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "Host")]
    name: String,
    #[tabled(rename = "Hostname")]
    hostname: String,
    #[tabled(rename = "Agent IP")]
    agent_ip: String,
}

#[derive(Tabled)]
struct AgentContainerRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "Docker ID")]
    id: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Memory")]
    memory: String,
}

/// Monitor a service until its scale changes
pub async fn run(args: ServiceArgs, settings: &Settings) -> Result<ExitCode> {
    let target = ServiceTarget::parse(&args.target)?;

    if let Some(url) = &args.url {
        debug!(url = %url, "Rancher API URL provided");
    }
    if args.access_key.is_some() && args.secret_key.is_some() {
        debug!("Rancher API credentials provided");
    }

    let metadata = Arc::new(
        MetadataClient::new(&settings.metadata_url, settings.request_timeout())
            .context("Invalid metadata URL")?,
    );
    let connector = CadvisorConnector::new(settings.cadvisor_port);

    let resolved = resolver::resolve(metadata.as_ref(), &connector, &target)
        .await
        .with_context(|| format!("Failed to resolve service {}", target))?;
    print_resolution(&resolved);

    if resolved.poll_targets.is_empty() {
        print_warning("No service containers found on any cAdvisor agent");
    }

    let health = HealthRegistry::for_pipeline().await;
    let api_server = args.api_port.map(|port| {
        let state = Arc::new(ApiState::new(health.clone(), PipelineMetrics::new()));
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, state).await {
                error!(port = port, error = %e, "API server failed");
            }
        })
    });

    let config = settings.pipeline_config(
        args.on_fetch_error.into(),
        args.thresholds(),
        args.warmup,
    );
    let pipeline = PipelineBuilder::new()
        .service(target.clone(), resolved.baseline_scale())
        .poll_targets(resolved.poll_targets)
        .scale_source(metadata)
        .config(config)
        .health(health)
        .build()?;

    let coordinator = pipeline.coordinator();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, draining");
            coordinator.interrupt().await;
        }
    });

    print_info(&format!(
        "Monitoring {} ({} containers)",
        target.to_string().cyan(),
        pipeline.targets().len()
    ));

    let result = pipeline.run().await;

    interrupt.abort();
    if let Some(server) = api_server {
        server.abort();
    }

    match result.with_context(|| format!("Monitoring {} failed", target))? {
        Outcome::Scaled { change, summary } => {
            print_success(&format!(
                "Service {} scaled {} from {} to {}",
                target,
                change.direction(),
                change.from(),
                change.to()
            ));
            print_summary(summary.as_ref());
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Interrupted { summary } => {
            print_warning("Interrupted");
            print_summary(summary.as_ref());
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    }
}

fn print_resolution(resolved: &ResolvedService) {
    print_table(
        "Service",
        vec![ServiceRow {
            name: resolved.service.name.clone(),
            stack: resolved.service.stack_name.clone(),
            kind: or_dash(&resolved.service.kind),
            scale: resolved.service.scale,
        }],
    );

    print_table(
        "Containers",
        resolved
            .containers
            .iter()
            .map(|c| ContainerRow {
                name: c.name.clone(),
                ip: or_dash(&c.primary_ip),
                host: or_dash(&c.host_uuid),
                state: color_state(&c.state),
            })
            .collect(),
    );

    print_table(
        "Hosts",
        resolved
            .hosts
            .iter()
            .map(|h| HostRow {
                name: h.name.clone(),
                hostname: or_dash(&h.hostname),
                agent_ip: or_dash(&h.agent_ip),
            })
            .collect(),
    );

    print_table(
        "cAdvisor containers",
        resolved
            .agent_containers
            .iter()
            .map(|a| AgentContainerRow {
                name: a.stats.rancher_name().unwrap_or_default().to_string(),
                id: short_id(&a.stats.id),
                host: a.host.name.clone(),
                agent: a.address.clone(),
                memory: a
                    .stats
                    .latest()
                    .map(|s| format_bytes(s.memory.usage))
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect(),
    );
}

fn print_summary(summary: Option<&AggregateSummary>) {
    let Some(summary) = summary else {
        return;
    };
    println!(
        "Collected {} samples ({} drained after shutdown, {} drain ticks)",
        summary.total(),
        summary.drained,
        summary.drain_ticks
    );
}

/// Docker ids are shown abbreviated like `docker ps` does
fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_on_fetch_error_maps_to_policy() {
        assert_eq!(
            FetchFailurePolicy::from(OnFetchError::default()),
            FetchFailurePolicy::Fatal
        );
        assert_eq!(
            FetchFailurePolicy::from(OnFetchError::Isolate),
            FetchFailurePolicy::Isolate
        );
    }
}
