//! Periodic collector that snapshots instance health from each configured
//! cloud and publishes it as CSV to that cloud's object store.

pub mod config;
pub mod credentials;
pub mod orchestrator;
pub mod scheduler;

use anyhow::Context;
use config::{AgentConfig, AwsLaneConfig, GcpLaneConfig};
use healthsnap_cloud::aws::AwsCloudProvider;
use healthsnap_cloud::collector::ProviderCollector;
use healthsnap_cloud::gcp::GcpCloudProvider;
use healthsnap_cloud::MetricConfig;
use healthsnap_storage::gcs::GcsStore;
use healthsnap_storage::s3::S3Store;
use orchestrator::{Lane, Orchestrator};
use std::sync::Arc;

pub const AWS_IDENTITY_COLUMNS: [&str; 3] = ["instanceId", "availabilityZone", "state"];
pub const GCP_IDENTITY_COLUMNS: [&str; 3] = ["instanceName", "availabilityZone", "state"];

/// Builds one lane per enabled provider, GCP first. HTTP clients and
/// credentials are created here once and shared by every tick.
pub fn build_orchestrator(config: &AgentConfig) -> anyhow::Result<Orchestrator> {
    let client = healthsnap_cloud::build_http_client(config.request_timeout())
        .context("Failed to build HTTP client")?;

    let mut lanes = Vec::new();
    if let Some(gcp) = config.gcp.as_ref().filter(|l| l.enabled) {
        lanes.push(build_gcp_lane(config, gcp, client.clone()).context("Failed to set up GCP lane")?);
    }
    if let Some(aws) = config.aws.as_ref().filter(|l| l.enabled) {
        lanes.push(build_aws_lane(config, aws, client.clone()).context("Failed to set up AWS lane")?);
    }

    if lanes.is_empty() {
        tracing::warn!("No provider lane is enabled; ticks will publish nothing");
    }

    Ok(Orchestrator::new(lanes))
}

fn build_aws_lane(
    config: &AgentConfig,
    lane: &AwsLaneConfig,
    client: reqwest::Client,
) -> anyhow::Result<Lane> {
    let credentials = credentials::load_aws_credentials(lane.credentials_file.as_deref())?;
    let provider = AwsCloudProvider::new(lane.provider.clone(), credentials.clone(), client.clone())?;
    let store = S3Store::new(
        &lane.provider.region,
        lane.storage_endpoint.clone(),
        credentials,
        client,
    )?;

    tracing::info!(
        region = %lane.provider.region,
        target = %lane.target(),
        metrics = lane.provider.metrics.len(),
        "AWS lane configured"
    );

    Ok(Lane::new(
        collector(config, Arc::new(provider), &lane.provider.metrics),
        &AWS_IDENTITY_COLUMNS,
        &columns(&lane.provider.metrics),
        Arc::new(store),
        lane.target(),
    ))
}

fn build_gcp_lane(
    config: &AgentConfig,
    lane: &GcpLaneConfig,
    client: reqwest::Client,
) -> anyhow::Result<Lane> {
    let token_source = credentials::gcp_token_source(
        lane.access_token_file.as_deref(),
        lane.metadata_endpoint.clone(),
        client.clone(),
    )?;
    let provider = GcpCloudProvider::new(lane.provider.clone(), token_source.clone(), client.clone())?;
    let store = GcsStore::new(lane.storage_endpoint.clone(), token_source, client);

    tracing::info!(
        project = %lane.provider.project_id,
        region = %lane.provider.region,
        target = %lane.target(),
        metrics = lane.provider.metrics.len(),
        "GCP lane configured"
    );

    Ok(Lane::new(
        collector(config, Arc::new(provider), &lane.provider.metrics),
        &GCP_IDENTITY_COLUMNS,
        &columns(&lane.provider.metrics),
        Arc::new(store),
        lane.target(),
    ))
}

fn collector(
    config: &AgentConfig,
    provider: Arc<dyn healthsnap_cloud::CloudProvider>,
    metrics: &[MetricConfig],
) -> ProviderCollector {
    ProviderCollector::new(
        provider,
        metrics.iter().map(|m| m.name.clone()).collect(),
        config.trailing_window(),
        config.sampling_period(),
    )
}

fn columns(metrics: &[MetricConfig]) -> Vec<String> {
    metrics.iter().map(|m| m.column.clone()).collect()
}
