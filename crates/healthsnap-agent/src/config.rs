use anyhow::{bail, Context};
use healthsnap_cloud::aws::AwsProviderConfig;
use healthsnap_cloud::gcp::GcpProviderConfig;
use healthsnap_cloud::MetricConfig;
use healthsnap_common::types::PublishTarget;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_poll_period")]
    pub poll_period_secs: u64,
    #[serde(default = "default_trailing_window")]
    pub trailing_window_secs: u64,
    #[serde(default = "default_sampling_period")]
    pub sampling_period_secs: u64,
    /// How long shutdown waits for an in-flight tick before abandoning it.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// Per HTTP call; bounds how long one slow API can hold a tick.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub aws: Option<AwsLaneConfig>,
    pub gcp: Option<GcpLaneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsLaneConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub bucket: String,
    #[serde(default = "default_object_key")]
    pub object_key: String,
    /// Credentials CSV as downloaded from the IAM console. Falls back to the
    /// `AWS_*` environment variables when unset.
    pub credentials_file: Option<PathBuf>,
    /// S3 endpoint override; enables path-style addressing.
    pub storage_endpoint: Option<String>,
    #[serde(flatten)]
    pub provider: AwsProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcpLaneConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub bucket: String,
    #[serde(default = "default_object_key")]
    pub object_key: String,
    /// File holding a bearer token. Falls back to `GCP_ACCESS_TOKEN`, then
    /// the metadata server.
    pub access_token_file: Option<PathBuf>,
    pub metadata_endpoint: Option<String>,
    pub storage_endpoint: Option<String>,
    #[serde(flatten)]
    pub provider: GcpProviderConfig,
}

fn default_poll_period() -> u64 {
    10
}

fn default_trailing_window() -> u64 {
    300
}

fn default_sampling_period() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

fn default_object_key() -> String {
    "InstanceHealth.csv".to_string()
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("poll_period_secs", self.poll_period_secs),
            ("trailing_window_secs", self.trailing_window_secs),
            ("sampling_period_secs", self.sampling_period_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }

        if let Some(aws) = self.aws.as_ref().filter(|l| l.enabled) {
            validate_lane("aws", &aws.bucket, &aws.object_key, &aws.provider.metrics)?;
        }
        if let Some(gcp) = self.gcp.as_ref().filter(|l| l.enabled) {
            validate_lane("gcp", &gcp.bucket, &gcp.object_key, &gcp.provider.metrics)?;
            if gcp.provider.project_id.trim().is_empty() {
                bail!("gcp.project_id must not be empty");
            }
        }

        Ok(())
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }

    pub fn trailing_window(&self) -> Duration {
        Duration::from_secs(self.trailing_window_secs)
    }

    pub fn sampling_period(&self) -> Duration {
        Duration::from_secs(self.sampling_period_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AwsLaneConfig {
    pub fn target(&self) -> PublishTarget {
        PublishTarget {
            bucket: self.bucket.clone(),
            key: self.object_key.clone(),
        }
    }
}

impl GcpLaneConfig {
    pub fn target(&self) -> PublishTarget {
        PublishTarget {
            bucket: self.bucket.clone(),
            key: self.object_key.clone(),
        }
    }
}

fn validate_lane(
    lane: &str,
    bucket: &str,
    object_key: &str,
    metrics: &[MetricConfig],
) -> anyhow::Result<()> {
    if bucket.trim().is_empty() {
        bail!("{lane}.bucket must not be empty");
    }
    if object_key.trim().is_empty() {
        bail!("{lane}.object_key must not be empty");
    }
    if metrics.is_empty() {
        bail!("{lane}.metrics must list at least one metric");
    }

    let mut seen = HashSet::new();
    for metric in metrics {
        if !seen.insert(metric.name.as_str()) {
            bail!("{lane}.metrics lists {} more than once", metric.name);
        }
        if metric.column.is_empty() || metric.column.contains(',') {
            bail!("{lane}.metrics column {:?} must be non-empty and comma-free", metric.column);
        }
    }

    Ok(())
}
