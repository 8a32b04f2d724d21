//! Provider collectors that turn each cloud's instance and monitoring APIs
//! into one row/column model.
//!
//! A [`CloudProvider`] exposes the raw capabilities (metric metadata,
//! instance listing, series fetch); [`collector::ProviderCollector`] drives
//! them into a [`healthsnap_common::types::Snapshot`].

pub mod aws;
pub mod collector;
pub mod descriptor;
pub mod error;
pub mod gcp;

use error::Result;
use healthsnap_common::types::{MetricDescriptor, ProviderKind, Series, TimeWindow};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity of one live compute instance as reported by the listing API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    /// Identifier written to the CSV id column.
    pub id: String,
    pub zone: String,
    pub state: String,
    /// Provider-internal identifier used in metric queries (GCP numeric
    /// instance id; same as `id` on AWS).
    pub resource_id: String,
}

/// One configured metric: the provider's metric name and the CSV column it
/// is written under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    pub column: String,
    /// Declared metric kind (`gauge`, `cumulative`) for providers without a
    /// metadata API. Ignored where the provider reports the kind itself.
    #[serde(default)]
    pub kind: Option<String>,
}

impl MetricConfig {
    pub fn new(name: &str, column: &str) -> Self {
        Self {
            name: name.to_string(),
            column: column.to_string(),
            kind: None,
        }
    }
}

/// Cloud provider trait for abstracting different cloud vendors
#[async_trait::async_trait]
pub trait CloudProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Provider-reported metric kind for `metric_name` (e.g. `"GAUGE"`).
    async fn describe_metric(&self, metric_name: &str) -> Result<String>;

    /// List all instances in the configured scope.
    async fn list_instances(&self) -> Result<Vec<InstanceIdentity>>;

    /// Raw points of one metric for one instance over `window`, one entry
    /// per time series the provider returned (e.g. one per attached disk).
    async fn fetch_series(
        &self,
        instance: &InstanceIdentity,
        descriptor: &MetricDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<Series>>;
}

/// HTTP client shared by every call a provider makes. `timeout` bounds each
/// request so one slow call cannot stall a tick indefinitely.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .build()?)
}
