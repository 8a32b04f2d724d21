use crate::error::{CloudError, Result};
use crate::{CloudProvider, InstanceIdentity, MetricConfig};
use chrono::{DateTime, SecondsFormat, Utc};
use healthsnap_common::credentials::TokenSource;
use healthsnap_common::types::{
    AggregationKind, MetricDescriptor, ProviderKind, Series, SeriesPoint, TimeWindow,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com";
const MONITORING_ENDPOINT: &str = "https://monitoring.googleapis.com";
const METRIC_PREFIX: &str = "compute.googleapis.com/instance/";
const PROVIDER: &str = "gcp";

fn default_region() -> String {
    "us-central1".to_string()
}

/// Ordered Compute Engine metric list written when none is configured.
pub fn default_metrics() -> Vec<MetricConfig> {
    [
        ("cpu/utilization", "cpuUtilization"),
        ("memory/balloon/ram_used", "ramUsed"),
        ("memory/balloon/ram_size", "ramSize"),
        ("network/received_bytes_count", "networkIn"),
        ("network/sent_bytes_count", "networkOut"),
        ("disk/average_io_latency", "averageIOLatency"),
        ("disk/read_bytes_count", "diskReadBytes"),
        ("disk/write_bytes_count", "diskWriteBytes"),
    ]
    .iter()
    .map(|(suffix, column)| MetricConfig::new(&format!("{METRIC_PREFIX}{suffix}"), column))
    .collect()
}

/// Compute Engine and Cloud Monitoring settings for the GCP lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpProviderConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Compute Engine list filter, e.g. `scheduling.preemptible = true`.
    #[serde(default)]
    pub instance_filter: Option<String>,
    /// Scheme and host replacing both `compute.googleapis.com` and
    /// `monitoring.googleapis.com`; API paths are kept.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricConfig>,
}

impl Default for GcpProviderConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            region: default_region(),
            instance_filter: None,
            endpoint: None,
            metrics: default_metrics(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegionResponse {
    #[serde(default)]
    zones: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceList {
    #[serde(default)]
    items: Vec<GceInstance>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GceInstance {
    id: String,
    name: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricDescriptorResponse {
    metric_kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeSeriesList {
    #[serde(default)]
    time_series: Vec<TimeSeries>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    #[serde(default)]
    points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct Point {
    interval: PointInterval,
    value: TypedValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointInterval {
    end_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypedValue {
    double_value: Option<f64>,
    /// int64 travels as a JSON string.
    int64_value: Option<serde_json::Value>,
}

impl TypedValue {
    fn as_f64(&self) -> Option<f64> {
        if let Some(v) = self.double_value {
            return Some(v);
        }
        match &self.int64_value {
            Some(serde_json::Value::String(s)) => s.parse::<i64>().ok().map(|v| v as f64),
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }
}

pub struct GcpCloudProvider {
    project_id: String,
    region: String,
    instance_filter: Option<String>,
    compute_endpoint: String,
    monitoring_endpoint: String,
    token_source: Arc<dyn TokenSource>,
    client: Client,
}

impl GcpCloudProvider {
    pub fn new(
        config: GcpProviderConfig,
        token_source: Arc<dyn TokenSource>,
        client: Client,
    ) -> Result<Self> {
        if config.project_id.trim().is_empty() {
            return Err(CloudError::ConfigError("gcp project_id must not be empty".to_string()));
        }
        if config.region.trim().is_empty() {
            return Err(CloudError::ConfigError("gcp region must not be empty".to_string()));
        }

        let endpoint = config.endpoint.map(|e| e.trim_end_matches('/').to_string());
        Ok(Self {
            project_id: config.project_id,
            region: config.region,
            instance_filter: config.instance_filter.filter(|f| !f.trim().is_empty()),
            compute_endpoint: endpoint
                .clone()
                .unwrap_or_else(|| COMPUTE_ENDPOINT.to_string()),
            monitoring_endpoint: endpoint.unwrap_or_else(|| MONITORING_ENDPOINT.to_string()),
            token_source,
            client,
        })
    }

    /// Authorized GET returning the decoded JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let token = self.token_source.token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Some((code, message)) = parse_error(&body) {
                return Err(CloudError::ApiResponseError {
                    provider: PROVIDER.to_string(),
                    code,
                    message,
                });
            }
            return Err(CloudError::HttpError {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Zone names of the configured region.
    async fn list_zones(&self) -> Result<Vec<String>> {
        let url = format!(
            "{}/compute/v1/projects/{}/regions/{}",
            self.compute_endpoint, self.project_id, self.region
        );
        let region: RegionResponse = self.get_json(&url, &[]).await?;

        Ok(region
            .zones
            .iter()
            .map(|zone| url_tail(zone).to_string())
            .collect())
    }

    async fn list_instances_in_zone(&self, zone: &str) -> Result<Vec<InstanceIdentity>> {
        let url = format!(
            "{}/compute/v1/projects/{}/zones/{}/instances",
            self.compute_endpoint, self.project_id, zone
        );
        let mut all_instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = Vec::new();
            if let Some(filter) = &self.instance_filter {
                query.push(("filter", filter.clone()));
            }
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let page: InstanceList = self.get_json(&url, &query).await?;
            all_instances.extend(page.items.into_iter().map(|inst| InstanceIdentity {
                id: inst.name,
                zone: zone.to_string(),
                state: inst.status,
                resource_id: inst.id,
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(all_instances)
    }
}

#[async_trait::async_trait]
impl CloudProvider for GcpCloudProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gcp
    }

    async fn describe_metric(&self, metric_name: &str) -> Result<String> {
        let url = format!(
            "{}/v3/projects/{}/metricDescriptors/{}",
            self.monitoring_endpoint, self.project_id, metric_name
        );
        let descriptor: MetricDescriptorResponse = self.get_json(&url, &[]).await?;

        descriptor.metric_kind.ok_or_else(|| CloudError::MalformedResponse {
            provider: PROVIDER.to_string(),
            detail: format!("descriptor for {metric_name} has no metricKind"),
        })
    }

    async fn list_instances(&self) -> Result<Vec<InstanceIdentity>> {
        let zones = self.list_zones().await?;
        let mut all_instances = Vec::new();

        for zone in &zones {
            let instances = self.list_instances_in_zone(zone).await?;
            tracing::debug!(zone = %zone, count = instances.len(), "Listed zone instances");
            all_instances.extend(instances);
        }

        tracing::info!(
            project = %self.project_id,
            region = %self.region,
            zones = zones.len(),
            count = all_instances.len(),
            "Listed Compute Engine instances"
        );

        Ok(all_instances)
    }

    async fn fetch_series(
        &self,
        instance: &InstanceIdentity,
        descriptor: &MetricDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<Series>> {
        let url = format!(
            "{}/v3/projects/{}/timeSeries",
            self.monitoring_endpoint, self.project_id
        );
        let filter = format!(
            "metric.type=\"{}\" AND resource.labels.instance_id=\"{}\" AND resource.labels.zone=\"{}\"",
            descriptor.name, instance.resource_id, instance.zone
        );

        let mut base_query = vec![
            ("filter", filter),
            (
                "interval.startTime",
                window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "interval.endTime",
                window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ];
        if let Some(aligner) = aligner_for(descriptor.aggregation) {
            base_query.push((
                "aggregation.alignmentPeriod",
                format!("{}s", window.sampling_period.as_secs().max(1)),
            ));
            base_query.push(("aggregation.perSeriesAligner", aligner.to_string()));
        }

        let mut all_series = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = base_query.clone();
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let page: TimeSeriesList = self.get_json(&url, &query).await?;
            // Kept apart per series: a metric split by device or label must
            // not have its buckets merged across series.
            all_series.extend(page.time_series.into_iter().map(|series| {
                series
                    .points
                    .into_iter()
                    .filter_map(|p| {
                        p.value.as_f64().map(|value| SeriesPoint {
                            timestamp: p.interval.end_time,
                            value,
                        })
                    })
                    .collect::<Series>()
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(all_series)
    }
}

fn aligner_for(kind: AggregationKind) -> Option<&'static str> {
    match kind {
        AggregationKind::Mean => Some("ALIGN_MEAN"),
        AggregationKind::Sum => Some("ALIGN_SUM"),
        AggregationKind::None => None,
    }
}

/// Last path segment of a resource URL such as
/// `https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a`.
fn url_tail(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// `(code, message)` of a Google API error body.
fn parse_error(body: &str) -> Option<(String, String)> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;
    let code = error
        .get("status")
        .and_then(|s| s.as_str())
        .map(str::to_string)
        .or_else(|| error.get("code").map(|c| c.to_string()))?;
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown")
        .to_string();
    Some((code, message))
}
