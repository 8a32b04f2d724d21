use crate::error::{CloudError, Result};
use crate::{CloudProvider, InstanceIdentity, MetricConfig};
use chrono::{DateTime, SecondsFormat, Utc};
use healthsnap_common::credentials::AwsCredentials;
use healthsnap_common::sigv4::{self, SigningRequest, EMPTY_PAYLOAD_SHA256};
use healthsnap_common::types::{
    AggregationKind, MetricDescriptor, ProviderKind, Series, SeriesPoint, TimeWindow,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const EC2_VERSION: &str = "2016-11-15";
const MONITORING_VERSION: &str = "2010-08-01";
const EC2_NAMESPACE: &str = "AWS/EC2";
const PAGE_SIZE: &str = "100";
const PROVIDER: &str = "aws";

const INSTANCE_PATH: &str = "DescribeInstancesResponse/reservationSet/item/instancesSet/item";

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Ordered EC2 metric list written when none is configured.
pub fn default_metrics() -> Vec<MetricConfig> {
    vec![
        MetricConfig::new("CPUUtilization", "cpuUtilization"),
        MetricConfig::new("NetworkIn", "networkIn"),
        MetricConfig::new("NetworkOut", "networkOut"),
        MetricConfig::new("DiskReadBytes", "diskReadBytes"),
        MetricConfig::new("DiskWriteBytes", "diskWriteBytes"),
    ]
}

/// EC2 and CloudWatch settings for the AWS lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsProviderConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// `instance-state-name` filter values; empty lists every state.
    #[serde(default)]
    pub instance_states: Vec<String>,
    /// Base URL replacing both `https://ec2.{region}.amazonaws.com` and
    /// `https://monitoring.{region}.amazonaws.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricConfig>,
}

impl Default for AwsProviderConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            instance_states: Vec::new(),
            endpoint: None,
            metrics: default_metrics(),
        }
    }
}

pub struct AwsCloudProvider {
    region: String,
    instance_states: Vec<String>,
    endpoint: Option<String>,
    metrics: Vec<MetricConfig>,
    credentials: AwsCredentials,
    client: Client,
}

impl AwsCloudProvider {
    pub fn new(config: AwsProviderConfig, credentials: AwsCredentials, client: Client) -> Result<Self> {
        if config.region.trim().is_empty() {
            return Err(CloudError::ConfigError("aws region must not be empty".to_string()));
        }

        Ok(Self {
            region: config.region,
            instance_states: config.instance_states,
            endpoint: config
                .endpoint
                .map(|e| e.trim_end_matches('/').to_string()),
            metrics: config.metrics,
            credentials,
            client,
        })
    }

    fn service_endpoint(&self, service: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.{}.amazonaws.com", service, self.region),
        }
    }

    /// Signed GET against a Query API (`Action` + `Version` in the query string).
    async fn call_query_api(
        &self,
        service: &str,
        action: &str,
        version: &str,
        params: Vec<(String, String)>,
    ) -> Result<String> {
        let endpoint = self.service_endpoint(service);
        let host = sigv4::host_header(&endpoint)?;

        let mut query = vec![
            ("Action".to_string(), action.to_string()),
            ("Version".to_string(), version.to_string()),
        ];
        query.extend(params);

        let request = SigningRequest {
            method: "GET",
            host: &host,
            path: "/",
            query: &query,
            headers: &[],
            payload_sha256: EMPTY_PAYLOAD_SHA256,
        };
        let signed = sigv4::sign(&self.credentials, &self.region, service, &request, Utc::now())?;

        let url = format!("{}/?{}", endpoint, sigv4::canonical_query(&query));
        let mut builder = self.client.get(&url);
        for (name, value) in &signed {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
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

        tracing::debug!(service = service, action = action, "AWS API call succeeded");
        Ok(body)
    }

    fn declared_kind(&self, metric_name: &str) -> Option<&str> {
        self.metrics
            .iter()
            .find(|m| m.name == metric_name)
            .and_then(|m| m.kind.as_deref())
    }
}

#[async_trait::async_trait]
impl CloudProvider for AwsCloudProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Aws
    }

    /// CloudWatch exposes no metric-kind metadata, so the kind comes from
    /// configuration. EC2 metrics are gauges unless declared otherwise.
    async fn describe_metric(&self, metric_name: &str) -> Result<String> {
        Ok(self
            .declared_kind(metric_name)
            .unwrap_or("GAUGE")
            .to_uppercase())
    }

    async fn list_instances(&self) -> Result<Vec<InstanceIdentity>> {
        let mut all_instances = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut params = vec![("MaxResults".to_string(), PAGE_SIZE.to_string())];
            if !self.instance_states.is_empty() {
                params.push(("Filter.1.Name".to_string(), "instance-state-name".to_string()));
                for (i, state) in self.instance_states.iter().enumerate() {
                    params.push((format!("Filter.1.Value.{}", i + 1), state.clone()));
                }
            }
            if let Some(token) = &next_token {
                params.push(("NextToken".to_string(), token.clone()));
            }

            let body = self
                .call_query_api("ec2", "DescribeInstances", EC2_VERSION, params)
                .await?;
            let page = parse_describe_instances(&body)?;
            all_instances.extend(page.instances);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        tracing::info!(
            region = %self.region,
            count = all_instances.len(),
            "Listed EC2 instances"
        );

        Ok(all_instances)
    }

    async fn fetch_series(
        &self,
        instance: &InstanceIdentity,
        descriptor: &MetricDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<Series>> {
        let statistic = statistic_for(descriptor.aggregation);
        let period = window.sampling_period.as_secs().max(1);

        let params = vec![
            ("Namespace".to_string(), EC2_NAMESPACE.to_string()),
            ("MetricName".to_string(), descriptor.name.clone()),
            ("Dimensions.member.1.Name".to_string(), "InstanceId".to_string()),
            ("Dimensions.member.1.Value".to_string(), instance.resource_id.clone()),
            (
                "StartTime".to_string(),
                window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "EndTime".to_string(),
                window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("Period".to_string(), period.to_string()),
            ("Statistics.member.1".to_string(), statistic.to_string()),
        ];

        let body = self
            .call_query_api("monitoring", "GetMetricStatistics", MONITORING_VERSION, params)
            .await?;
        // The InstanceId dimension selects exactly one CloudWatch series.
        Ok(vec![parse_metric_statistics(&body, statistic)?])
    }
}

/// CloudWatch statistic requested for a reduction policy. Raw series have no
/// CloudWatch equivalent and fall back to `Average` at the sampling period.
fn statistic_for(kind: AggregationKind) -> &'static str {
    match kind {
        AggregationKind::Sum => "Sum",
        AggregationKind::Mean | AggregationKind::None => "Average",
    }
}

#[derive(Debug, Default)]
struct InstancePage {
    instances: Vec<InstanceIdentity>,
    next_token: Option<String>,
}

#[derive(Default)]
struct PartialInstance {
    id: Option<String>,
    zone: String,
    state: String,
}

fn xml_error(e: impl std::fmt::Display) -> CloudError {
    CloudError::XmlError(e.to_string())
}

enum XmlNode<'a> {
    Text { path: &'a str, text: String },
    End { path: &'a str },
}

/// Walks `xml` and reports every text node and closing element together with
/// its slash-joined path of local element names.
fn walk_xml(xml: &str, mut visit: impl FnMut(XmlNode<'_>) -> Result<()>) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned())
            }
            Ok(Event::End(_)) => {
                visit(XmlNode::End {
                    path: &path.join("/"),
                })?;
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(xml_error)?.into_owned();
                visit(XmlNode::Text {
                    path: &path.join("/"),
                    text,
                })?;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parse_describe_instances(xml: &str) -> Result<InstancePage> {
    let id_path = format!("{INSTANCE_PATH}/instanceId");
    let state_path = format!("{INSTANCE_PATH}/instanceState/name");
    let zone_path = format!("{INSTANCE_PATH}/placement/availabilityZone");

    let mut next_token = None;
    let mut current = PartialInstance::default();
    let mut finished: Vec<PartialInstance> = Vec::new();

    walk_xml(xml, |node| {
        match node {
            XmlNode::Text { path, text } => {
                if path == id_path {
                    current.id = Some(text);
                } else if path == state_path {
                    current.state = text;
                } else if path == zone_path {
                    current.zone = text;
                } else if path == "DescribeInstancesResponse/nextToken" {
                    next_token = Some(text);
                }
            }
            XmlNode::End { path } if path == INSTANCE_PATH => {
                finished.push(std::mem::take(&mut current));
            }
            XmlNode::End { .. } => {}
        }
        Ok(())
    })?;

    let mut instances = Vec::with_capacity(finished.len());
    for partial in finished {
        let id = partial.id.ok_or_else(|| CloudError::MalformedResponse {
            provider: PROVIDER.to_string(),
            detail: "instance without instanceId".to_string(),
        })?;
        instances.push(InstanceIdentity {
            resource_id: id.clone(),
            id,
            zone: partial.zone,
            state: partial.state,
        });
    }

    Ok(InstancePage {
        instances,
        next_token,
    })
}

fn parse_metric_statistics(xml: &str, statistic: &str) -> Result<Vec<SeriesPoint>> {
    const MEMBER: &str = "GetMetricStatisticsResponse/GetMetricStatisticsResult/Datapoints/member";
    let timestamp_path = format!("{MEMBER}/Timestamp");
    let value_path = format!("{MEMBER}/{statistic}");

    let mut points = Vec::new();
    let mut timestamp: Option<DateTime<Utc>> = None;
    let mut value: Option<f64> = None;

    walk_xml(xml, |node| {
        match node {
            XmlNode::Text { path, text } if path == timestamp_path => {
                let parsed = DateTime::parse_from_rfc3339(&text).map_err(|e| {
                    CloudError::MalformedResponse {
                        provider: PROVIDER.to_string(),
                        detail: format!("bad datapoint timestamp {text}: {e}"),
                    }
                })?;
                timestamp = Some(parsed.with_timezone(&Utc));
            }
            XmlNode::Text { path, text } if path == value_path => {
                let parsed = text.parse::<f64>().map_err(|e| CloudError::MalformedResponse {
                    provider: PROVIDER.to_string(),
                    detail: format!("bad datapoint value {text}: {e}"),
                })?;
                value = Some(parsed);
            }
            XmlNode::End { path } if path == MEMBER => {
                if let (Some(timestamp), Some(value)) = (timestamp.take(), value.take()) {
                    points.push(SeriesPoint { timestamp, value });
                }
            }
            _ => {}
        }
        Ok(())
    })?;

    // CloudWatch returns datapoints in no particular order.
    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

/// `(Code, Message)` of an EC2 (`Response/Errors/Error`) or CloudWatch
/// (`ErrorResponse/Error`) error document.
fn parse_error(xml: &str) -> Option<(String, String)> {
    let mut code = None;
    let mut message = None;

    walk_xml(xml, |node| {
        if let XmlNode::Text { path, text } = node {
            if path.ends_with("Error/Code") && code.is_none() {
                code = Some(text);
            } else if path.ends_with("Error/Message") && message.is_none() {
                message = Some(text);
            }
        }
        Ok(())
    })
    .ok()?;

    code.map(|code| (code, message.unwrap_or_else(|| "Unknown".to_string())))
}
