use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cloud vendor a lane collects from and publishes to.
///
/// # Examples
///
/// ```
/// use healthsnap_common::types::ProviderKind;
///
/// let kind: ProviderKind = "gcp".parse().unwrap();
/// assert_eq!(kind, ProviderKind::Gcp);
/// assert_eq!(ProviderKind::Aws.to_string(), "aws");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Gcp,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Aws => write!(f, "aws"),
            ProviderKind::Gcp => write!(f, "gcp"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(ProviderKind::Aws),
            "gcp" => Ok(ProviderKind::Gcp),
            _ => Err(format!("unknown provider: {s}")),
        }
    }
}

/// Reduction policy applied to a raw metric series before scalar extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    /// Points in one sampling bucket are averaged.
    Mean,
    /// Points in one sampling bucket are summed.
    Sum,
    /// No alignment; every raw point is its own bucket.
    None,
}

impl AggregationKind {
    /// Maps a provider-reported metric kind onto a reduction policy.
    ///
    /// # Examples
    ///
    /// ```
    /// use healthsnap_common::types::AggregationKind;
    ///
    /// assert_eq!(AggregationKind::from_metric_kind("GAUGE"), AggregationKind::Mean);
    /// assert_eq!(AggregationKind::from_metric_kind("CUMULATIVE"), AggregationKind::Sum);
    /// assert_eq!(AggregationKind::from_metric_kind("DELTA"), AggregationKind::None);
    /// ```
    pub fn from_metric_kind(kind: &str) -> Self {
        match kind.trim().to_uppercase().as_str() {
            "GAUGE" => AggregationKind::Mean,
            "CUMULATIVE" => AggregationKind::Sum,
            _ => AggregationKind::None,
        }
    }
}

impl std::fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationKind::Mean => write!(f, "mean"),
            AggregationKind::Sum => write!(f, "sum"),
            AggregationKind::None => write!(f, "none"),
        }
    }
}

/// A metric name paired with its resolved reduction policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub aggregation: AggregationKind,
}

/// One raw sample returned by a provider's metric API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Points of one provider time series, in the order the provider returned them.
pub type Series = Vec<SeriesPoint>;

/// Trailing query window, split into buckets of `sampling_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sampling_period: Duration,
}

impl TimeWindow {
    /// Window of `length` ending at `end`.
    pub fn trailing(end: DateTime<Utc>, length: Duration, sampling_period: Duration) -> Self {
        let length = chrono::Duration::from_std(length).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            start: end - length,
            end,
            sampling_period,
        }
    }

    /// Index of the sampling bucket `timestamp` falls into, relative to `start`.
    pub fn bucket_of(&self, timestamp: DateTime<Utc>) -> i64 {
        let period_ms = i64::try_from(self.sampling_period.as_millis())
            .unwrap_or(i64::MAX)
            .max(1);
        (timestamp - self.start)
            .num_milliseconds()
            .div_euclid(period_ms)
    }
}

/// A single CSV row: instance identity followed by the configured metrics.
///
/// Metric order follows the configured metric list and is identical for
/// every record of one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub id: String,
    pub zone: String,
    pub state: String,
    pub metrics: Vec<(String, f64)>,
}

impl InstanceRecord {
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|(name, _)| name.as_str())
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(metric, _)| metric == name)
            .map(|(_, value)| *value)
    }
}

/// Every instance record captured by one lane in one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub provider: ProviderKind,
    pub captured_at: DateTime<Utc>,
    pub records: Vec<InstanceRecord>,
}

/// Bucket and object key a lane's CSV document is written to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublishTarget {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}
