use crate::descriptor::DescriptorResolver;
use crate::error::CollectError;
use crate::{CloudProvider, InstanceIdentity};
use chrono::Utc;
use healthsnap_common::aggregation::reduce_series;
use healthsnap_common::types::{
    InstanceRecord, MetricDescriptor, ProviderKind, Snapshot, TimeWindow,
};
use std::sync::Arc;
use std::time::Duration;

/// Drives one provider through a full collection: descriptor resolution,
/// instance listing, then one scalar per (instance, metric) cell.
pub struct ProviderCollector {
    provider: Arc<dyn CloudProvider>,
    resolver: DescriptorResolver,
    metrics: Vec<String>,
    window_length: Duration,
    sampling_period: Duration,
}

impl ProviderCollector {
    /// `metrics` is the ordered metric list; its order becomes CSV column order.
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        metrics: Vec<String>,
        window_length: Duration,
        sampling_period: Duration,
    ) -> Self {
        Self {
            provider,
            resolver: DescriptorResolver::new(),
            metrics,
            window_length,
            sampling_period,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn resolver(&self) -> &DescriptorResolver {
        &self.resolver
    }

    /// Collect one snapshot.
    ///
    /// # Errors
    ///
    /// Fails as a whole when any descriptor cannot be resolved or the
    /// instance listing fails. Individual metric fetch failures never fail
    /// the collection; the affected cell is reported as `0.0`.
    pub async fn collect(&self) -> Result<Snapshot, CollectError> {
        let kind = self.provider.kind();

        let mut descriptors = Vec::with_capacity(self.metrics.len());
        for name in &self.metrics {
            let aggregation = self
                .resolver
                .resolve(self.provider.as_ref(), name)
                .await
                .map_err(|source| CollectError::DescriptorResolution {
                    metric: name.clone(),
                    source,
                })?;
            descriptors.push(MetricDescriptor {
                name: name.clone(),
                aggregation,
            });
        }

        let instances = self
            .provider
            .list_instances()
            .await
            .map_err(CollectError::Listing)?;
        tracing::info!(
            provider = %kind,
            count = instances.len(),
            "Discovered instances"
        );

        let captured_at = Utc::now();
        let window = TimeWindow::trailing(captured_at, self.window_length, self.sampling_period);

        let mut records = Vec::with_capacity(instances.len());
        for instance in instances {
            let mut metrics = Vec::with_capacity(descriptors.len());
            for descriptor in &descriptors {
                let value = self.fetch_scalar(&instance, descriptor, &window).await;
                metrics.push((descriptor.name.clone(), value));
            }
            records.push(InstanceRecord {
                id: instance.id,
                zone: instance.zone,
                state: instance.state,
                metrics,
            });
        }

        tracing::info!(
            provider = %kind,
            records = records.len(),
            metrics = descriptors.len(),
            "Collected snapshot"
        );

        Ok(Snapshot {
            provider: kind,
            captured_at,
            records,
        })
    }

    /// Fetch and reduce one cell. Empty series and fetch errors yield `0.0`.
    pub async fn fetch_scalar(
        &self,
        instance: &InstanceIdentity,
        descriptor: &MetricDescriptor,
        window: &TimeWindow,
    ) -> f64 {
        match self.provider.fetch_series(instance, descriptor, window).await {
            Ok(series) if series.iter().all(Vec::is_empty) => {
                tracing::warn!(
                    provider = %self.provider.kind(),
                    instance = %instance.id,
                    metric = %descriptor.name,
                    "No datapoints in window, reporting 0.0"
                );
                0.0
            }
            Ok(series) => reduce_series(descriptor.aggregation, &series, window),
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider.kind(),
                    instance = %instance.id,
                    metric = %descriptor.name,
                    error = %e,
                    "Failed to fetch metric, reporting 0.0"
                );
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CloudError, Result};
    use healthsnap_common::types::{Series, SeriesPoint};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProvider {
        instances: std::result::Result<Vec<InstanceIdentity>, String>,
        /// (instance id, metric) → value; absent cells fail.
        values: HashMap<(String, String), f64>,
        unknown_metric: Option<String>,
        lookups: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl MockProvider {
        fn new(instances: Vec<InstanceIdentity>) -> Self {
            Self {
                instances: Ok(instances),
                values: HashMap::new(),
                unknown_metric: None,
                lookups: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
            }
        }

        fn with_value(mut self, instance: &str, metric: &str, value: f64) -> Self {
            self.values
                .insert((instance.to_string(), metric.to_string()), value);
            self
        }
    }

    #[async_trait::async_trait]
    impl CloudProvider for MockProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Aws
        }

        async fn describe_metric(&self, metric_name: &str) -> Result<String> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.unknown_metric.as_deref() == Some(metric_name) {
                return Err(CloudError::ConfigError(format!("no such metric {metric_name}")));
            }
            Ok("GAUGE".to_string())
        }

        async fn list_instances(&self) -> Result<Vec<InstanceIdentity>> {
            self.instances
                .clone()
                .map_err(CloudError::ConfigError)
        }

        async fn fetch_series(
            &self,
            instance: &InstanceIdentity,
            descriptor: &MetricDescriptor,
            window: &TimeWindow,
        ) -> Result<Vec<Series>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self
                .values
                .get(&(instance.id.clone(), descriptor.name.clone()))
            {
                Some(value) => Ok(vec![vec![SeriesPoint {
                    timestamp: window.start,
                    value: *value,
                }]]),
                None => Err(CloudError::HttpError {
                    provider: "aws".to_string(),
                    status: 500,
                    body: "boom".to_string(),
                }),
            }
        }
    }

    fn identity(id: &str, zone: &str) -> InstanceIdentity {
        InstanceIdentity {
            id: id.to_string(),
            zone: zone.to_string(),
            state: "running".to_string(),
            resource_id: id.to_string(),
        }
    }

    fn collector(provider: MockProvider, metrics: &[&str]) -> (Arc<MockProvider>, ProviderCollector) {
        let provider = Arc::new(provider);
        let collector = ProviderCollector::new(
            provider.clone(),
            metrics.iter().map(|m| m.to_string()).collect(),
            Duration::from_secs(300),
            Duration::from_secs(60),
        );
        (provider, collector)
    }

    #[tokio::test]
    async fn records_follow_listing_and_metric_order() {
        let provider = MockProvider::new(vec![identity("id1", "zoneA"), identity("id2", "zoneB")])
            .with_value("id1", "cpu", 10.5)
            .with_value("id1", "net", 200.0)
            .with_value("id2", "cpu", 20.0)
            .with_value("id2", "net", 0.0);
        let (_, collector) = collector(provider, &["cpu", "net"]);

        let snapshot = collector.collect().await.unwrap();

        assert_eq!(snapshot.provider, ProviderKind::Aws);
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.records[0].id, "id1");
        assert_eq!(snapshot.records[0].zone, "zoneA");
        assert_eq!(
            snapshot.records[0].metrics,
            vec![("cpu".to_string(), 10.5), ("net".to_string(), 200.0)]
        );
        assert_eq!(
            snapshot.records[1].metrics,
            vec![("cpu".to_string(), 20.0), ("net".to_string(), 0.0)]
        );
    }

    #[tokio::test]
    async fn failed_cell_defaults_to_zero_without_touching_other_cells() {
        let provider = MockProvider::new(vec![identity("id1", "a"), identity("id2", "b")])
            .with_value("id1", "cpu", 1.0)
            .with_value("id2", "cpu", 2.0)
            .with_value("id2", "net", 3.0);
        let (_, collector) = collector(provider, &["cpu", "net"]);

        let snapshot = collector.collect().await.unwrap();

        assert_eq!(snapshot.records[0].metric("cpu"), Some(1.0));
        assert_eq!(snapshot.records[0].metric("net"), Some(0.0));
        assert_eq!(snapshot.records[1].metric("cpu"), Some(2.0));
        assert_eq!(snapshot.records[1].metric("net"), Some(3.0));
    }

    #[tokio::test]
    async fn listing_failure_fails_the_collection() {
        let mut provider = MockProvider::new(vec![]);
        provider.instances = Err("describe failed".to_string());
        let (provider, collector) = collector(provider, &["cpu"]);

        let err = collector.collect().await.unwrap_err();

        assert!(matches!(err, CollectError::Listing(_)));
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn descriptor_failure_aborts_before_listing() {
        let mut provider = MockProvider::new(vec![identity("id1", "a")]);
        provider.unknown_metric = Some("net".to_string());
        let (provider, collector) = collector(provider, &["cpu", "net"]);

        let err = collector.collect().await.unwrap_err();

        match err {
            CollectError::DescriptorResolution { metric, .. } => assert_eq!(metric, "net"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn descriptors_are_resolved_once_across_collections() {
        let provider = MockProvider::new(vec![identity("id1", "a")]).with_value("id1", "cpu", 1.0);
        let (provider, collector) = collector(provider, &["cpu"]);

        collector.collect().await.unwrap();
        collector.collect().await.unwrap();

        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(collector.resolver().len(), 1);
    }
}
