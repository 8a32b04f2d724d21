use crate::error::Result;
use crate::CloudProvider;
use healthsnap_common::types::AggregationKind;
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-lifetime cache of metric name → aggregation kind.
///
/// The first lookup for a name asks the provider's metadata source; later
/// lookups are served from the cache. Failures are not cached, so the next
/// tick retries them.
#[derive(Default)]
pub struct DescriptorResolver {
    cache: Mutex<HashMap<String, AggregationKind>>,
}

impl DescriptorResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve(
        &self,
        provider: &dyn CloudProvider,
        metric_name: &str,
    ) -> Result<AggregationKind> {
        if let Some(kind) = self.cached(metric_name) {
            return Ok(kind);
        }

        let metric_kind = provider.describe_metric(metric_name).await?;
        let kind = AggregationKind::from_metric_kind(&metric_kind);
        tracing::debug!(
            provider = %provider.kind(),
            metric = metric_name,
            metric_kind = %metric_kind,
            aggregation = %kind,
            "Resolved metric descriptor"
        );

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        Ok(*cache.entry(metric_name.to_string()).or_insert(kind))
    }

    pub fn cached(&self, metric_name: &str) -> Option<AggregationKind> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(metric_name)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use crate::InstanceIdentity;
    use healthsnap_common::types::{MetricDescriptor, ProviderKind, Series, TimeWindow};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MetadataOnly {
        lookups: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CloudProvider for MetadataOnly {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Gcp
        }

        async fn describe_metric(&self, metric_name: &str) -> Result<String> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match metric_name {
                "cpu" => Ok("GAUGE".to_string()),
                "bytes" => Ok("CUMULATIVE".to_string()),
                "delta" => Ok("DELTA".to_string()),
                _ => Err(CloudError::ApiResponseError {
                    provider: "gcp".to_string(),
                    code: "404".to_string(),
                    message: "not found".to_string(),
                }),
            }
        }

        async fn list_instances(&self) -> Result<Vec<InstanceIdentity>> {
            Ok(vec![])
        }

        async fn fetch_series(
            &self,
            _instance: &InstanceIdentity,
            _descriptor: &MetricDescriptor,
            _window: &TimeWindow,
        ) -> Result<Vec<Series>> {
            Ok(vec![])
        }
    }

    fn provider() -> MetadataOnly {
        MetadataOnly {
            lookups: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn repeated_resolution_hits_metadata_once() {
        let provider = provider();
        let resolver = DescriptorResolver::new();

        for _ in 0..5 {
            assert_eq!(
                resolver.resolve(&provider, "cpu").await.unwrap(),
                AggregationKind::Mean
            );
        }

        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn metric_kinds_map_to_aggregation() {
        let provider = provider();
        let resolver = DescriptorResolver::new();

        assert_eq!(resolver.resolve(&provider, "bytes").await.unwrap(), AggregationKind::Sum);
        assert_eq!(resolver.resolve(&provider, "delta").await.unwrap(), AggregationKind::None);
        assert_eq!(resolver.len(), 2);
    }

    #[tokio::test]
    async fn failed_lookup_is_not_cached() {
        let provider = provider();
        let resolver = DescriptorResolver::new();

        assert!(resolver.resolve(&provider, "missing").await.is_err());
        assert!(resolver.resolve(&provider, "missing").await.is_err());

        assert_eq!(provider.lookups.load(Ordering::SeqCst), 2);
        assert!(resolver.is_empty());
    }
}
