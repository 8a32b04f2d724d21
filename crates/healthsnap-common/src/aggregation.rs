//! Collapses a raw metric series into the single scalar written to CSV.

use crate::types::{AggregationKind, Series, SeriesPoint, TimeWindow};
use std::collections::BTreeMap;

/// Aligns `points` into sampling buckets according to `kind`, then returns
/// the maximum bucket value. An empty series reduces to `0.0`.
///
/// Non-finite samples are ignored.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use healthsnap_common::aggregation::reduce;
/// use healthsnap_common::types::{AggregationKind, SeriesPoint, TimeWindow};
///
/// let end = Utc::now();
/// let window = TimeWindow::trailing(
///     end,
///     std::time::Duration::from_secs(300),
///     std::time::Duration::from_secs(60),
/// );
/// let points = [
///     SeriesPoint { timestamp: window.start + Duration::seconds(5), value: 2.0 },
///     SeriesPoint { timestamp: window.start + Duration::seconds(10), value: 4.0 },
///     SeriesPoint { timestamp: window.start + Duration::seconds(70), value: 5.0 },
/// ];
/// assert_eq!(reduce(AggregationKind::Sum, &points, &window), 6.0);
/// assert_eq!(reduce(AggregationKind::Mean, &points, &window), 5.0);
/// assert_eq!(reduce(AggregationKind::None, &[], &window), 0.0);
/// ```
pub fn reduce(kind: AggregationKind, points: &[SeriesPoint], window: &TimeWindow) -> f64 {
    let samples = points.iter().filter(|p| p.value.is_finite());

    let buckets: Vec<f64> = match kind {
        AggregationKind::None => samples.map(|p| p.value).collect(),
        AggregationKind::Mean | AggregationKind::Sum => {
            let mut grouped: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
            for point in samples {
                let entry = grouped
                    .entry(window.bucket_of(point.timestamp))
                    .or_insert((0.0, 0));
                entry.0 += point.value;
                entry.1 += 1;
            }
            grouped
                .into_values()
                .map(|(sum, count)| {
                    if kind == AggregationKind::Mean {
                        sum / f64::from(count)
                    } else {
                        sum
                    }
                })
                .collect()
        }
    };

    buckets.into_iter().reduce(f64::max).unwrap_or(0.0)
}

/// Reduces each series on its own and returns the largest result.
///
/// Buckets are never merged across series: two disks reporting in the same
/// minute yield the busier disk, not their total. Empty series are skipped,
/// and no non-empty series reduces to `0.0`.
pub fn reduce_series(kind: AggregationKind, series: &[Series], window: &TimeWindow) -> f64 {
    series
        .iter()
        .filter(|points| !points.is_empty())
        .map(|points| reduce(kind, points, window))
        .reduce(f64::max)
        .unwrap_or(0.0)
}
