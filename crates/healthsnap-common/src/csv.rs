//! Deterministic CSV rendering of a [`Snapshot`].
//!
//! Identity fields are written verbatim; provider identifiers never contain
//! commas, so no quoting or escaping is applied.

use crate::types::{InstanceRecord, Snapshot};

/// Builds the header line: identity columns first, then metric columns in
/// configured order.
///
/// # Examples
///
/// ```
/// use healthsnap_common::csv::header;
///
/// let line = header(&["instanceId", "availabilityZone", "state"], ["cpu", "net"]);
/// assert_eq!(line, "instanceId,availabilityZone,state,cpu,net");
/// ```
pub fn header<'a>(
    identity_columns: &[&'a str],
    metric_columns: impl IntoIterator<Item = &'a str>,
) -> String {
    identity_columns
        .iter()
        .copied()
        .chain(metric_columns)
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders `snapshot` as the header line followed by one line per record.
///
/// Lines are separated by `\n` with no trailing newline.
pub fn encode(snapshot: &Snapshot, header: &str) -> String {
    let mut lines = Vec::with_capacity(snapshot.records.len() + 1);
    lines.push(header.to_string());
    lines.extend(snapshot.records.iter().map(encode_record));
    lines.join("\n")
}

fn encode_record(record: &InstanceRecord) -> String {
    let mut fields = Vec::with_capacity(3 + record.metrics.len());
    fields.push(record.id.clone());
    fields.push(record.zone.clone());
    fields.push(record.state.clone());
    fields.extend(record.metrics.iter().map(|(_, value)| format_value(*value)));
    fields.join(",")
}

/// Plain decimal rendering of a metric value.
///
/// Uses the shortest representation that parses back to the same `f64`,
/// never exponent notation, and keeps a `.0` on integral values.
///
/// # Examples
///
/// ```
/// use healthsnap_common::csv::format_value;
///
/// assert_eq!(format_value(10.5), "10.5");
/// assert_eq!(format_value(200.0), "200.0");
/// assert_eq!(format_value(0.0), "0.0");
/// assert_eq!(format_value(1e21), "1000000000000000000000.0");
/// ```
pub fn format_value(value: f64) -> String {
    let mut text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        text.push_str(".0");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use chrono::Utc;

    fn record(id: &str, zone: &str, metrics: &[(&str, f64)]) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            zone: zone.to_string(),
            state: "running".to_string(),
            metrics: metrics
                .iter()
                .map(|(name, value)| ((*name).to_string(), *value))
                .collect(),
        }
    }

    fn snapshot(records: Vec<InstanceRecord>) -> Snapshot {
        Snapshot {
            provider: ProviderKind::Aws,
            captured_at: Utc::now(),
            records,
        }
    }

    #[test]
    fn two_instance_scenario_encodes_exactly() {
        let snap = snapshot(vec![
            record("id1", "zoneA", &[("cpu", 10.5), ("net", 200.0)]),
            record("id2", "zoneB", &[("cpu", 20.0), ("net", 0.0)]),
        ]);
        let head = header(&["id", "zone", "state"], ["cpu", "net"]);

        assert_eq!(
            encode(&snap, &head),
            "id,zone,state,cpu,net\nid1,zoneA,running,10.5,200.0\nid2,zoneB,running,20.0,0.0"
        );
    }

    #[test]
    fn line_and_field_counts_follow_records_and_metrics() {
        let metrics = [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)];
        let records: Vec<_> = (0..7)
            .map(|i| record(&format!("i-{i}"), "z", &metrics))
            .collect();
        let head = header(&["id", "zone", "state"], ["a", "b", "c", "d"]);
        let text = encode(&snapshot(records), &head);

        let lines: Vec<&str> = text.split('\n').collect();
        assert_eq!(lines.len(), 8);
        for line in &lines[1..] {
            assert_eq!(line.split(',').count(), 3 + metrics.len());
        }
    }

    #[test]
    fn empty_snapshot_is_header_only() {
        let head = header(&["id", "zone", "state"], ["cpu"]);
        assert_eq!(encode(&snapshot(vec![]), &head), "id,zone,state,cpu");
    }

    #[test]
    fn parsed_values_match_the_input_scalars() {
        let values = [
            0.1,
            1.0 / 3.0,
            123_456_789.123_456_78,
            1e-9,
            6.02e23,
            -42.25,
            f64::MAX,
            f64::MIN_POSITIVE,
        ];
        let metrics: Vec<(String, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("m{i}"), *v))
            .collect();
        let snap = snapshot(vec![InstanceRecord {
            id: "i-1".into(),
            zone: "z".into(),
            state: "running".into(),
            metrics,
        }]);
        let names: Vec<String> = (0..values.len()).map(|i| format!("m{i}")).collect();
        let head = header(&["id", "zone", "state"], names.iter().map(String::as_str));

        let text = encode(&snap, &head);
        let row = text.lines().nth(1).unwrap();
        let parsed: Vec<f64> = row
            .split(',')
            .skip(3)
            .map(|field| field.parse().unwrap())
            .collect();

        assert_eq!(parsed, values);
        assert!(!row.contains('e'));
    }

    #[test]
    fn encoding_is_deterministic() {
        let snap = snapshot(vec![record("i-1", "z", &[("cpu", 0.3)])]);
        assert_eq!(encode(&snap, "h"), encode(&snap, "h"));
    }
}
