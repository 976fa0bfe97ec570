//! Fetch-and-store for a single `(sensor, sub-interval)` chunk (C5).

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::ChunkOutcome;
use crate::models::{NewMeasurement, RawMeasurement};
use crate::opensensemap::OpenSenseMapClient;
use crate::store::SensorStore;

/// Fetches one sub-interval of one sensor's data and persists it.
///
/// Malformed rows (unparseable `createdAt` or `value`) are skipped and
/// counted rather than failing the whole chunk; a chunk only fails on a
/// transport/HTTP/store error, never on a handful of bad rows.
pub async fn fetch_and_store(
    client: &OpenSenseMapClient,
    store: &dyn SensorStore,
    box_id: &str,
    sensor_id: &str,
    chunk_from: DateTime<Utc>,
    chunk_to: DateTime<Utc>,
) -> ChunkOutcome {
    let raw = match client
        .fetch_measurements(box_id, sensor_id, chunk_from, chunk_to)
        .await
    {
        Ok(raw) => raw,
        Err(e) => return ChunkOutcome::failed(sensor_id, chunk_from, chunk_to, e.to_string()),
    };

    let (measurements, skipped) = parse_and_filter(sensor_id, &raw, chunk_from, chunk_to);

    let outcome = store.bulk_insert_measurements(&measurements).await;
    match outcome {
        Ok(result) => {
            let last_ts = measurements.iter().map(|m| m.measurement_timestamp).max();
            ChunkOutcome::success(
                sensor_id,
                chunk_from,
                chunk_to,
                result.inserted,
                skipped,
                last_ts,
            )
        }
        Err(e) => ChunkOutcome::failed(sensor_id, chunk_from, chunk_to, e.to_string()),
    }
}

/// Parses raw rows into store-ready measurements, skipping and counting any
/// row with an unparseable timestamp/value or one outside the requested
/// window (a defensive check against a misbehaving upstream).
fn parse_and_filter(
    sensor_id: &str,
    raw: &[RawMeasurement],
    chunk_from: DateTime<Utc>,
    chunk_to: DateTime<Utc>,
) -> (Vec<NewMeasurement>, u64) {
    let mut measurements = Vec::with_capacity(raw.len());
    let mut skipped = 0u64;

    for row in raw {
        let parsed = row
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .zip(row.value.as_ref().and_then(value_as_f64));

        match parsed {
            Some((ts, value)) if ts >= chunk_from && ts < chunk_to => {
                measurements.push(NewMeasurement {
                    sensor_id: sensor_id.to_string(),
                    value,
                    measurement_timestamp: ts,
                });
            }
            Some(_) => {
                warn!(sensor_id, "measurement timestamp outside requested window, skipping");
                skipped += 1;
            }
            None => {
                skipped += 1;
            }
        }
    }

    (measurements, skipped)
}

fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let from = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let to = DateTime::parse_from_rfc3339("2025-01-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        (from, to)
    }

    #[test]
    fn skips_rows_with_missing_fields() {
        let (from, to) = window();
        let raw = vec![
            RawMeasurement {
                created_at: Some("2025-01-01T12:00:00Z".into()),
                value: Some(serde_json::json!("21.5")),
            },
            RawMeasurement {
                created_at: None,
                value: Some(serde_json::json!("21.5")),
            },
            RawMeasurement {
                created_at: Some("2025-01-01T12:05:00Z".into()),
                value: None,
            },
        ];
        let (kept, skipped) = parse_and_filter("s1", &raw, from, to);
        assert_eq!(kept.len(), 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn skips_rows_outside_requested_window() {
        let (from, to) = window();
        let raw = vec![RawMeasurement {
            created_at: Some("2024-12-31T00:00:00Z".into()),
            value: Some(serde_json::json!(1.0)),
        }];
        let (kept, skipped) = parse_and_filter("s1", &raw, from, to);
        assert!(kept.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn parses_numeric_and_string_values() {
        let (from, to) = window();
        let raw = vec![
            RawMeasurement {
                created_at: Some("2025-01-01T01:00:00Z".into()),
                value: Some(serde_json::json!(3.5)),
            },
            RawMeasurement {
                created_at: Some("2025-01-01T02:00:00Z".into()),
                value: Some(serde_json::json!("4.5")),
            },
        ];
        let (kept, skipped) = parse_and_filter("s1", &raw, from, to);
        assert_eq!(skipped, 0);
        assert_eq!(kept[0].value, 3.5);
        assert_eq!(kept[1].value, 4.5);
    }
}
