//! C6: discovers the missing window via watermark bookkeeping, enumerates
//! sensors, and fans out bounded-parallel chunk fetches.
//!
//! Sub-intervals are processed in strict ascending order. The worker pool
//! (size `chunk_concurrency`) only ever runs chunks that belong to the same
//! sub-interval concurrently — once a sub-interval has any failing chunk,
//! later sub-intervals are left untouched this cycle so the watermark never
//! advances past a gap (the next cycle will naturally retry it).

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::ChunkOutcome;
use crate::ingest::chunk::fetch_and_store;
use crate::models::Sensor;
use crate::opensensemap::OpenSenseMapClient;
use crate::store::SensorStore;
use crate::watermark;

/// Everything the caller (scheduler) needs to decide whether to kick off
/// training and what to log.
#[derive(Debug)]
pub struct IngestionSummary {
    pub box_id: String,
    pub is_new_box: bool,
    pub chunks: Vec<ChunkOutcome>,
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl IngestionSummary {
    pub fn all_succeeded(&self) -> bool {
        self.chunks.iter().all(|c| c.success)
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_ingestion_cycle(
    client: &OpenSenseMapClient,
    store: &dyn SensorStore,
    clock: &dyn Clock,
    box_id: &str,
    initial_window: Duration,
    sub_interval: Duration,
    chunk_concurrency: usize,
) -> anyhow::Result<IngestionSummary> {
    let now = clock.now_utc();

    let meta = client.fetch_box_metadata(box_id).await?;
    let (box_row, is_new_box) = store.upsert_box(&meta, initial_window, now).await?;

    for sensor_meta in &meta.sensors {
        let sensor = Sensor {
            sensor_id: sensor_meta.sensor_id.clone(),
            box_id: box_id.to_string(),
            title: sensor_meta.title.clone(),
            sensor_type: sensor_meta.sensor_type.clone(),
            unit: sensor_meta.unit.clone(),
            icon: sensor_meta.icon.clone(),
        };
        store.upsert_sensor(&sensor).await?;
    }

    let sensors = store.list_sensors(box_id).await?;

    // Unbounded max_chunk here: sub-interval splitting below does the actual
    // capping, so the whole missing range is returned in one span.
    let Some((window_from, window_to)) = watermark::compute_window(&box_row, now, Duration::weeks(9999))
    else {
        return Ok(IngestionSummary {
            box_id: box_id.to_string(),
            is_new_box,
            chunks: Vec::new(),
            window: None,
        });
    };

    let sub_windows = split_into_sub_intervals(window_from, window_to, sub_interval);

    let mut all_outcomes = Vec::new();
    let mut furthest_clean_boundary = box_row.last_data_fetched.unwrap_or(window_from);
    let mut max_successful_ts: Option<DateTime<Utc>> = None;
    let mut hit_failure = false;

    for (sub_from, sub_to) in sub_windows {
        if hit_failure {
            break;
        }

        let outcomes: Vec<ChunkOutcome> = stream::iter(sensors.iter().map(|sensor| {
            let sensor_id = sensor.sensor_id.clone();
            async move { fetch_and_store(client, store, box_id, &sensor_id, sub_from, sub_to).await }
        }))
        .buffer_unordered(chunk_concurrency.max(1))
        .collect()
        .await;

        let sub_interval_clean = outcomes.iter().all(|o| o.success);
        for o in &outcomes {
            if let Some(ts) = o.last_ts {
                max_successful_ts = Some(max_successful_ts.map_or(ts, |prev| std::cmp::max(prev, ts)));
            }
        }

        all_outcomes.extend(outcomes);

        if sub_interval_clean {
            furthest_clean_boundary = sub_to;
        } else {
            warn!(box_id, sub_from = %sub_from, sub_to = %sub_to, "sub-interval had failing chunks, halting further fetch this cycle");
            hit_failure = true;
        }
    }

    let all_clean = !hit_failure;
    let candidate = watermark_candidate(all_clean, window_to, furthest_clean_boundary, max_successful_ts);
    let new_watermark = watermark::advance_after_fetch(
        box_row.last_data_fetched.unwrap_or(window_from),
        window_to,
        all_clean,
        Some(candidate),
    );

    store
        .update_watermarks(box_id, max_successful_ts, Some(new_watermark))
        .await?;

    info!(
        box_id,
        chunks = all_outcomes.len(),
        clean = all_clean,
        "ingestion cycle complete"
    );

    Ok(IngestionSummary {
        box_id: box_id.to_string(),
        is_new_box,
        chunks: all_outcomes,
        window: Some((window_from, window_to)),
    })
}

/// The watermark candidate handed to [`watermark::advance_after_fetch`] once
/// a cycle's sub-intervals are done. On a clean run it's simply `window_to`;
/// on a partial failure it's the greater of the last fully-clean
/// sub-interval boundary and the latest timestamp any sensor actually
/// persisted within the failing sub-interval (§4.3, spec.md:269's "whichever
/// is greater but not beyond `to`") — a sensor that succeeds later in the
/// same sub-interval as another sensor's failure must still get credit.
fn watermark_candidate(
    all_clean: bool,
    window_to: DateTime<Utc>,
    furthest_clean_boundary: DateTime<Utc>,
    max_successful_ts: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    if all_clean {
        window_to
    } else {
        std::cmp::max(furthest_clean_boundary, max_successful_ts.unwrap_or(furthest_clean_boundary))
    }
}

fn split_into_sub_intervals(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    sub_interval: Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut cursor = from;
    while cursor < to {
        let next = std::cmp::min(cursor + sub_interval, to);
        windows.push((cursor, next));
        cursor = next;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_evenly_with_remainder_chunk() {
        let from = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let to = from + Duration::hours(50);
        let windows = split_into_sub_intervals(from, to, Duration::hours(24));
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[2].1, to);
    }

    #[test]
    fn empty_range_produces_no_windows() {
        let from = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert!(split_into_sub_intervals(from, from, Duration::hours(24)).is_empty());
    }

    #[test]
    fn clean_run_candidate_is_window_to() {
        let boundary = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let window_to = boundary + Duration::days(2);
        assert_eq!(watermark_candidate(true, window_to, boundary, None), window_to);
    }

    #[test]
    fn partial_failure_credits_a_later_successful_sensor_over_the_clean_boundary() {
        let boundary = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let window_to = boundary + Duration::days(2);
        let later_success = boundary + Duration::hours(6);
        assert_eq!(
            watermark_candidate(false, window_to, boundary, Some(later_success)),
            later_success,
            "a sensor that succeeded past the failing sub-interval's start must get watermark credit"
        );
    }

    #[test]
    fn partial_failure_falls_back_to_clean_boundary_when_nothing_succeeded_in_the_failing_interval() {
        let boundary = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let window_to = boundary + Duration::days(2);
        let earlier = boundary - Duration::hours(1);
        assert_eq!(watermark_candidate(false, window_to, boundary, Some(earlier)), boundary);
        assert_eq!(watermark_candidate(false, window_to, boundary, None), boundary);
    }
}
