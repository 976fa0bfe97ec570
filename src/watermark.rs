//! Resumable-ingestion bookkeeping (C4).
//!
//! A box's progress is tracked by two fields on `sensor_box`:
//! `last_data_fetched` (how far the fetch window has advanced) and
//! `last_measurement_at` (the newest timestamp actually observed upstream).
//! [`compute_window`] decides what to ask the API for next; the final
//! watermark after a chunked fetch is computed by [`advance_after_fetch`],
//! which never moves backward even on partial failure.

use chrono::{DateTime, Duration, Utc};

use crate::models::SensorBox;

/// The half-open UTC interval `[from, to)` to request next, or `None` if
/// the box is already caught up.
///
/// Per §4.3, `to` is `min(last_measurement_at ?? now, now)`: the box never
/// needs to be asked for data past what it has actually reported, and a
/// bogus future `last_measurement_at` from the upstream API is clamped to
/// `now` rather than trusted.
pub fn compute_window(
    sensor_box: &SensorBox,
    now: DateTime<Utc>,
    max_chunk: Duration,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let from = sensor_box.last_data_fetched?;
    let to = std::cmp::min(sensor_box.last_measurement_at.unwrap_or(now), now);
    if from >= to {
        return None;
    }
    let to = std::cmp::min(from + max_chunk, to);
    Some((from, to))
}

/// §4.3: the box's watermark after a chunked fetch attempt.
///
/// - On full success, advances to `requested_to`.
/// - On partial failure, advances only to the latest timestamp that was
///   actually persisted successfully (falling back to the previous
///   watermark if nothing succeeded).
/// - Never moves backward.
pub fn advance_after_fetch(
    previous: DateTime<Utc>,
    requested_to: DateTime<Utc>,
    all_chunks_succeeded: bool,
    max_successful_timestamp: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let candidate = if all_chunks_succeeded {
        requested_to
    } else {
        max_successful_timestamp.unwrap_or(previous)
    };
    std::cmp::max(previous, candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn box_with_fetched(ts: Option<DateTime<Utc>>) -> SensorBox {
        box_with_fetched_and_reported(ts, None)
    }

    fn box_with_fetched_and_reported(fetched: Option<DateTime<Utc>>, reported: Option<DateTime<Utc>>) -> SensorBox {
        SensorBox {
            box_id: "b1".into(),
            name: "Box".into(),
            exposure: None,
            model: None,
            location: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_measurement_at: reported,
            last_data_fetched: fetched,
        }
    }

    #[test]
    fn compute_window_returns_none_when_caught_up() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let b = box_with_fetched(Some(now));
        assert!(compute_window(&b, now, Duration::days(7)).is_none());
    }

    #[test]
    fn compute_window_caps_at_max_chunk() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let b = box_with_fetched(Some(from));
        let (win_from, win_to) = compute_window(&b, now, Duration::days(3)).unwrap();
        assert_eq!(win_from, from);
        assert_eq!(win_to, from + Duration::days(3));
    }

    #[test]
    fn compute_window_stops_at_last_measurement_not_now() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let reported = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
        let b = box_with_fetched_and_reported(Some(from), Some(reported));
        let (win_from, win_to) = compute_window(&b, now, Duration::days(30)).unwrap();
        assert_eq!(win_from, from);
        assert_eq!(win_to, reported, "must not ask the upstream box for data past what it has reported");
    }

    #[test]
    fn compute_window_clamps_bogus_future_last_measurement_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let reported = now + Duration::days(365);
        let b = box_with_fetched_and_reported(Some(from), Some(reported));
        let (_, win_to) = compute_window(&b, now, Duration::days(30)).unwrap();
        assert_eq!(win_to, now, "a future last_measurement_at from upstream must not be trusted past now");
    }

    #[test]
    fn advance_after_fetch_full_success_moves_to_requested_to() {
        let prev = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(advance_after_fetch(prev, to, true, None), to);
    }

    #[test]
    fn advance_after_fetch_partial_failure_uses_max_successful() {
        let prev = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let partial = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(advance_after_fetch(prev, to, false, Some(partial)), partial);
    }

    #[test]
    fn advance_after_fetch_never_moves_backward() {
        let prev = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap();
        let stale = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(advance_after_fetch(prev, to, false, Some(stale)), prev);
    }
}
