//! End-to-end exercise of the watermark bookkeeping (C4) and training
//! orchestrator (C8) against the in-memory fake store, without a live
//! Postgres or network dependency. Weather lookups are expected to fail in
//! a sandboxed test run; the training orchestrator tolerates that and
//! proceeds without weather features (the same path exercised when the
//! upstream archive API is briefly unavailable in production).

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use opensense_forecast_pipeline::models::{BoxMeta, NewMeasurement};
use opensense_forecast_pipeline::store::fake::FakeStore;
use opensense_forecast_pipeline::store::SensorStore;
use opensense_forecast_pipeline::training;
use opensense_forecast_pipeline::watermark;
use opensense_forecast_pipeline::weather::WeatherClient;

fn unique_model_dir(label: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("opensense-test-{label}-{nanos}"))
}

/// Seeds `hours` of synthetic, noisily-seasonal hourly data for one sensor,
/// starting at `start`.
async fn seed_hourly_series(store: &FakeStore, sensor_id: &str, start: chrono::DateTime<Utc>, hours: i64) {
    let mut batch = Vec::with_capacity(hours as usize);
    for i in 0..hours {
        let ts = start + Duration::hours(i);
        let daily = (i as f64 / 24.0 * std::f64::consts::TAU).sin() * 5.0;
        let seasonal = (i as f64 / (24.0 * 365.0) * std::f64::consts::TAU).sin() * 3.0;
        let value = 15.0 + daily + seasonal;
        batch.push(NewMeasurement {
            sensor_id: sensor_id.to_string(),
            value,
            measurement_timestamp: ts,
        });
    }
    let outcome = store.bulk_insert_measurements(&batch).await.expect("seed insert should succeed");
    assert_eq!(outcome.inserted, hours as u64);
}

#[tokio::test]
async fn watermark_advances_monotonically_across_a_simulated_partial_failure() {
    let store = FakeStore::new();
    let box_id = "box-1";
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

    let meta = BoxMeta {
        box_id: box_id.to_string(),
        name: "Test box".to_string(),
        exposure: None,
        model: None,
        current_location: None,
        last_measurement_at: Some(now),
        sensors: vec![],
    };

    let (row, is_new) = store
        .upsert_box(&meta, Duration::days(7), now)
        .await
        .expect("upsert_box should succeed");
    assert!(is_new);
    let initial_watermark = row.last_data_fetched.expect("new box gets an initial watermark");
    assert_eq!(initial_watermark, now - Duration::days(7));

    // First cycle: the whole outstanding window is requested and every
    // chunk succeeds, so the watermark advances fully to `now`.
    let (window_from, window_to) = watermark::compute_window(&row, now, Duration::weeks(9999))
        .expect("box is behind, a window should be returned");
    assert_eq!(window_from, initial_watermark);
    let advanced = watermark::advance_after_fetch(window_from, window_to, true, Some(window_to));
    assert_eq!(advanced, now);
    store
        .update_watermarks(box_id, Some(now), Some(advanced))
        .await
        .expect("update_watermarks should succeed");

    let caught_up = store.get_box(box_id).await.unwrap().unwrap();
    assert!(watermark::compute_window(&caught_up, now, Duration::weeks(9999)).is_none());

    // Second cycle: new data has arrived, but a chunk midway through the
    // window fails. The watermark must advance only to the last clean
    // boundary, never past the gap, and never backward. A real cycle learns
    // about the new data through a fresh `upsert_box` metadata sync before
    // computing the next window; simulate that here via `update_watermarks`.
    let next_now = now + Duration::hours(10);
    store
        .update_watermarks(box_id, Some(next_now), None)
        .await
        .expect("update_watermarks should succeed");
    let caught_up = store.get_box(box_id).await.unwrap().unwrap();
    let (window_from, window_to) = watermark::compute_window(&caught_up, next_now, Duration::weeks(9999))
        .expect("new data means a window should be returned");
    let partial_boundary = window_from + Duration::hours(4);
    let advanced = watermark::advance_after_fetch(window_from, window_to, false, Some(partial_boundary));
    assert_eq!(advanced, partial_boundary);
    assert!(advanced < window_to, "watermark must not jump past the failed chunk");

    store
        .update_watermarks(box_id, None, Some(advanced))
        .await
        .expect("update_watermarks should succeed");
    let after_partial = store.get_box(box_id).await.unwrap().unwrap();
    assert_eq!(after_partial.last_data_fetched, Some(partial_boundary));
    assert!(after_partial.last_data_fetched.unwrap() >= initial_watermark, "watermark never moves backward");
}

#[tokio::test]
async fn training_cycle_fits_one_model_per_horizon_and_bumps_version_on_rerun() {
    let store = Arc::new(FakeStore::new());
    let weather = WeatherClient::new("http://127.0.0.1:0/unreachable", 52.0, -1.7);
    let sensor_id = "sensor-temp";
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let lookback_weeks = 20;
    let horizons = 2u32;

    seed_hourly_series(&store, sensor_id, now - Duration::weeks(lookback_weeks), lookback_weeks * 7 * 24).await;

    let model_dir = unique_model_dir("training");
    let timezone: chrono_tz::Tz = "Europe/London".parse().unwrap();

    let outcomes = training::run_training_cycle(
        store.as_ref(),
        &weather,
        sensor_id,
        "temp_forecast",
        now,
        lookback_weeks,
        horizons,
        &model_dir,
        &timezone,
        52.0,
        -1.7,
        2,
    )
    .await
    .expect("training cycle should complete");

    assert_eq!(outcomes.len(), horizons as usize);
    for outcome in &outcomes {
        assert!(outcome.error.is_none(), "horizon {} failed: {:?}", outcome.horizon_hours, outcome.error);
        let path = outcome.model_path.as_ref().expect("successful horizon has an artifact path");
        assert!(std::path::Path::new(path).is_file(), "artifact should be written to disk");
    }

    let report_path = model_dir.join("training_report.md");
    assert!(report_path.is_file(), "markdown summary should be written");

    let rows_first_run = store.list_trained_models(10).await.expect("list should succeed");
    assert_eq!(rows_first_run.len(), horizons as usize);
    assert!(rows_first_run.iter().all(|r| r.version_id == 1));

    // Rerunning training bumps version_id per horizon without disturbing
    // the others (registry upsert is independent per horizon).
    training::run_training_cycle(
        store.as_ref(),
        &weather,
        sensor_id,
        "temp_forecast",
        now,
        lookback_weeks,
        horizons,
        &model_dir,
        &timezone,
        52.0,
        -1.7,
        2,
    )
    .await
    .expect("second training cycle should complete");

    let rows_second_run = store.list_trained_models(10).await.expect("list should succeed");
    assert_eq!(rows_second_run.len(), horizons as usize);
    assert!(rows_second_run.iter().all(|r| r.version_id == 2));

    let _ = std::fs::remove_dir_all(&model_dir);
}
