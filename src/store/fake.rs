//! In-memory [`SensorStore`] used by orchestrator unit tests so the
//! watermark/ingestion/training logic never needs a live Postgres.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};

use super::{HourlyPoint, SensorStore};
use crate::error::StoreError;
use crate::models::{
    BoxMeta, InsertOutcome, NewMeasurement, Sensor, SensorBox, TrainedModel, TrainedModelUpsert,
};

#[derive(Default)]
struct State {
    boxes: BTreeMap<String, SensorBox>,
    sensors: BTreeMap<String, Sensor>,
    measurements: BTreeMap<(String, DateTime<Utc>), f64>,
    models: BTreeMap<i32, TrainedModel>,
    next_model_id: i64,
}

/// A `Mutex`-guarded in-memory store. Single-threaded semantics are fine
/// here since it only ever backs tests.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    pub fn new() -> Self {
        FakeStore::default()
    }
}

#[async_trait]
impl SensorStore for FakeStore {
    async fn get_box(&self, box_id: &str) -> Result<Option<SensorBox>, StoreError> {
        Ok(self.state.lock().unwrap().boxes.get(box_id).cloned())
    }

    async fn upsert_box(
        &self,
        meta: &BoxMeta,
        initial_window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<(SensorBox, bool), StoreError> {
        let mut state = self.state.lock().unwrap();
        let is_new = !state.boxes.contains_key(&meta.box_id);

        let last_data_fetched = if is_new {
            Some(std::cmp::min(meta.last_measurement_at.unwrap_or(now), now) - initial_window)
        } else {
            state
                .boxes
                .get(&meta.box_id)
                .and_then(|b| b.last_data_fetched)
        };

        let last_measurement_at = match state.boxes.get(&meta.box_id) {
            Some(existing) => match (existing.last_measurement_at, meta.last_measurement_at) {
                (Some(a), Some(b)) => Some(std::cmp::max(a, b)),
                (a, b) => a.or(b),
            },
            None => meta.last_measurement_at,
        };

        let row = SensorBox {
            box_id: meta.box_id.clone(),
            name: meta.name.clone(),
            exposure: meta.exposure.clone(),
            model: meta.model.clone(),
            location: meta.current_location.clone(),
            created_at: state
                .boxes
                .get(&meta.box_id)
                .map(|b| b.created_at)
                .unwrap_or(now),
            updated_at: now,
            last_measurement_at,
            last_data_fetched,
        };

        state.boxes.insert(meta.box_id.clone(), row.clone());
        Ok((row, is_new))
    }

    async fn list_sensors(&self, box_id: &str) -> Result<Vec<Sensor>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .sensors
            .values()
            .filter(|s| s.box_id == box_id)
            .cloned()
            .collect())
    }

    async fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .sensors
            .insert(sensor.sensor_id.clone(), sensor.clone());
        Ok(())
    }

    async fn bulk_insert_measurements(
        &self,
        measurements: &[NewMeasurement],
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0u64;
        let mut duplicates = 0u64;

        for m in measurements {
            let key = (m.sensor_id.clone(), m.measurement_timestamp);
            if state.measurements.contains_key(&key) {
                duplicates += 1;
            } else {
                state.measurements.insert(key, m.value);
                inserted += 1;
            }
        }

        Ok(InsertOutcome {
            inserted,
            duplicates,
        })
    }

    async fn update_watermarks(
        &self,
        box_id: &str,
        last_measurement_at: Option<DateTime<Utc>>,
        last_data_fetched: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.boxes.get_mut(box_id) {
            if let Some(lm) = last_measurement_at {
                row.last_measurement_at = Some(match row.last_measurement_at {
                    Some(existing) => std::cmp::max(existing, lm),
                    None => lm,
                });
            }
            if let Some(ldf) = last_data_fetched {
                let advance = row.last_data_fetched.map(|existing| ldf > existing).unwrap_or(true);
                if advance {
                    row.last_data_fetched = Some(ldf);
                }
            }
        }
        Ok(())
    }

    async fn read_hourly_series(
        &self,
        sensor_id: &str,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> Result<Vec<HourlyPoint>, StoreError> {
        use std::collections::BTreeMap as Map;

        let state = self.state.lock().unwrap();
        let mut buckets: Map<DateTime<Utc>, (f64, u64)> = Map::new();

        for ((sid, ts), value) in state.measurements.iter() {
            if sid != sensor_id || *ts < from_utc || *ts >= to_utc {
                continue;
            }
            let bucket = ts
                .date_naive()
                .and_hms_opt(ts.time().hour(), 0, 0)
                .unwrap()
                .and_utc();
            let entry = buckets.entry(bucket).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }

        Ok(buckets
            .into_iter()
            .map(|(bucket_start_utc, (sum, count))| HourlyPoint {
                bucket_start_utc,
                avg_value: sum / count as f64,
            })
            .collect())
    }

    async fn upsert_trained_model(
        &self,
        row: &TrainedModelUpsert,
    ) -> Result<TrainedModel, StoreError> {
        let mut state = self.state.lock().unwrap();
        let next_version = state
            .models
            .get(&row.forecast_horizon_hours)
            .map(|m| m.version_id + 1)
            .unwrap_or(1);

        state.next_model_id += 1;
        let model_path = row
            .model_path
            .clone()
            .or_else(|| {
                state
                    .models
                    .get(&row.forecast_horizon_hours)
                    .map(|m| m.model_path.clone())
            })
            .unwrap_or_default();

        let updated = TrainedModel {
            id: state.next_model_id,
            model_name: row.model_name.clone(),
            forecast_horizon_hours: row.forecast_horizon_hours,
            model_path,
            version_id: next_version,
            last_trained_at: Utc::now(),
            training_duration_seconds: row.training_duration_seconds,
            val_mae: row.val_mae,
            val_rmse: row.val_rmse,
            val_mape: row.val_mape,
            val_r2: row.val_r2,
            naive_val_mae: row.naive_val_mae,
            naive_val_rmse: row.naive_val_rmse,
            training_error: row.training_error.clone(),
        };

        state.models.insert(row.forecast_horizon_hours, updated.clone());
        Ok(updated)
    }

    async fn list_trained_models(&self, limit: i64) -> Result<Vec<TrainedModel>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .models
            .values()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoxMeta;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn upsert_box_sets_initial_watermark_from_window() {
        let store = FakeStore::new();
        let meta = BoxMeta {
            box_id: "b1".into(),
            name: "Box".into(),
            exposure: None,
            model: None,
            current_location: None,
            last_measurement_at: Some(now()),
            sensors: vec![],
        };

        let (row, is_new) = store
            .upsert_box(&meta, chrono::Duration::days(7), now())
            .await
            .unwrap();
        assert!(is_new);
        assert_eq!(row.last_data_fetched, Some(now() - chrono::Duration::days(7)));
    }

    #[tokio::test]
    async fn update_watermarks_never_moves_backward() {
        let store = FakeStore::new();
        let meta = BoxMeta {
            box_id: "b1".into(),
            name: "Box".into(),
            exposure: None,
            model: None,
            current_location: None,
            last_measurement_at: None,
            sensors: vec![],
        };
        store
            .upsert_box(&meta, chrono::Duration::days(7), now())
            .await
            .unwrap();

        store
            .update_watermarks("b1", None, Some(now()))
            .await
            .unwrap();
        store
            .update_watermarks("b1", None, Some(now() - chrono::Duration::hours(1)))
            .await
            .unwrap();

        let row = store.get_box("b1").await.unwrap().unwrap();
        assert_eq!(row.last_data_fetched, Some(now()));
    }

    #[tokio::test]
    async fn bulk_insert_reports_duplicates() {
        let store = FakeStore::new();
        let m = NewMeasurement {
            sensor_id: "s1".into(),
            value: 1.0,
            measurement_timestamp: now(),
        };
        let first = store.bulk_insert_measurements(&[m.clone()]).await.unwrap();
        let second = store.bulk_insert_measurements(&[m]).await.unwrap();
        assert_eq!(first.inserted, 1);
        assert_eq!(second.duplicates, 1);
    }

    #[tokio::test]
    async fn trained_model_version_increments_on_reupsert() {
        let store = FakeStore::new();
        let upsert = TrainedModelUpsert {
            model_name: "ridge".into(),
            forecast_horizon_hours: 6,
            model_path: Some("/tmp/m6.bin".into()),
            training_duration_seconds: Some(1.0),
            val_mae: Some(0.1),
            val_rmse: Some(0.2),
            val_mape: Some(0.3),
            val_r2: Some(0.9),
            naive_val_mae: Some(0.5),
            naive_val_rmse: Some(0.6),
            training_error: None,
        };
        let first = store.upsert_trained_model(&upsert).await.unwrap();
        let second = store.upsert_trained_model(&upsert).await.unwrap();
        assert_eq!(first.version_id, 1);
        assert_eq!(second.version_id, 2);
    }
}
