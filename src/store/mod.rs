//! Time-series-optimized relational store (C3).
//!
//! [`SensorStore`] is the trait every orchestrator talks to; [`PgStore`] is
//! the Postgres-backed implementation. Keeping the trait separate from the
//! implementation lets C6/C8's unit tests run against an in-memory fake
//! (see `store::fake` under `#[cfg(test)]`) instead of a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::models::{
    BoxMeta, InsertOutcome, NewMeasurement, Sensor, SensorBox, TrainedModel, TrainedModelUpsert,
};

pub mod fake;

/// One averaged hourly bucket returned by [`SensorStore::read_hourly_series`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyPoint {
    pub bucket_start_utc: DateTime<Utc>,
    pub avg_value: f64,
}

#[async_trait]
pub trait SensorStore: Send + Sync {
    async fn get_box(&self, box_id: &str) -> Result<Option<SensorBox>, StoreError>;

    /// Create if absent, otherwise update metadata + `last_measurement_at`
    /// idempotently. Returns the resulting row and whether it was newly
    /// created (the orchestrator needs this to gate first-time training).
    async fn upsert_box(
        &self,
        meta: &BoxMeta,
        initial_window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<(SensorBox, bool), StoreError>;

    async fn list_sensors(&self, box_id: &str) -> Result<Vec<Sensor>, StoreError>;

    async fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), StoreError>;

    /// Transactional bulk insert; tolerates duplicate composite keys via
    /// `ON CONFLICT DO NOTHING`.
    async fn bulk_insert_measurements(
        &self,
        measurements: &[NewMeasurement],
    ) -> Result<InsertOutcome, StoreError>;

    /// Advances each watermark field only if the new value is strictly
    /// greater than the existing one; never moves backward.
    async fn update_watermarks(
        &self,
        box_id: &str,
        last_measurement_at: Option<DateTime<Utc>>,
        last_data_fetched: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Hourly averages for `[from_utc, to_utc)`, computed on the fly
    /// (`GROUP BY date_trunc('hour', ...)`) rather than assumed from a
    /// continuous aggregate view, which may or may not exist.
    async fn read_hourly_series(
        &self,
        sensor_id: &str,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> Result<Vec<HourlyPoint>, StoreError>;

    /// Upserts on `forecast_horizon_hours`: insert with `version_id = 1`
    /// if absent, otherwise update fields and increment `version_id`.
    async fn upsert_trained_model(&self, row: &TrainedModelUpsert) -> Result<TrainedModel, StoreError>;

    async fn list_trained_models(&self, limit: i64) -> Result<Vec<TrainedModel>, StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

#[async_trait]
impl SensorStore for PgStore {
    async fn get_box(&self, box_id: &str) -> Result<Option<SensorBox>, StoreError> {
        let row = sqlx::query_as::<_, SensorBox>(
            r#"
            SELECT box_id, name, exposure, model, location,
                   created_at, updated_at, last_measurement_at, last_data_fetched
            FROM sensor_box WHERE box_id = $1
            "#,
        )
        .bind(box_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_box(
        &self,
        meta: &BoxMeta,
        initial_window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<(SensorBox, bool), StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, SensorBox>(
            "SELECT box_id, name, exposure, model, location, created_at, updated_at, \
             last_measurement_at, last_data_fetched FROM sensor_box WHERE box_id = $1 FOR UPDATE",
        )
        .bind(&meta.box_id)
        .fetch_optional(&mut *tx)
        .await?;

        let is_new = existing.is_none();

        // Per §4.3: a newly created box's initial last_data_fetched is
        // to_utc - initial_window, where to_utc = min(last_measurement_at ?? now, now).
        let initial_last_data_fetched =
            std::cmp::min(meta.last_measurement_at.unwrap_or(now), now) - initial_window;

        let row = sqlx::query_as::<_, SensorBox>(
            r#"
            INSERT INTO sensor_box (box_id, name, exposure, model, location, created_at, updated_at, last_measurement_at, last_data_fetched)
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7, $8)
            ON CONFLICT (box_id) DO UPDATE SET
                name = EXCLUDED.name,
                exposure = EXCLUDED.exposure,
                model = EXCLUDED.model,
                location = EXCLUDED.location,
                updated_at = EXCLUDED.updated_at,
                last_measurement_at = GREATEST(
                    COALESCE(sensor_box.last_measurement_at, EXCLUDED.last_measurement_at),
                    COALESCE(EXCLUDED.last_measurement_at, sensor_box.last_measurement_at)
                ),
                last_data_fetched = COALESCE(sensor_box.last_data_fetched, EXCLUDED.last_data_fetched)
            RETURNING box_id, name, exposure, model, location, created_at, updated_at, last_measurement_at, last_data_fetched
            "#,
        )
        .bind(&meta.box_id)
        .bind(&meta.name)
        .bind(&meta.exposure)
        .bind(&meta.model)
        .bind(&meta.current_location)
        .bind(now)
        .bind(meta.last_measurement_at)
        .bind(initial_last_data_fetched)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((row, is_new))
    }

    async fn list_sensors(&self, box_id: &str) -> Result<Vec<Sensor>, StoreError> {
        let rows = sqlx::query_as::<_, Sensor>(
            "SELECT sensor_id, box_id, title, sensor_type, unit, icon FROM sensor WHERE box_id = $1",
        )
        .bind(box_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sensor (sensor_id, box_id, title, sensor_type, unit, icon)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sensor_id) DO UPDATE SET
                title = EXCLUDED.title,
                sensor_type = EXCLUDED.sensor_type,
                unit = EXCLUDED.unit,
                icon = EXCLUDED.icon
            "#,
        )
        .bind(&sensor.sensor_id)
        .bind(&sensor.box_id)
        .bind(&sensor.title)
        .bind(&sensor.sensor_type)
        .bind(&sensor.unit)
        .bind(&sensor.icon)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bulk_insert_measurements(
        &self,
        measurements: &[NewMeasurement],
    ) -> Result<InsertOutcome, StoreError> {
        if measurements.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for m in measurements {
            let result = sqlx::query(
                r#"
                INSERT INTO sensor_data (sensor_id, value, measurement_timestamp)
                VALUES ($1, $2, $3)
                ON CONFLICT (sensor_id, measurement_timestamp) DO NOTHING
                "#,
            )
            .bind(&m.sensor_id)
            .bind(m.value)
            .bind(m.measurement_timestamp)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        let duplicates = measurements.len() as u64 - inserted;
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
        sqlx::query(
            r#"
            UPDATE sensor_box SET
                last_measurement_at = GREATEST(COALESCE(last_measurement_at, $2), COALESCE($2, last_measurement_at)),
                last_data_fetched = CASE
                    WHEN $3::timestamptz IS NULL THEN last_data_fetched
                    WHEN last_data_fetched IS NULL OR $3 > last_data_fetched THEN $3
                    ELSE last_data_fetched
                END,
                updated_at = now()
            WHERE box_id = $1
            "#,
        )
        .bind(box_id)
        .bind(last_measurement_at)
        .bind(last_data_fetched)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_hourly_series(
        &self,
        sensor_id: &str,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> Result<Vec<HourlyPoint>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT date_trunc('hour', measurement_timestamp) AS bucket_start, AVG(value) AS avg_value
            FROM sensor_data
            WHERE sensor_id = $1 AND measurement_timestamp >= $2 AND measurement_timestamp < $3
            GROUP BY bucket_start
            ORDER BY bucket_start ASC
            "#,
        )
        .bind(sensor_id)
        .bind(from_utc)
        .bind(to_utc)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HourlyPoint {
                bucket_start_utc: row.get("bucket_start"),
                avg_value: row.get("avg_value"),
            })
            .collect())
    }

    async fn upsert_trained_model(
        &self,
        row: &TrainedModelUpsert,
    ) -> Result<TrainedModel, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, TrainedModel>(
            "SELECT id, model_name, forecast_horizon_hours, model_path, version_id, last_trained_at, \
             training_duration_seconds, val_mae, val_rmse, val_mape, val_r2, naive_val_mae, naive_val_rmse, training_error \
             FROM trained_models WHERE forecast_horizon_hours = $1 FOR UPDATE",
        )
        .bind(row.forecast_horizon_hours)
        .fetch_optional(&mut *tx)
        .await?;

        let next_version = existing.as_ref().map(|e| e.version_id + 1).unwrap_or(1);
        let model_path = row
            .model_path
            .clone()
            .or_else(|| existing.as_ref().map(|e| e.model_path.clone()))
            .unwrap_or_default();

        let updated = sqlx::query_as::<_, TrainedModel>(
            r#"
            INSERT INTO trained_models (
                model_name, forecast_horizon_hours, model_path, version_id, last_trained_at,
                training_duration_seconds, val_mae, val_rmse, val_mape, val_r2,
                naive_val_mae, naive_val_rmse, training_error
            ) VALUES ($1, $2, $3, $4, now(), $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (forecast_horizon_hours) DO UPDATE SET
                model_name = EXCLUDED.model_name,
                model_path = EXCLUDED.model_path,
                version_id = EXCLUDED.version_id,
                last_trained_at = now(),
                training_duration_seconds = EXCLUDED.training_duration_seconds,
                val_mae = EXCLUDED.val_mae,
                val_rmse = EXCLUDED.val_rmse,
                val_mape = EXCLUDED.val_mape,
                val_r2 = EXCLUDED.val_r2,
                naive_val_mae = EXCLUDED.naive_val_mae,
                naive_val_rmse = EXCLUDED.naive_val_rmse,
                training_error = EXCLUDED.training_error
            RETURNING id, model_name, forecast_horizon_hours, model_path, version_id, last_trained_at,
                      training_duration_seconds, val_mae, val_rmse, val_mape, val_r2, naive_val_mae, naive_val_rmse, training_error
            "#,
        )
        .bind(&row.model_name)
        .bind(row.forecast_horizon_hours)
        .bind(&model_path)
        .bind(next_version)
        .bind(row.training_duration_seconds)
        .bind(row.val_mae)
        .bind(row.val_rmse)
        .bind(row.val_mape)
        .bind(row.val_r2)
        .bind(row.naive_val_mae)
        .bind(row.naive_val_rmse)
        .bind(&row.training_error)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn list_trained_models(&self, limit: i64) -> Result<Vec<TrainedModel>, StoreError> {
        let rows = sqlx::query_as::<_, TrainedModel>(
            r#"
            SELECT id, model_name, forecast_horizon_hours, model_path, version_id, last_trained_at,
                   training_duration_seconds, val_mae, val_rmse, val_mape, val_r2, naive_val_mae, naive_val_rmse, training_error
            FROM trained_models
            ORDER BY forecast_horizon_hours ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
