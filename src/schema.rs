//! Database schema management for the ingestion + training pipeline.
//!
//! Ensures required tables and indexes exist before the scheduler starts.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).
//! `sensor_data` is the time-series-heavy table; per §6 it is expected to
//! be partitioned/hash-distributed by `sensor_id` in a real deployment
//! (e.g. Timescale hypertable or Citus), which is a deployment-time
//! concern layered on top of this base DDL, not expressed here.

use anyhow::Result;
use sqlx::PgPool;

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_box (
            box_id              TEXT PRIMARY KEY,
            name                TEXT        NOT NULL,
            exposure            TEXT,
            model               TEXT,
            location            JSONB,
            created_at          TIMESTAMPTZ NOT NULL,
            updated_at          TIMESTAMPTZ NOT NULL,
            last_measurement_at TIMESTAMPTZ,
            last_data_fetched   TIMESTAMPTZ
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor (
            sensor_id   TEXT PRIMARY KEY,
            box_id      TEXT NOT NULL REFERENCES sensor_box (box_id),
            title       TEXT,
            sensor_type TEXT,
            unit        TEXT,
            icon        TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_data (
            id                    BIGSERIAL,
            sensor_id             TEXT        NOT NULL REFERENCES sensor (sensor_id),
            value                 DOUBLE PRECISION NOT NULL,
            measurement_timestamp TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (sensor_id, measurement_timestamp)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_data_sensor_ts
            ON sensor_data (sensor_id, measurement_timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trained_models (
            id                          BIGSERIAL PRIMARY KEY,
            model_name                  TEXT        NOT NULL,
            forecast_horizon_hours      INTEGER     NOT NULL,
            model_path                  TEXT        NOT NULL,
            version_id                  INTEGER     NOT NULL,
            last_trained_at             TIMESTAMPTZ NOT NULL DEFAULT now(),
            training_duration_seconds   DOUBLE PRECISION,
            val_mae                     DOUBLE PRECISION,
            val_rmse                    DOUBLE PRECISION,
            val_mape                    DOUBLE PRECISION,
            val_r2                      DOUBLE PRECISION,
            naive_val_mae               DOUBLE PRECISION,
            naive_val_rmse              DOUBLE PRECISION,
            training_error              TEXT,
            UNIQUE (forecast_horizon_hours)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
