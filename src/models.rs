//! Domain models for the sensor ingestion + forecast pipeline.
//!
//! Two families live here: the wire format returned by the OpenSenseMap
//! API (`Box*Meta`, `RawMeasurement`) and the normalized, store-facing
//! representation (`SensorBox`, `Sensor`, `Measurement`, `TrainedModel`).
//! Per the Design Notes, there are no back-pointers: `Sensor` carries its
//! parent `box_id` as a plain value and joins happen at query time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Wire format (OpenSenseMap API) -----------------------------------

/// Metadata for one sensor box, as returned by `GET /boxes/{box_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BoxMeta {
    #[serde(rename = "_id")]
    pub box_id: String,
    pub name: String,
    pub exposure: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "currentLocation")]
    pub current_location: Option<serde_json::Value>,
    #[serde(rename = "lastMeasurementAt")]
    pub last_measurement_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sensors: Vec<SensorMeta>,
}

/// One sensor descriptor nested inside [`BoxMeta`].
#[derive(Debug, Clone, Deserialize)]
pub struct SensorMeta {
    #[serde(rename = "_id")]
    pub sensor_id: String,
    pub title: Option<String>,
    #[serde(rename = "sensorType")]
    pub sensor_type: Option<String>,
    pub unit: Option<String>,
    pub icon: Option<String>,
}

/// One raw measurement point as returned by
/// `GET /boxes/{box_id}/data/{sensor_id}`. Values arrive as strings in the
/// upstream API; parsing to `f64` happens in the chunked fetcher so a
/// single malformed row can be skipped without failing the whole response.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMeasurement {
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    pub value: Option<serde_json::Value>,
}

// --- Store-facing representation --------------------------------------

/// A sensor box as persisted in `sensor_box`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SensorBox {
    pub box_id: String,
    pub name: String,
    pub exposure: Option<String>,
    pub model: Option<String>,
    pub location: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_measurement_at: Option<DateTime<Utc>>,
    pub last_data_fetched: Option<DateTime<Utc>>,
}

/// A sensor as persisted in `sensor`. Owns no reference back to its box
/// beyond the plain `box_id` value (Design Notes: no back-pointers).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Sensor {
    pub sensor_id: String,
    pub box_id: String,
    pub title: Option<String>,
    pub sensor_type: Option<String>,
    pub unit: Option<String>,
    pub icon: Option<String>,
}

/// One stored measurement. Identity is the composite key
/// `(sensor_id, measurement_timestamp)`; `id` is retained only for
/// compatibility with tooling that expects a surrogate key.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Measurement {
    pub id: i64,
    pub sensor_id: String,
    pub value: f64,
    pub measurement_timestamp: DateTime<Utc>,
}

/// A value ready to be bulk-inserted; has no `id` yet since that column is
/// database-assigned.
#[derive(Debug, Clone)]
pub struct NewMeasurement {
    pub sensor_id: String,
    pub value: f64,
    pub measurement_timestamp: DateTime<Utc>,
}

/// One row of the model registry (C10), one per active forecast horizon.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TrainedModel {
    pub id: i64,
    pub model_name: String,
    pub forecast_horizon_hours: i32,
    pub model_path: String,
    pub version_id: i32,
    pub last_trained_at: DateTime<Utc>,
    pub training_duration_seconds: Option<f64>,
    pub val_mae: Option<f64>,
    pub val_rmse: Option<f64>,
    pub val_mape: Option<f64>,
    pub val_r2: Option<f64>,
    pub naive_val_mae: Option<f64>,
    pub naive_val_rmse: Option<f64>,
    pub training_error: Option<String>,
}

/// Fields needed to upsert a [`TrainedModel`] row; `id`, `version_id`, and
/// `last_trained_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct TrainedModelUpsert {
    pub model_name: String,
    pub forecast_horizon_hours: i32,
    pub model_path: Option<String>,
    pub training_duration_seconds: Option<f64>,
    pub val_mae: Option<f64>,
    pub val_rmse: Option<f64>,
    pub val_mape: Option<f64>,
    pub val_r2: Option<f64>,
    pub naive_val_mae: Option<f64>,
    pub naive_val_rmse: Option<f64>,
    pub training_error: Option<String>,
}

/// Result of a bulk insert of measurements (§4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertOutcome {
    pub inserted: u64,
    pub duplicates: u64,
}
