//! Training orchestrator (C8): one ridge regression model per forecast
//! horizon, fit with time-series CV, validated out-of-fold, and upserted
//! into the model registry. A single horizon's failure never aborts the
//! others (§4.7 failure semantics).

pub mod cv;
pub mod metrics;
pub mod regression;
pub mod report;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use ndarray::{s, Array1};
use tracing::{error, info, warn};

use crate::error::TrainOutcome;
use crate::features::{self, FeatureFrame, LAG_24H_COLUMN_INDEX};
use crate::models::TrainedModelUpsert;
use crate::store::{HourlyPoint, SensorStore};
use crate::weather::WeatherClient;
use metrics::Metrics;
use regression::RidgeModel;

const CV_FOLDS: usize = 3;

/// Everything one horizon's fit needs, computed once and shared read-only
/// across the bounded worker pool.
struct TrainingInputs {
    horizons: u32,
    model_dir: PathBuf,
    x_train: ndarray::Array2<f64>,
    y_train: ndarray::Array2<f64>,
    x_val: ndarray::Array2<f64>,
    y_val: ndarray::Array2<f64>,
    naive_val: Array1<f64>,
}

#[allow(clippy::too_many_arguments)]
pub async fn run_training_cycle(
    store: &dyn SensorStore,
    weather: &WeatherClient,
    sensor_id: &str,
    model_name: &str,
    now: DateTime<Utc>,
    lookback_weeks: i64,
    horizons: u32,
    model_dir: impl AsRef<Path>,
    timezone: &Tz,
    latitude: f64,
    longitude: f64,
    worker_count: usize,
) -> anyhow::Result<Vec<TrainOutcome>> {
    let from = now - chrono::Duration::weeks(lookback_weeks);
    let hourly = store.read_hourly_series(sensor_id, from, now).await?;
    anyhow::ensure!(!hourly.is_empty(), "no hourly data available for training");

    let series: Vec<(DateTime<Utc>, f64)> = hourly
        .into_iter()
        .map(|HourlyPoint { bucket_start_utc, avg_value }| (bucket_start_utc, avg_value))
        .collect();

    let start_date = series.first().unwrap().0.date_naive();
    let end_date = series.last().unwrap().0.date_naive();
    let weather_points = fetch_weather_tolerant(weather, start_date, end_date, timezone).await;

    let frame = features::build_training_frame(&series, &weather_points, timezone, latitude, longitude, horizons);

    if frame.x.nrows() <= horizons as usize {
        anyhow::bail!(
            "only {} usable rows after feature engineering, need more than horizon count {}",
            frame.x.nrows(),
            horizons
        );
    }

    let inputs = split_train_validation(&frame, horizons);
    let model_dir = model_dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&model_dir)?;

    let training_inputs = std::sync::Arc::new(TrainingInputs {
        horizons,
        model_dir,
        x_train: inputs.0,
        y_train: inputs.1,
        x_val: inputs.2,
        y_val: inputs.3,
        naive_val: inputs.4,
    });

    let results: Vec<HorizonFit> = stream::iter((1..=horizons).map(|h| {
        let inputs = training_inputs.clone();
        async move { tokio::task::spawn_blocking(move || fit_one_horizon(h, &inputs)).await }
    }))
    .buffer_unordered(worker_count.max(1))
    .map(|joined| match joined {
        Ok(result) => result,
        Err(join_err) => HorizonFit {
            horizon_hours: 0,
            model_path: None,
            error: Some(format!("training task panicked: {join_err}")),
            duration_seconds: 0.0,
            metrics: None,
            naive_metrics: None,
            tail_metrics: None,
        },
    })
    .collect()
    .await;

    for result in &results {
        let upsert = TrainedModelUpsert {
            model_name: model_name.to_string(),
            forecast_horizon_hours: result.horizon_hours as i32,
            model_path: result.model_path.clone(),
            training_duration_seconds: Some(result.duration_seconds),
            val_mae: result.metrics.map(|m| m.mae),
            val_rmse: result.metrics.map(|m| m.rmse),
            val_mape: result.metrics.map(|m| m.mape),
            val_r2: result.metrics.map(|m| m.r2),
            naive_val_mae: result.naive_metrics.map(|m| m.mae),
            naive_val_rmse: result.naive_metrics.map(|m| m.rmse),
            training_error: result.error.clone(),
        };
        if let Err(e) = store.upsert_trained_model(&upsert).await {
            error!(horizon = result.horizon_hours, error = %e, "failed to upsert registry row");
        }
    }

    let succeeded = results.iter().filter(|r| r.error.is_none()).count();
    info!(succeeded, total = results.len(), "training cycle complete");

    let report_path = training_inputs.model_dir.join("training_report.md");
    if let Err(e) = report::write_markdown(&report_path, &results) {
        warn!(error = %e, "failed to write training report");
    }

    Ok(results.into_iter().map(Into::into).collect())
}

async fn fetch_weather_tolerant(
    weather: &WeatherClient,
    start: NaiveDate,
    end: NaiveDate,
    timezone: &Tz,
) -> std::collections::BTreeMap<DateTime<Utc>, crate::weather::WeatherPoint> {
    match weather.fetch_hourly(start, end, timezone).await {
        Ok(points) => points,
        Err(e) => {
            warn!(error = %e, "weather fetch failed, training without weather features");
            std::collections::BTreeMap::new()
        }
    }
}

/// Splits the frame into a training block and a held-out tail of length
/// `horizons` (§4.7 step 2), and derives the naive 24h-ago baseline for the
/// tail directly from the `lag_24h` feature column.
fn split_train_validation(
    frame: &FeatureFrame,
    horizons: u32,
) -> (
    ndarray::Array2<f64>,
    ndarray::Array2<f64>,
    ndarray::Array2<f64>,
    ndarray::Array2<f64>,
    Array1<f64>,
) {
    let n = frame.x.nrows();
    let tail_len = horizons as usize;
    let train_end = n - tail_len;

    let x_train = frame.x.slice(s![..train_end, ..]).to_owned();
    let y_train = frame.y.slice(s![..train_end, ..]).to_owned();
    let x_val = frame.x.slice(s![train_end.., ..]).to_owned();
    let y_val = frame.y.slice(s![train_end.., ..]).to_owned();
    let naive_val = frame.x.slice(s![train_end.., LAG_24H_COLUMN_INDEX]).to_owned();

    (x_train, y_train, x_val, y_val, naive_val)
}

fn fit_one_horizon(horizon: u32, inputs: &TrainingInputs) -> HorizonFit {
    let started = std::time::Instant::now();
    let h_idx = (horizon - 1) as usize;

    let y_train_col = inputs.y_train.column(h_idx).to_owned();
    let y_val_col = inputs.y_val.column(h_idx).to_owned();

    let cv_result = cv::grid_search(&inputs.x_train, &y_train_col, CV_FOLDS, features::FEATURE_SCHEMA_VERSION);

    let final_model = RidgeModel::fit(
        &inputs.x_train,
        &y_train_col,
        cv_result.best_lambda,
        features::FEATURE_SCHEMA_VERSION,
    );

    let model_path = inputs.model_dir.join(format!("temp_forecast_h{horizon}.bin"));
    let encoded = match bincode::serialize(&final_model) {
        Ok(bytes) => bytes,
        Err(e) => {
            return HorizonFit {
                horizon_hours: horizon,
                model_path: None,
                error: Some(format!("failed to serialize model: {e}")),
                duration_seconds: started.elapsed().as_secs_f64(),
                metrics: None,
                naive_metrics: None,
                tail_metrics: None,
            }
        }
    };

    if let Err(e) = std::fs::write(&model_path, encoded) {
        return HorizonFit {
            horizon_hours: horizon,
            model_path: None,
            error: Some(format!("failed to write artifact: {e}")),
            duration_seconds: started.elapsed().as_secs_f64(),
            metrics: None,
            naive_metrics: None,
            tail_metrics: None,
        };
    }

    let naive_metrics = metrics::compute(&y_val_col, &inputs.naive_val);

    // Optional validation-report predictions (§4.7 step 4). These never feed
    // the registry row — only the OOF metrics from CV do — but they give the
    // markdown report a sense of how the model trained on the full set would
    // have performed against the truly held-out tail.
    let tail_predictions = final_model.predict(&inputs.x_val);
    let tail_metrics = metrics::compute(&y_val_col, &tail_predictions);

    HorizonFit {
        horizon_hours: horizon,
        model_path: Some(model_path.to_string_lossy().to_string()),
        error: None,
        duration_seconds: started.elapsed().as_secs_f64(),
        metrics: Some(cv_result.oof_metrics),
        naive_metrics: Some(naive_metrics),
        tail_metrics: Some(tail_metrics),
    }
}

/// One horizon's full fit result, kept internal to the training module;
/// the registry upsert and the markdown report both need more than the
/// bare [`TrainOutcome`] the rest of the system sees.
#[derive(Debug, Clone)]
struct HorizonFit {
    horizon_hours: u32,
    model_path: Option<String>,
    error: Option<String>,
    duration_seconds: f64,
    metrics: Option<Metrics>,
    naive_metrics: Option<Metrics>,
    tail_metrics: Option<Metrics>,
}

impl From<HorizonFit> for TrainOutcome {
    fn from(fit: HorizonFit) -> Self {
        TrainOutcome {
            horizon_hours: fit.horizon_hours,
            model_path: fit.model_path,
            error: fit.error,
        }
    }
}
