//! Deterministic feature pipeline (C7): the single source of truth used
//! verbatim at both training and prediction time. Any change to
//! [`Features`]'s field set must bump [`FEATURE_SCHEMA_VERSION`], since that
//! identifier is what ties a persisted model artifact back to the exact
//! transform that produced its training data.

pub mod solar;

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use ndarray::Array2;

use crate::weather::WeatherPoint;
use solar::solar_position;

/// Bumped whenever a field is added, removed, or redefined.
pub const FEATURE_SCHEMA_VERSION: &str = "features-v1";

const ROLLING_WINDOWS: [usize; 6] = [3, 6, 24, 48, 72, 168];
const TARGET_DIFFS: [usize; 5] = [1, 3, 6, 12, 24];

/// One row's worth of features. A fixed typed schema rather than a dynamic
/// column set, so training and prediction can never silently drift apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    pub hour_sin: f64,
    pub hour_cos: f64,

    pub solar_elevation_sin: f64,
    pub solar_azimuth_sin: f64,
    pub solar_azimuth_cos: f64,

    pub weather_humidity: f64,
    pub weather_cloud_cover: f64,
    pub weather_wind_speed: f64,
    pub weather_ghi: f64,

    pub lag_1h: f64,
    pub lag_2h: f64,
    pub lag_3h: f64,
    pub lag_24h: f64,

    pub roll_mean_3h: f64,
    pub roll_std_3h: f64,
    pub roll_mean_6h: f64,
    pub roll_std_6h: f64,
    pub roll_mean_24h: f64,
    pub roll_std_24h: f64,
    pub roll_mean_48h: f64,
    pub roll_std_48h: f64,
    pub roll_mean_72h: f64,
    pub roll_std_72h: f64,
    pub roll_mean_168h: f64,
    pub roll_std_168h: f64,

    pub diff_1h: f64,
    pub diff_3h: f64,
    pub diff_6h: f64,
    pub diff_12h: f64,
    pub diff_24h: f64,

    pub ghi_lag_1h: f64,
    pub ghi_lag_2h: f64,
    pub ghi_lag_3h: f64,
    pub ghi_lag_24h: f64,

    pub cloud_cover_lag_1h: f64,
    pub cloud_cover_lag_2h: f64,
    pub cloud_cover_lag_3h: f64,
    pub cloud_cover_lag_24h: f64,
}

impl Features {
    pub const COLUMN_COUNT: usize = FULL_COLUMN_COUNT;

    pub fn to_row(&self) -> [f64; Self::COLUMN_COUNT] {
        full_row(self)
    }
}

/// A feature/target frame aligned row-for-row by timestamp. `targets` has
/// `horizons` columns; column `h - 1` holds `y(t + h hours)`.
pub struct FeatureFrame {
    pub timestamps: Vec<DateTime<Utc>>,
    pub x: Array2<f64>,
    pub y: Array2<f64>,
}

/// A feature-only frame with no target columns, used for prediction. Every
/// row of the input series is represented (no horizon-lookahead drop); the
/// caller picks the last row for a live forecast or uses the whole frame
/// for a back-test (§4.6 "Output for prediction").
pub struct PredictionFrame {
    pub timestamps: Vec<DateTime<Utc>>,
    pub x: Array2<f64>,
}

impl PredictionFrame {
    /// The single most recent usable row, ready to feed a model's `predict`.
    pub fn latest_row(&self) -> Option<(DateTime<Utc>, Array2<f64>)> {
        let last = self.timestamps.len().checked_sub(1)?;
        Some((self.timestamps[last], self.x.slice(ndarray::s![last..=last, ..]).to_owned()))
    }
}

/// Builds the per-timestamp feature rows shared verbatim by training and
/// prediction (§4.6 steps 1-9). Every column is already interpolate-then-
/// backfilled, so no NaN survives except where an entire column's source
/// was unavailable for the whole series (filled with `0.0` instead).
fn compute_feature_rows(
    series: &[(DateTime<Utc>, f64)],
    weather: &BTreeMap<DateTime<Utc>, WeatherPoint>,
    timezone: &Tz,
    latitude: f64,
    longitude: f64,
) -> Vec<Features> {
    let n = series.len();
    let values: Vec<f64> = series.iter().map(|(_, v)| v).copied().collect();

    let hour_sin: Vec<f64> = series
        .iter()
        .map(|(ts, _)| {
            let local_hour = ts.with_timezone(timezone).hour() as u32;
            (2.0 * std::f64::consts::PI * local_hour as f64 / 24.0).sin()
        })
        .collect();
    let hour_cos: Vec<f64> = series
        .iter()
        .map(|(ts, _)| {
            let local_hour = ts.with_timezone(timezone).hour() as u32;
            (2.0 * std::f64::consts::PI * local_hour as f64 / 24.0).cos()
        })
        .collect();

    let solar: Vec<_> = series
        .iter()
        .map(|(ts, _)| solar_position(*ts, latitude, longitude))
        .collect();

    let hour_bucket = |ts: &DateTime<Utc>| -> DateTime<Utc> {
        ts.date_naive()
            .and_hms_opt(chrono::Timelike::hour(ts), 0, 0)
            .unwrap()
            .and_utc()
    };
    let weather_points: Vec<WeatherPoint> = series
        .iter()
        .map(|(ts, _)| weather.get(&hour_bucket(ts)).copied().unwrap_or_default())
        .collect();

    let weather_humidity = interpolate_then_bfill(weather_points.iter().map(|w| w.humidity).collect());
    let weather_cloud_cover = interpolate_then_bfill(weather_points.iter().map(|w| w.cloud_cover).collect());
    let weather_wind_speed = interpolate_then_bfill(weather_points.iter().map(|w| w.wind_speed).collect());
    let weather_ghi = interpolate_then_bfill(weather_points.iter().map(|w| w.ghi).collect());

    let shift1 = shift(&values, 1);

    let lag_1h = shift(&values, 1);
    let lag_2h = shift(&values, 2);
    let lag_3h = shift(&values, 3);
    let lag_24h = shift(&values, 24);

    let rolling: BTreeMap<usize, (Vec<f64>, Vec<f64>)> = ROLLING_WINDOWS
        .iter()
        .map(|&w| (w, (rolling_mean(&shift1, w), rolling_std(&shift1, w))))
        .collect();

    let diffs: BTreeMap<usize, Vec<f64>> = TARGET_DIFFS
        .iter()
        .map(|&k| (k, diff(&shift1, k)))
        .collect();

    let ghi_lag_1h = shift(&weather_ghi, 1);
    let ghi_lag_2h = shift(&weather_ghi, 2);
    let ghi_lag_3h = shift(&weather_ghi, 3);
    let ghi_lag_24h = shift(&weather_ghi, 24);
    let cloud_lag_1h = shift(&weather_cloud_cover, 1);
    let cloud_lag_2h = shift(&weather_cloud_cover, 2);
    let cloud_lag_3h = shift(&weather_cloud_cover, 3);
    let cloud_lag_24h = shift(&weather_cloud_cover, 24);

    // interpolate + backfill every lag/rolling/diff column (the raw join
    // columns were already filled above).
    let lag_1h = interpolate_then_bfill(lag_1h.into_iter().map(Some).collect());
    let lag_2h = interpolate_then_bfill(lag_2h.into_iter().map(Some).collect());
    let lag_3h = interpolate_then_bfill(lag_3h.into_iter().map(Some).collect());
    let lag_24h = interpolate_then_bfill(lag_24h.into_iter().map(Some).collect());

    let mut roll_filled: BTreeMap<usize, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for (&w, (mean, std)) in rolling.iter() {
        roll_filled.insert(
            w,
            (
                interpolate_then_bfill(mean.iter().copied().map(Some).collect()),
                interpolate_then_bfill(std.iter().copied().map(Some).collect()),
            ),
        );
    }

    let mut diffs_filled: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for (&k, d) in diffs.iter() {
        diffs_filled.insert(k, interpolate_then_bfill(d.iter().copied().map(Some).collect()));
    }

    let ghi_lag_1h = interpolate_then_bfill(ghi_lag_1h.into_iter().map(Some).collect());
    let ghi_lag_2h = interpolate_then_bfill(ghi_lag_2h.into_iter().map(Some).collect());
    let ghi_lag_3h = interpolate_then_bfill(ghi_lag_3h.into_iter().map(Some).collect());
    let ghi_lag_24h = interpolate_then_bfill(ghi_lag_24h.into_iter().map(Some).collect());
    let cloud_lag_1h = interpolate_then_bfill(cloud_lag_1h.into_iter().map(Some).collect());
    let cloud_lag_2h = interpolate_then_bfill(cloud_lag_2h.into_iter().map(Some).collect());
    let cloud_lag_3h = interpolate_then_bfill(cloud_lag_3h.into_iter().map(Some).collect());
    let cloud_lag_24h = interpolate_then_bfill(cloud_lag_24h.into_iter().map(Some).collect());

    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let (mean3, std3) = &roll_filled[&3];
        let (mean6, std6) = &roll_filled[&6];
        let (mean24, std24) = &roll_filled[&24];
        let (mean48, std48) = &roll_filled[&48];
        let (mean72, std72) = &roll_filled[&72];
        let (mean168, std168) = &roll_filled[&168];

        rows.push(Features {
            hour_sin: hour_sin[i],
            hour_cos: hour_cos[i],
            solar_elevation_sin: solar[i].elevation_sin,
            solar_azimuth_sin: solar[i].azimuth_sin,
            solar_azimuth_cos: solar[i].azimuth_cos,
            weather_humidity: weather_humidity[i],
            weather_cloud_cover: weather_cloud_cover[i],
            weather_wind_speed: weather_wind_speed[i],
            weather_ghi: weather_ghi[i],
            lag_1h: lag_1h[i],
            lag_2h: lag_2h[i],
            lag_3h: lag_3h[i],
            lag_24h: lag_24h[i],
            roll_mean_3h: mean3[i],
            roll_std_3h: std3[i],
            roll_mean_6h: mean6[i],
            roll_std_6h: std6[i],
            roll_mean_24h: mean24[i],
            roll_std_24h: std24[i],
            roll_mean_48h: mean48[i],
            roll_std_48h: std48[i],
            roll_mean_72h: mean72[i],
            roll_std_72h: std72[i],
            roll_mean_168h: mean168[i],
            roll_std_168h: std168[i],
            diff_1h: diffs_filled[&1][i],
            diff_3h: diffs_filled[&3][i],
            diff_6h: diffs_filled[&6][i],
            diff_12h: diffs_filled[&12][i],
            diff_24h: diffs_filled[&24][i],
            ghi_lag_1h: ghi_lag_1h[i],
            ghi_lag_2h: ghi_lag_2h[i],
            ghi_lag_3h: ghi_lag_3h[i],
            ghi_lag_24h: ghi_lag_24h[i],
            cloud_cover_lag_1h: cloud_lag_1h[i],
            cloud_cover_lag_2h: cloud_lag_2h[i],
            cloud_cover_lag_3h: cloud_lag_3h[i],
            cloud_cover_lag_24h: cloud_lag_24h[i],
        });
    }

    rows
}

/// Builds the full training frame from an hourly series. Rows are dropped
/// from the front (insufficient lookback for the longest lag/window) and
/// from the back (insufficient lookahead for the largest horizon).
pub fn build_training_frame(
    series: &[(DateTime<Utc>, f64)],
    weather: &BTreeMap<DateTime<Utc>, WeatherPoint>,
    timezone: &Tz,
    latitude: f64,
    longitude: f64,
    horizons: u32,
) -> FeatureFrame {
    let n = series.len();
    let values: Vec<f64> = series.iter().map(|(_, v)| v).copied().collect();
    let rows = compute_feature_rows(series, weather, timezone, latitude, longitude);

    let targets: Vec<Vec<f64>> = (1..=horizons as usize)
        .map(|h| shift_negative(&values, h))
        .collect();

    // Usable rows: X has no residual NaN (dropped from the front, where
    // even backfill can't reach past the series start for the longest
    // window) and the largest horizon's target is present (dropped from
    // the back).
    let max_horizon_col = horizons as usize - 1;
    let mut keep = Vec::new();
    for i in 0..n {
        let row = rows[i].to_row();
        if row.iter().any(|v| v.is_nan()) {
            continue;
        }
        if targets[max_horizon_col][i].is_nan() {
            continue;
        }
        keep.push(i);
    }

    let timestamps: Vec<DateTime<Utc>> = keep.iter().map(|&i| series[i].0).collect();
    let mut x_flat = Vec::with_capacity(keep.len() * Features::COLUMN_COUNT);
    for &i in &keep {
        x_flat.extend_from_slice(&full_row(&rows[i]));
    }
    let k = FULL_COLUMN_COUNT;
    let x = Array2::from_shape_vec((keep.len(), k), x_flat).expect("row length matches column count");

    let mut y_flat = Vec::with_capacity(keep.len() * horizons as usize);
    for &i in &keep {
        for h in 0..horizons as usize {
            y_flat.push(targets[h][i]);
        }
    }
    let y = Array2::from_shape_vec((keep.len(), horizons as usize), y_flat)
        .expect("row length matches horizon count");

    FeatureFrame { timestamps, x, y }
}

/// Builds a feature-only frame for prediction/back-test serving (§4.6
/// "Output for prediction"). No target columns, no horizon-lookahead row
/// drop: every input row yields one output row, in the same column order
/// [`build_training_frame`] uses, so a model trained against one is valid
/// against the other.
pub fn build_prediction_frame(
    series: &[(DateTime<Utc>, f64)],
    weather: &BTreeMap<DateTime<Utc>, WeatherPoint>,
    timezone: &Tz,
    latitude: f64,
    longitude: f64,
) -> PredictionFrame {
    let rows = compute_feature_rows(series, weather, timezone, latitude, longitude);

    let mut x_flat = Vec::with_capacity(rows.len() * FULL_COLUMN_COUNT);
    for row in &rows {
        x_flat.extend_from_slice(&full_row(row));
    }
    let x = Array2::from_shape_vec((rows.len(), FULL_COLUMN_COUNT), x_flat)
        .expect("row length matches column count");

    PredictionFrame {
        timestamps: series.iter().map(|(ts, _)| *ts).collect(),
        x,
    }
}

const FULL_COLUMN_COUNT: usize = 38;

/// Column index of `lag_24h` within [`full_row`]'s output — the naive
/// 24-hour-ago baseline the training orchestrator compares models against.
pub const LAG_24H_COLUMN_INDEX: usize = 12;

/// All 38 columns, in the order they must appear at both train and predict
/// time.
fn full_row(f: &Features) -> [f64; FULL_COLUMN_COUNT] {
    [
        f.hour_sin,
        f.hour_cos,
        f.solar_elevation_sin,
        f.solar_azimuth_sin,
        f.solar_azimuth_cos,
        f.weather_humidity,
        f.weather_cloud_cover,
        f.weather_wind_speed,
        f.weather_ghi,
        f.lag_1h,
        f.lag_2h,
        f.lag_3h,
        f.lag_24h,
        f.roll_mean_3h,
        f.roll_std_3h,
        f.roll_mean_6h,
        f.roll_std_6h,
        f.roll_mean_24h,
        f.roll_std_24h,
        f.roll_mean_48h,
        f.roll_std_48h,
        f.roll_mean_72h,
        f.roll_std_72h,
        f.roll_mean_168h,
        f.roll_std_168h,
        f.diff_1h,
        f.diff_3h,
        f.diff_6h,
        f.diff_12h,
        f.diff_24h,
        f.ghi_lag_1h,
        f.ghi_lag_2h,
        f.ghi_lag_3h,
        f.ghi_lag_24h,
        f.cloud_cover_lag_1h,
        f.cloud_cover_lag_2h,
        f.cloud_cover_lag_3h,
        f.cloud_cover_lag_24h,
    ]
}

fn shift(values: &[f64], k: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in k..values.len() {
        out[i] = values[i - k];
    }
    out
}

/// `shift(-h)`: pulls a value from `h` steps in the future.
fn shift_negative(values: &[f64], h: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    for i in 0..n {
        if i + h < n {
            out[i] = values[i + h];
        }
    }
    out
}

fn diff(values: &[f64], periods: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in periods..values.len() {
        out[i] = values[i] - values[i - periods];
    }
    out
}

fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 0..values.len() {
        if i + 1 < window {
            continue;
        }
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        out[i] = slice.iter().sum::<f64>() / window as f64;
    }
    out
}

fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 0..values.len() {
        if i + 1 < window {
            continue;
        }
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mean = slice.iter().sum::<f64>() / window as f64;
        // Sample standard deviation (ddof=1), matching pandas' default.
        let variance = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window as f64 - 1.0);
        out[i] = variance.sqrt();
    }
    out
}

/// Linear interpolation over internal NaN runs, followed by a backward
/// fill of any NaNs that remain at the start of the series.
fn interpolate_then_bfill(values: Vec<Option<f64>>) -> Vec<f64> {
    let n = values.len();
    let mut out: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();

    let mut i = 0;
    while i < n {
        if out[i].is_nan() {
            let start = i;
            while i < n && out[i].is_nan() {
                i += 1;
            }
            let end = i; // first non-NaN index after the run, or n
            if start > 0 && end < n {
                let before = out[start - 1];
                let after = out[end];
                let span = (end - start + 1) as f64;
                for (offset, slot) in out[start..end].iter_mut().enumerate() {
                    let t = (offset + 1) as f64 / span;
                    *slot = before + (after - before) * t;
                }
            }
        } else {
            i += 1;
        }
    }

    match out.iter().position(|v| !v.is_nan()) {
        Some(first_valid) => {
            for slot in out[..first_valid].iter_mut() {
                *slot = out[first_valid];
            }
        }
        // No value anywhere in the column (e.g. the weather fetch failed
        // outright): fall back to a neutral 0.0 rather than dropping every
        // row for want of one feature.
        None => out.fill(0.0),
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolate_fills_internal_gap_linearly() {
        let values = vec![Some(0.0), None, None, Some(3.0)];
        let out = interpolate_then_bfill(values);
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn interpolate_backfills_leading_nan() {
        let values = vec![None, None, Some(5.0), Some(6.0)];
        let out = interpolate_then_bfill(values);
        assert_eq!(out, vec![5.0, 5.0, 5.0, 6.0]);
    }

    #[test]
    fn interpolate_falls_back_to_zero_when_column_is_entirely_absent() {
        let values = vec![None, None, None];
        let out = interpolate_then_bfill(values);
        assert_eq!(out, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn shift_moves_values_forward_with_nan_prefix() {
        let out = shift(&[1.0, 2.0, 3.0], 1);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 1.0);
        assert_eq!(out[2], 2.0);
    }

    #[test]
    fn shift_negative_pulls_future_values() {
        let out = shift_negative(&[1.0, 2.0, 3.0], 1);
        assert_eq!(out[0], 2.0);
        assert_eq!(out[1], 3.0);
        assert!(out[2].is_nan());
    }

    #[test]
    fn rolling_mean_requires_full_window() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 1.5);
        assert_eq!(out[3], 3.5);
    }

    fn synthetic_series(hours: i64) -> Vec<(DateTime<Utc>, f64)> {
        let start = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        (0..hours)
            .map(|i| {
                let ts = start + chrono::Duration::hours(i);
                (ts, 15.0 + (i as f64 / 24.0 * std::f64::consts::TAU).sin() * 5.0)
            })
            .collect()
    }

    #[test]
    fn prediction_frame_has_one_row_per_input_timestamp_and_no_nan() {
        let series = synthetic_series(24 * 10);
        let tz: Tz = "Europe/London".parse().unwrap();
        let frame = build_prediction_frame(&series, &BTreeMap::new(), &tz, 52.0, -1.7);

        assert_eq!(frame.timestamps.len(), series.len());
        assert_eq!(frame.x.nrows(), series.len());
        assert_eq!(frame.x.ncols(), Features::COLUMN_COUNT);
        assert!(frame.x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn prediction_frame_latest_row_matches_training_frame_columns() {
        let series = synthetic_series(24 * 10);
        let tz: Tz = "Europe/London".parse().unwrap();
        let prediction = build_prediction_frame(&series, &BTreeMap::new(), &tz, 52.0, -1.7);
        let training = build_training_frame(&series, &BTreeMap::new(), &tz, 52.0, -1.7, 1);

        let (ts, row) = prediction.latest_row().expect("series is non-empty");
        assert_eq!(ts, series.last().unwrap().0);
        assert_eq!(row.ncols(), training.x.ncols());
    }
}
