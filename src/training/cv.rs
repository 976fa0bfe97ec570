//! Time-series cross-validation and hyperparameter grid search (§4.7
//! steps a-c). Folds are expanding windows — each fold trains on every row
//! before its validation block — never a random shuffle, since shuffling
//! would leak the future into the past.

use ndarray::{s, Array1, Array2};

use super::metrics::{self, Metrics};
use super::regression::RidgeModel;

/// The ridge penalty values tried during grid search.
pub const LAMBDA_GRID: [f64; 5] = [0.01, 0.1, 1.0, 10.0, 100.0];

pub struct CvResult {
    pub best_lambda: f64,
    pub oof_metrics: Metrics,
}

/// Expanding-window fold boundaries over `n` rows: fold `i` validates on a
/// contiguous block, trained on everything strictly before it.
fn expanding_folds(n: usize, folds: usize) -> Vec<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    let fold_size = n / (folds + 1);
    (1..=folds)
        .filter_map(|i| {
            let train_end = fold_size * i;
            let val_end = std::cmp::min(fold_size * (i + 1), n);
            if train_end == 0 || train_end >= val_end {
                return None;
            }
            Some((0..train_end, train_end..val_end))
        })
        .collect()
}

/// Runs grid search over [`LAMBDA_GRID`], picks the lambda with the lowest
/// mean out-of-fold RMSE across folds, and returns metrics computed on the
/// concatenation of all folds' out-of-fold predictions at that lambda.
pub fn grid_search(
    x: &Array2<f64>,
    y: &Array1<f64>,
    folds: usize,
    feature_schema_version: &str,
) -> CvResult {
    let fold_ranges = expanding_folds(x.nrows(), folds);

    let mut best_lambda = LAMBDA_GRID[0];
    let mut best_mean_rmse = f64::INFINITY;
    let mut best_oof_actual = Array1::zeros(0);
    let mut best_oof_predicted = Array1::zeros(0);

    for &lambda in LAMBDA_GRID.iter() {
        let mut oof_actual = Vec::new();
        let mut oof_predicted = Vec::new();

        for (train_range, val_range) in &fold_ranges {
            let x_train = x.slice(s![train_range.clone(), ..]).to_owned();
            let y_train = y.slice(s![train_range.clone()]).to_owned();
            let x_val = x.slice(s![val_range.clone(), ..]).to_owned();
            let y_val = y.slice(s![val_range.clone()]).to_owned();

            let model = RidgeModel::fit(&x_train, &y_train, lambda, feature_schema_version);
            let preds = model.predict(&x_val);

            oof_actual.extend(y_val.iter().copied());
            oof_predicted.extend(preds.iter().copied());
        }

        if oof_actual.is_empty() {
            continue;
        }

        let actual_arr = Array1::from_vec(oof_actual);
        let predicted_arr = Array1::from_vec(oof_predicted);
        let m = metrics::compute(&actual_arr, &predicted_arr);

        if m.rmse < best_mean_rmse {
            best_mean_rmse = m.rmse;
            best_lambda = lambda;
            best_oof_actual = actual_arr;
            best_oof_predicted = predicted_arr;
        }
    }

    let oof_metrics = if best_oof_actual.is_empty() {
        Metrics { mae: f64::NAN, rmse: f64::NAN, mape: f64::NAN, r2: f64::NAN }
    } else {
        metrics::compute(&best_oof_actual, &best_oof_predicted)
    };

    CvResult {
        best_lambda,
        oof_metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expanding_folds_never_validate_on_earlier_rows_than_trained() {
        let folds = expanding_folds(100, 3);
        for (train, val) in &folds {
            assert!(train.end <= val.start);
        }
    }

    #[test]
    fn grid_search_picks_a_lambda_from_the_grid() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| (i + j) as f64);
        let y = Array1::from_shape_fn(40, |i| i as f64 * 2.0 + 1.0);
        let result = grid_search(&x, &y, 3, "test-v1");
        assert!(LAMBDA_GRID.contains(&result.best_lambda));
        assert!(result.oof_metrics.rmse.is_finite());
    }
}
