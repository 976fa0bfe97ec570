//! Closed-form ridge regression learner.
//!
//! `w = (XᵀX + λI)⁻¹Xᵀy`, with an intercept term folded in as an extra
//! all-ones column. Ridge's regularization keeps `XᵀX + λI` full rank for
//! any `λ > 0`, so a direct inverse (rather than the SVD-based
//! pseudo-inverse a rank-deficient system would need) is sufficient.

use ndarray::{Array1, Array2, Axis};
use ndarray_inverse::Inverse;
use serde::{Deserialize, Serialize};

/// A fitted ridge regression model for one forecast horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeModel {
    /// `weights[0]` is the intercept; `weights[1..]` align with the feature
    /// columns in the order `features::full_row` produces them.
    pub weights: Vec<f64>,
    pub lambda: f64,
    pub feature_schema_version: String,
}

impl RidgeModel {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, lambda: f64, feature_schema_version: &str) -> Self {
        let augmented = with_intercept_column(x);
        let n_features = augmented.ncols();

        let xt = augmented.t();
        let mut gram = xt.dot(&augmented);
        // Column 0 is the intercept; conventional ridge leaves it unpenalized.
        for i in 1..n_features {
            gram[[i, i]] += lambda;
        }

        let xt_y = xt.dot(y);
        let inverse = gram
            .lu_inv()
            .expect("gram matrix regularized by lambda is always invertible");
        let weights = inverse.dot(&xt_y);

        RidgeModel {
            weights: weights.to_vec(),
            lambda,
            feature_schema_version: feature_schema_version.to_string(),
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        let augmented = with_intercept_column(x);
        let weights = Array1::from_vec(self.weights.clone());
        augmented.dot(&weights)
    }
}

fn with_intercept_column(x: &Array2<f64>) -> Array2<f64> {
    let ones = Array2::ones((x.nrows(), 1));
    ndarray::concatenate(Axis(1), &[ones.view(), x.view()]).expect("same row count")
}
