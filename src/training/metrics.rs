//! Regression metrics computed on out-of-fold predictions only (§9 design
//! note: the source's refit-on-train numbers are optimistic and excluded).

use ndarray::Array1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub r2: f64,
}

pub fn compute(actual: &Array1<f64>, predicted: &Array1<f64>) -> Metrics {
    assert_eq!(actual.len(), predicted.len());
    let n = actual.len() as f64;

    let errors: Vec<f64> = actual.iter().zip(predicted.iter()).map(|(a, p)| a - p).collect();
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();

    let mape = errors
        .iter()
        .zip(actual.iter())
        .filter(|(_, a)| a.abs() > f64::EPSILON)
        .map(|(e, a)| (e / a).abs())
        .sum::<f64>()
        / n
        * 100.0;

    let mean_actual = actual.sum() / n;
    let ss_res: f64 = errors.iter().map(|e| e * e).sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();
    let r2 = if ss_tot.abs() < f64::EPSILON {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    };

    Metrics { mae, rmse, mape, r2 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn perfect_predictions_yield_zero_error_and_unit_r2() {
        let actual = array![1.0, 2.0, 3.0, 4.0];
        let m = compute(&actual, &actual);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.rmse, 0.0);
        assert!((m.r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn constant_offset_matches_expected_mae() {
        let actual = array![10.0, 10.0, 10.0];
        let predicted = array![11.0, 11.0, 11.0];
        let m = compute(&actual, &predicted);
        assert_eq!(m.mae, 1.0);
        assert_eq!(m.rmse, 1.0);
    }
}
