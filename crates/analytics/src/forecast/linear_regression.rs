use serde_json::{Value as JsonValue, json};

use crate::forecast::{Forecaster, ModelKind, Prediction};
use crate::result::AnalyticsResult;

/// Ordinary least squares of quantity on period index `0..n`, evaluated at
/// index `n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinearRegression;

/// Fitted line `intercept + slope * x` with its R².
#[derive(Debug, Clone, Copy, PartialEq)]
struct Fit {
    slope: f64,
    intercept: f64,
    r_squared: f64,
}

fn fit(ys: &[f64]) -> Fit {
    let n = ys.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = ys.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let predicted = intercept + slope * i as f64;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - y_mean).powi(2);
    }
    // A flat series is fitted exactly by a flat line.
    let r_squared = if ss_tot <= f64::EPSILON { 1.0 } else { (1.0 - ss_res / ss_tot).clamp(0.0, 1.0) };

    Fit {
        slope,
        intercept,
        r_squared,
    }
}

impl Forecaster for LinearRegression {
    fn kind(&self) -> ModelKind {
        ModelKind::LinearRegression
    }

    fn min_history(&self) -> usize {
        2
    }

    fn params(&self) -> JsonValue {
        json!({})
    }

    fn predict_next(&self, history: &[f64]) -> AnalyticsResult<Prediction> {
        let line = fit(history);
        let next = history.len() as f64;
        Ok(Prediction::new(line.intercept + line.slope * next).with_fit_quality(line.r_squared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::AnalyticsError;

    #[test]
    fn extends_a_straight_line() {
        let p = LinearRegression.forecast(&[10.0, 20.0, 30.0]).unwrap();
        assert!((p.value - 40.0).abs() < 1e-9);
        assert_eq!(p.fit_quality, Some(1.0));
    }

    #[test]
    fn one_point_is_not_enough() {
        let err = LinearRegression.forecast(&[10.0]).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::InsufficientData { required: 2, available: 1, .. }
        ));
    }

    #[test]
    fn noisy_series_reports_partial_fit() {
        let p = LinearRegression.forecast(&[5.0, 9.0, 4.0, 10.0, 6.0]).unwrap();
        let r2 = p.fit_quality.unwrap();
        assert!(r2 > 0.0 && r2 < 1.0);
    }

    #[test]
    fn flat_series_predicts_the_level() {
        let p = LinearRegression.forecast(&[7.0, 7.0, 7.0, 7.0]).unwrap();
        assert!((p.value - 7.0).abs() < 1e-9);
    }
}
