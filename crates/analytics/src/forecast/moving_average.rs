use serde_json::{Value as JsonValue, json};

use crate::forecast::{Forecaster, ModelKind, Prediction};
use crate::result::{AnalyticsError, AnalyticsResult};

/// Mean of the last `window` periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovingAverage {
    pub window: usize,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        Self { window }
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self { window: 3 }
    }
}

impl Forecaster for MovingAverage {
    fn kind(&self) -> ModelKind {
        ModelKind::MovingAverage
    }

    fn min_history(&self) -> usize {
        self.window
    }

    fn validate(&self) -> AnalyticsResult<()> {
        if self.window == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "moving average window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn params(&self) -> JsonValue {
        json!({ "window": self.window })
    }

    fn predict_next(&self, history: &[f64]) -> AnalyticsResult<Prediction> {
        let tail = &history[history.len() - self.window..];
        let n = tail.len() as f64;
        let mean = tail.iter().sum::<f64>() / n;
        let variance = tail.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Ok(Prediction::new(mean).with_spread(variance.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn averages_the_last_window() {
        let ma = MovingAverage::new(3);
        assert_eq!(ma.forecast(&[10.0, 20.0, 30.0]).unwrap().value, 20.0);
        assert_eq!(ma.forecast(&[100.0, 10.0, 20.0, 30.0]).unwrap().value, 20.0);
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(matches!(
            MovingAverage::new(0).forecast(&[1.0]),
            Err(AnalyticsError::InvalidConfig(_))
        ));
    }

    proptest! {
        #[test]
        fn stays_within_window_bounds(
            history in prop::collection::vec(0.0f64..1_000.0, 1..40),
            window in 1usize..10,
        ) {
            prop_assume!(history.len() >= window);
            let tail = &history[history.len() - window..];
            let lo = tail.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = tail.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

            let value = MovingAverage::new(window).forecast(&history).unwrap().value;
            prop_assert!(value >= lo - 1e-9 && value <= hi + 1e-9);
        }
    }
}
