use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::forecast::{Forecaster, ModelKind, Prediction};
use crate::result::{AnalyticsError, AnalyticsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomForestConfig {
    pub trees: usize,
    pub max_depth: usize,
    /// Nodes with fewer samples become leaves.
    pub min_samples_split: usize,
    /// Previous periods used as features next to the period index.
    pub lags: usize,
    /// Fixes bootstrap sampling; drawn at random when absent.
    pub seed: Option<u64>,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            trees: 100,
            max_depth: 6,
            min_samples_split: 2,
            lags: 1,
            seed: None,
        }
    }
}

/// Bagged CART regression trees over `[period index, lag_1 .. lag_k]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomForest {
    pub config: RandomForestConfig,
}

impl RandomForest {
    pub fn new(config: RandomForestConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, x: &[f64]) -> f64 {
        match self {
            Node::Leaf(value) => *value,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if x[*feature] <= *threshold {
                    left.predict(x)
                } else {
                    right.predict(x)
                }
            }
        }
    }
}

struct TreeBuilder<'a> {
    features: &'a [Vec<f64>],
    targets: &'a [f64],
    max_depth: usize,
    min_samples_split: usize,
}

impl TreeBuilder<'_> {
    fn build(&self, rows: &[usize], depth: usize) -> Node {
        let mean = mean_of(rows.iter().map(|&r| self.targets[r]));
        if depth >= self.max_depth || rows.len() < self.min_samples_split.max(2) {
            return Node::Leaf(mean);
        }
        let parent_sse = sse(rows.iter().map(|&r| self.targets[r]), mean);
        if parent_sse <= f64::EPSILON {
            return Node::Leaf(mean);
        }

        match self.best_split(rows) {
            Some((feature, threshold, split_sse)) if split_sse < parent_sse - 1e-12 => {
                let (left, right): (Vec<usize>, Vec<usize>) =
                    rows.iter().partition(|&&r| self.features[r][feature] <= threshold);
                Node::Split {
                    feature,
                    threshold,
                    left: Box::new(self.build(&left, depth + 1)),
                    right: Box::new(self.build(&right, depth + 1)),
                }
            }
            _ => Node::Leaf(mean),
        }
    }

    /// Lowest total squared error split as `(feature, threshold, sse)`.
    fn best_split(&self, rows: &[usize]) -> Option<(usize, f64, f64)> {
        let width = self.features[rows[0]].len();
        let mut best: Option<(usize, f64, f64)> = None;

        for feature in 0..width {
            let mut ordered: Vec<(f64, f64)> = rows
                .iter()
                .map(|&r| (self.features[r][feature], self.targets[r]))
                .collect();
            ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

            let total: f64 = ordered.iter().map(|(_, y)| y).sum();
            let total_sq: f64 = ordered.iter().map(|(_, y)| y * y).sum();
            let (mut left_sum, mut left_sq) = (0.0, 0.0);

            for i in 0..ordered.len() - 1 {
                let (x, y) = ordered[i];
                left_sum += y;
                left_sq += y * y;
                if x == ordered[i + 1].0 {
                    continue;
                }
                let left_n = (i + 1) as f64;
                let right_n = (ordered.len() - i - 1) as f64;
                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let split_sse =
                    (left_sq - left_sum * left_sum / left_n) + (right_sq - right_sum * right_sum / right_n);

                if best.is_none_or(|(_, _, b)| split_sse < b) {
                    best = Some((feature, (x + ordered[i + 1].0) / 2.0, split_sse));
                }
            }
        }
        best
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn sse(values: impl Iterator<Item = f64>, mean: f64) -> f64 {
    values.map(|v| (v - mean).powi(2)).sum()
}

/// Training rows: for each index `i >= lags`, features
/// `[i, y[i-1], .., y[i-lags]]` and target `y[i]`.
fn lagged_rows(history: &[f64], lags: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    (lags..history.len())
        .map(|i| (features_at(history, i, lags), history[i]))
        .unzip()
}

fn features_at(history: &[f64], index: usize, lags: usize) -> Vec<f64> {
    let mut row = Vec::with_capacity(lags + 1);
    row.push(index as f64);
    row.extend((1..=lags).map(|k| history[index - k]));
    row
}

impl Forecaster for RandomForest {
    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
    }

    fn min_history(&self) -> usize {
        self.config.lags + 2
    }

    fn validate(&self) -> AnalyticsResult<()> {
        let c = &self.config;
        if c.trees == 0 {
            return Err(AnalyticsError::InvalidConfig("random forest needs at least one tree".to_string()));
        }
        if c.max_depth == 0 {
            return Err(AnalyticsError::InvalidConfig("max_depth must be at least 1".to_string()));
        }
        if c.min_samples_split < 2 {
            return Err(AnalyticsError::InvalidConfig("min_samples_split must be at least 2".to_string()));
        }
        Ok(())
    }

    fn params(&self) -> JsonValue {
        json!({
            "trees": self.config.trees,
            "max_depth": self.config.max_depth,
            "min_samples_split": self.config.min_samples_split,
            "lags": self.config.lags,
            "seed": self.config.seed,
        })
    }

    fn predict_next(&self, history: &[f64]) -> AnalyticsResult<Prediction> {
        let c = &self.config;
        let (features, targets) = lagged_rows(history, c.lags);
        let query = features_at(history, history.len(), c.lags);
        let builder = TreeBuilder {
            features: &features,
            targets: &targets,
            max_depth: c.max_depth,
            min_samples_split: c.min_samples_split,
        };

        let seed = c.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let n = targets.len();

        let predictions: Vec<f64> = (0..c.trees)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                builder.build(&sample, 0).predict(&query)
            })
            .collect();

        let mean = mean_of(predictions.iter().copied());
        let spread = (sse(predictions.iter().copied(), mean) / predictions.len() as f64).sqrt();
        tracing::trace!(seed, trees = c.trees, samples = n, "random forest fitted");
        Ok(Prediction::new(mean).with_spread(spread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seeded(seed: u64) -> RandomForest {
        RandomForest::new(RandomForestConfig {
            seed: Some(seed),
            ..Default::default()
        })
    }

    #[test]
    fn constant_series_predicts_the_constant() {
        let p = seeded(7).forecast(&[12.0; 8]).unwrap();
        assert!((p.value - 12.0).abs() < 1e-9);
        assert_eq!(p.spread, Some(0.0));
    }

    #[test]
    fn needs_lags_plus_two_points() {
        let rf = RandomForest::new(RandomForestConfig {
            lags: 2,
            ..Default::default()
        });
        assert!(matches!(
            rf.forecast(&[1.0, 2.0, 3.0]),
            Err(AnalyticsError::InsufficientData { required: 4, available: 3, .. })
        ));
        assert!(rf.forecast(&[1.0, 2.0, 3.0, 4.0]).is_ok());
    }

    #[test]
    fn zero_trees_is_invalid() {
        let rf = RandomForest::new(RandomForestConfig {
            trees: 0,
            ..Default::default()
        });
        assert!(matches!(rf.forecast(&[1.0; 5]), Err(AnalyticsError::InvalidConfig(_))));
    }

    #[test]
    fn prediction_stays_within_observed_range() {
        let history = [3.0, 8.0, 5.0, 12.0, 9.0, 14.0, 11.0, 16.0];
        let p = seeded(42).forecast(&history).unwrap();
        assert!((3.0..=16.0).contains(&p.value));
    }

    proptest! {
        #[test]
        fn same_seed_same_forecast(
            history in prop::collection::vec(0.0f64..500.0, 3..30),
            seed in any::<u64>(),
        ) {
            let a = seeded(seed).forecast(&history).unwrap();
            let b = seeded(seed).forecast(&history).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
