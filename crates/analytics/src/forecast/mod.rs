//! Demand forecasting.
//!
//! Three interchangeable models share the `Forecaster` trait. Each takes an
//! ordered history (one aggregate quantity per period) and projects the next
//! period. `DemandForecaster` ties a model to the record store by building the
//! history from the sales ledger.

mod linear_regression;
mod moving_average;
mod random_forest;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use pharmacy_core::DrugId;
use pharmacy_store::{RecordStore, SaleFilter};

use crate::result::{AnalyticsError, AnalyticsResult};
use crate::series::{DemandSeries, Period};

pub use linear_regression::LinearRegression;
pub use moving_average::MovingAverage;
pub use random_forest::{RandomForest, RandomForestConfig};

/// Raw model output before clamping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub value: f64,
    /// Goodness of fit in [0, 1] where the model has one (R² for regression).
    pub fit_quality: Option<f64>,
    /// Dispersion behind the estimate (window or per-tree standard deviation).
    pub spread: Option<f64>,
}

impl Prediction {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            fit_quality: None,
            spread: None,
        }
    }

    pub fn with_fit_quality(mut self, fit_quality: f64) -> Self {
        self.fit_quality = Some(fit_quality);
        self
    }

    pub fn with_spread(mut self, spread: f64) -> Self {
        self.spread = Some(spread);
        self
    }
}

/// A demand model that projects the period after `history`.
pub trait Forecaster {
    fn kind(&self) -> ModelKind;

    /// Shortest history the model accepts.
    fn min_history(&self) -> usize;

    /// Check model parameters.
    fn validate(&self) -> AnalyticsResult<()> {
        Ok(())
    }

    /// Model parameters, for result metadata.
    fn params(&self) -> JsonValue {
        JsonValue::Null
    }

    /// Predict without input checks. Callers go through `forecast`.
    fn predict_next(&self, history: &[f64]) -> AnalyticsResult<Prediction>;

    /// Validate, predict and clamp the projection at zero.
    fn forecast(&self, history: &[f64]) -> AnalyticsResult<Prediction> {
        self.validate()?;
        if let Some(bad) = history.iter().find(|q| !q.is_finite()) {
            return Err(AnalyticsError::InvalidInput(format!("history contains {bad}")));
        }
        let required = self.min_history();
        if history.len() < required {
            return Err(AnalyticsError::InsufficientData {
                model: self.kind().as_str(),
                required,
                available: history.len(),
            });
        }
        let mut prediction = self.predict_next(history)?;
        prediction.value = prediction.value.max(0.0);
        Ok(prediction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    MovingAverage,
    LinearRegression,
    RandomForest,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::MovingAverage => "moving-average",
            ModelKind::LinearRegression => "linear-regression",
            ModelKind::RandomForest => "random-forest",
        }
    }
}

impl core::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ModelKind {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "moving-average" | "ma" => Ok(ModelKind::MovingAverage),
            "linear-regression" | "lr" => Ok(ModelKind::LinearRegression),
            "random-forest" | "rf" => Ok(ModelKind::RandomForest),
            other => Err(AnalyticsError::InvalidConfig(format!("unknown forecast model '{other}'"))),
        }
    }
}

/// Model selector carrying each model's parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastModel {
    MovingAverage(MovingAverage),
    LinearRegression(LinearRegression),
    RandomForest(RandomForest),
}

impl ForecastModel {
    pub fn moving_average(window: usize) -> Self {
        ForecastModel::MovingAverage(MovingAverage::new(window))
    }

    pub fn linear_regression() -> Self {
        ForecastModel::LinearRegression(LinearRegression)
    }

    pub fn random_forest(config: RandomForestConfig) -> Self {
        ForecastModel::RandomForest(RandomForest::new(config))
    }

    /// Model of `kind` with default parameters.
    pub fn default_for(kind: ModelKind) -> Self {
        match kind {
            ModelKind::MovingAverage => ForecastModel::MovingAverage(MovingAverage::default()),
            ModelKind::LinearRegression => Self::linear_regression(),
            ModelKind::RandomForest => Self::random_forest(RandomForestConfig::default()),
        }
    }

    fn inner(&self) -> &dyn Forecaster {
        match self {
            ForecastModel::MovingAverage(m) => m,
            ForecastModel::LinearRegression(m) => m,
            ForecastModel::RandomForest(m) => m,
        }
    }
}

impl Forecaster for ForecastModel {
    fn kind(&self) -> ModelKind {
        self.inner().kind()
    }

    fn min_history(&self) -> usize {
        self.inner().min_history()
    }

    fn validate(&self) -> AnalyticsResult<()> {
        self.inner().validate()
    }

    fn params(&self) -> JsonValue {
        self.inner().params()
    }

    fn predict_next(&self, history: &[f64]) -> AnalyticsResult<Prediction> {
        self.inner().predict_next(history)
    }
}

/// Forecast horizon: always the single period after the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizon {
    pub period: Period,
    pub periods_ahead: u32,
}

impl Horizon {
    pub fn next(period: Period) -> Self {
        Self {
            period,
            periods_ahead: 1,
        }
    }
}

/// Projected demand for one drug. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub drug_id: DrugId,
    pub model: ModelKind,
    /// Units expected in the horizon period, never negative.
    pub projected_quantity: f64,
    pub horizon: Horizon,
    pub history_len: usize,
    /// Fit quality, spread and model parameters.
    pub metadata: JsonValue,
    pub generated_at: DateTime<Utc>,
}

impl ForecastResult {
    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Run `model` over `history` and package the result.
pub fn forecast(
    drug_id: DrugId,
    history: &[f64],
    period: Period,
    model: &ForecastModel,
) -> AnalyticsResult<ForecastResult> {
    let prediction = model.forecast(history)?;
    Ok(ForecastResult {
        drug_id,
        model: model.kind(),
        projected_quantity: prediction.value,
        horizon: Horizon::next(period),
        history_len: history.len(),
        metadata: json!({
            "params": model.params(),
            "fit_quality": prediction.fit_quality,
            "spread": prediction.spread,
        }),
        generated_at: Utc::now(),
    })
}

/// How much ledger history feeds a store-backed forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryWindow {
    pub period: Period,
    /// Number of complete periods before the current one.
    pub periods: u32,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self {
            period: Period::Week,
            periods: 12,
        }
    }
}

/// A store-backed forecast with the series it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandForecast {
    pub result: ForecastResult,
    /// First day of the forecast period.
    pub horizon_start: NaiveDate,
    pub series: DemandSeries,
}

/// Forecasts a drug's demand from the sales ledger.
pub struct DemandForecaster<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    window: HistoryWindow,
}

impl<'a, S: RecordStore + ?Sized> DemandForecaster<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            window: HistoryWindow::default(),
        }
    }

    pub fn with_window(mut self, window: HistoryWindow) -> Self {
        self.window = window;
        self
    }

    /// Forecast the period containing `today` from the complete periods
    /// before it.
    pub fn forecast(&self, drug_id: DrugId, model: &ForecastModel, today: NaiveDate) -> AnalyticsResult<DemandForecast> {
        if self.window.periods == 0 {
            return Err(AnalyticsError::InvalidConfig("history must span at least one period".to_string()));
        }
        let drug = self.store.get_drug(drug_id)?;

        let period = self.window.period;
        let horizon_start = period.start_of(today);
        let from = period
            .rewind(horizon_start, self.window.periods)
            .ok_or_else(|| AnalyticsError::InvalidConfig("history window reaches before the calendar".to_string()))?;
        let to = horizon_start
            .pred_opt()
            .ok_or_else(|| AnalyticsError::InvalidConfig("no history before the calendar start".to_string()))?;

        let sales = self.store.list_sales(&SaleFilter {
            drug_id: Some(drug_id),
            from: Some(from),
            to: Some(to),
            ..Default::default()
        })?;
        let returns = self.store.list_returns(&SaleFilter {
            drug_id: Some(drug_id),
            ..Default::default()
        })?;
        let series = DemandSeries::from_ledger(drug_id, period, from, to, &sales, &returns)?;

        let result = forecast(drug_id, series.values(), period, model)?;
        let metadata = json!({
            "drug_name": drug.name,
            "params": model.params(),
            "fit_quality": result.metadata.get("fit_quality"),
            "spread": result.metadata.get("spread"),
            "history_from": from,
            "history_to": to,
            "history": series.values(),
        });
        tracing::debug!(
            drug = %drug.name,
            model = %model.kind(),
            history = series.len(),
            projected = result.projected_quantity,
            "demand forecast computed"
        );

        Ok(DemandForecast {
            result: result.with_metadata(metadata),
            horizon_start,
            series,
        })
    }
}
