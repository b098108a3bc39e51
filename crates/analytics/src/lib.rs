//! `pharmacy-analytics`
//!
//! **Responsibility:** read-only analysis over the record store.
//!
//! - Expiry and low-stock alerts.
//! - Demand forecasting (moving average, linear regression, random forest).
//! - Sales and stock reports.
//!
//! Nothing here writes to the store.

pub mod alerts;
pub mod forecast;
pub mod report;
pub mod result;
pub mod series;

pub use alerts::{AlertConfig, AlertEngine, AlertReport, ExpiryAlert, LowStockAlert, Severity};
pub use forecast::{
    DemandForecast, DemandForecaster, ForecastModel, ForecastResult, Forecaster, HistoryWindow, Horizon,
    LinearRegression, ModelKind, MovingAverage, Prediction, RandomForest, RandomForestConfig, forecast,
};
pub use report::{CategorySales, DailyPoint, DrugSales, Reporter, SalesSummary, StockValuation};
pub use result::{AnalyticsError, AnalyticsResult};
pub use series::{DemandSeries, Period};
