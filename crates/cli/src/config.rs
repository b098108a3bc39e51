//! Layered configuration: built-in defaults, then `pharmacy.toml` (or the
//! `--config` file), then `PHARMACY__*` environment variables, then CLI flags.

use std::path::Path;

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pharmacy_analytics::{
    AlertConfig, ForecastModel, Forecaster, HistoryWindow, ModelKind, Period, RandomForestConfig,
};
use pharmacy_observability::LogSettings;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://pharmacy.db";
const DEFAULT_CONFIG_FILE: &str = "pharmacy";
const ENV_PREFIX: &str = "PHARMACY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub log: LogSettings,
    pub alerts: AlertConfig,
    pub forecast: ForecastSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastSettings {
    pub model: String,
    pub period: String,
    pub history_periods: u32,
    pub window: usize,
    pub trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub lags: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ForecastSettings {
    pub fn model_kind(&self) -> Result<ModelKind, ConfigError> {
        self.model
            .parse()
            .map_err(|e: pharmacy_analytics::AnalyticsError| ConfigError::Invalid(e.to_string()))
    }

    pub fn period(&self) -> Result<Period, ConfigError> {
        self.period
            .parse()
            .map_err(|e: pharmacy_analytics::AnalyticsError| ConfigError::Invalid(e.to_string()))
    }

    pub fn window(&self) -> Result<HistoryWindow, ConfigError> {
        Ok(HistoryWindow {
            period: self.period()?,
            periods: self.history_periods,
        })
    }

    pub fn build_model(&self) -> Result<ForecastModel, ConfigError> {
        Ok(match self.model_kind()? {
            ModelKind::MovingAverage => ForecastModel::moving_average(self.window),
            ModelKind::LinearRegression => ForecastModel::linear_regression(),
            ModelKind::RandomForest => ForecastModel::random_forest(RandomForestConfig {
                trees: self.trees,
                max_depth: self.max_depth,
                min_samples_split: self.min_samples_split,
                lags: self.lags,
                seed: self.seed,
            }),
        })
    }
}

impl Settings {
    /// Load settings. `file` replaces the default `./pharmacy.toml` and must
    /// exist; `database` overrides every other source.
    pub fn load(file: Option<&Path>, database: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("database_url", DEFAULT_DATABASE_URL)?
            .set_default("log.level", "warn")?
            .set_default("log.json", false)?
            .set_default("alerts.lookahead_days", 30)?
            .set_default("alerts.critical_days", 7)?
            .set_default("alerts.critical_stock_ratio", 0.1)?
            .set_default("forecast.model", "moving-average")?
            .set_default("forecast.period", "week")?
            .set_default("forecast.history_periods", 12)?
            .set_default("forecast.window", 3)?
            .set_default("forecast.trees", 100)?
            .set_default("forecast.max_depth", 6)?
            .set_default("forecast.min_samples_split", 2)?
            .set_default("forecast.lags", 1)?;

        builder = match file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        if let Some(url) = database {
            builder = builder.set_override("database_url", url)?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url cannot be empty".to_string()));
        }
        self.alerts
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.forecast.history_periods == 0 {
            return Err(ConfigError::Invalid("forecast.history_periods must be at least 1".to_string()));
        }
        self.forecast.window()?;
        self.forecast
            .build_model()?
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_config(
            r#"
database_url = "sqlite://shop.db"

[alerts]
lookahead_days = 60

[forecast]
model = "random-forest"
seed = 9
"#,
        );

        let settings = Settings::load(Some(file.path()), None).unwrap();

        assert_eq!(settings.database_url, "sqlite://shop.db");
        assert_eq!(settings.alerts.lookahead_days, 60);
        assert_eq!(settings.alerts.critical_days, 7);
        assert_eq!(settings.forecast.model_kind().unwrap(), ModelKind::RandomForest);
        assert_eq!(settings.forecast.seed, Some(9));
        assert_eq!(settings.log.level, "warn");
    }

    #[test]
    fn database_flag_wins() {
        let file = write_config("database_url = \"sqlite://shop.db\"\n");
        let settings = Settings::load(Some(file.path()), Some("sqlite::memory:")).unwrap();
        assert_eq!(settings.database_url, "sqlite::memory:");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/definitely/not/here.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let file = write_config("[forecast]\nmodel = \"crystal-ball\"\n");
        assert!(matches!(
            Settings::load(Some(file.path()), None),
            Err(ConfigError::Invalid(_))
        ));

        let file = write_config("[alerts]\ncritical_stock_ratio = 2.0\n");
        assert!(matches!(
            Settings::load(Some(file.path()), None),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn short_lookahead_is_accepted() {
        let file = write_config("[alerts]\nlookahead_days = 3\n");
        let settings = Settings::load(Some(file.path()), None).unwrap();
        assert_eq!(settings.alerts.lookahead_days, 3);
        assert_eq!(settings.alerts.effective_critical_days(), 3);
    }

    #[test]
    fn zero_window_is_rejected() {
        let file = write_config("[forecast]\nwindow = 0\n");
        assert!(matches!(
            Settings::load(Some(file.path()), None),
            Err(ConfigError::Invalid(_))
        ));
    }
}
