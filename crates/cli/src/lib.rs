//! `pharmacy-cli`
//!
//! **Responsibility:** the `pharmacy` command line: configuration, opening the
//! record store and rendering results as text tables, JSON or CSV.

pub mod cli;
pub mod commands;
pub mod config;
pub mod render;
pub mod seed;

use anyhow::Context as _;

use pharmacy_analytics::AnalyticsError;
use pharmacy_core::DomainError;
use pharmacy_store::{SqliteStore, StoreError};

pub use crate::cli::Cli;
pub use crate::config::{ConfigError, Settings};

/// Load configuration, open the database and run one command.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.config.as_deref(), cli.database.as_deref())?;
    pharmacy_observability::init(&settings.log);
    tracing::debug!(database = %settings.database_url, "configuration loaded");

    let store = SqliteStore::open(&settings.database_url)
        .with_context(|| format!("failed to open database {}", settings.database_url))?;
    let ctx = commands::Context::new(&store, &settings, cli.today, cli.output_format());
    commands::execute(&ctx, cli.command)
}

/// Machine-readable kind of the first typed error in the chain.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<StoreError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<AnalyticsError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<DomainError>() {
            return e.kind();
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return "config";
        }
    }
    "error"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_survive_context() {
        let err = anyhow::Error::new(StoreError::NotFound("drug 1".to_string())).context("while showing drug");
        assert_eq!(error_kind(&err), "not_found");

        let err = anyhow::Error::new(AnalyticsError::InsufficientData {
            model: "linear-regression",
            required: 2,
            available: 1,
        });
        assert_eq!(error_kind(&err), "insufficient_data");

        assert_eq!(error_kind(&anyhow::anyhow!("plain")), "error");
    }
}
