//! Command handlers. Each takes the shared [`Context`] and renders its result.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use pharmacy_core::DrugId;
use pharmacy_store::{DrugFilter, RecordStore};

use crate::cli::{Commands, OutputFormat};
use crate::config::Settings;
use crate::render;

pub mod alerts;
pub mod batch;
pub mod catalog;
pub mod forecast;
pub mod report;
pub mod sale;

pub struct Context<'a> {
    pub store: &'a dyn RecordStore,
    pub settings: &'a Settings,
    /// Business date used for expiry checks, defaults and alerts.
    pub today: NaiveDate,
    /// Timestamp stamped on new sales.
    pub now: DateTime<Utc>,
    pub format: OutputFormat,
}

impl<'a> Context<'a> {
    pub fn new(store: &'a dyn RecordStore, settings: &'a Settings, today: Option<NaiveDate>, format: OutputFormat) -> Self {
        let now = Utc::now();
        let (today, now) = match today {
            Some(day) => (day, day.and_time(now.time()).and_utc()),
            None => (now.date_naive(), now),
        };
        Self {
            store,
            settings,
            today,
            now,
            format,
        }
    }

    /// Names of every drug, active or not, for display.
    pub fn drug_names(&self) -> anyhow::Result<HashMap<DrugId, String>> {
        Ok(self
            .store
            .list_drugs(&DrugFilter::default())?
            .into_iter()
            .map(|d| (d.id, d.name))
            .collect())
    }
}

pub fn execute(ctx: &Context<'_>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init => render::emit(
            ctx.format,
            &serde_json::json!({ "database_url": ctx.settings.database_url }),
            |_| render::message(&format!("Database ready at {}", ctx.settings.database_url)),
        ),
        Commands::Seed(args) => {
            let seed = args.seed.unwrap_or_else(rand::random);
            let summary = crate::seed::seed(ctx.store, ctx.today, args.history_days, seed)?;
            render::emit(ctx.format, &summary, render::seed_summary)
        }
        Commands::Category(command) => catalog::category(ctx, command),
        Commands::Drug(command) => catalog::drug(ctx, command),
        Commands::Batch(command) => batch::run(ctx, command),
        Commands::Sale(command) => sale::run(ctx, command),
        Commands::Alerts(args) => alerts::run(ctx, args),
        Commands::Forecast(args) => forecast::run(ctx, args),
        Commands::Report(args) => report::run(ctx, args),
    }
}
