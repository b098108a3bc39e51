use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use pharmacy_core::{BatchId, CategoryId, DrugId, Money};
use pharmacy_sales::InvoiceNumber;

use crate::commands::sale::SaleItem;

#[derive(Debug, Parser)]
#[command(name = "pharmacy", version, about = "Pharmacy inventory, sales, alerts and demand forecasting")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Shorthand for --format json"
    )]
    pub json: bool,
    #[arg(
        long,
        global = true,
        value_enum,
        value_name = "FORMAT",
        help = "Output format; csv is available for alerts, sale list and report"
    )]
    pub format: Option<OutputFormat>,
    #[arg(long, global = true, value_name = "FILE", help = "Configuration file (defaults to ./pharmacy.toml)")]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "URL", help = "Database URL or path, overrides the configuration")]
    pub database: Option<String>,
    #[arg(long, global = true, value_name = "DATE", help = "Evaluate as of this date instead of today")]
    pub today: Option<NaiveDate>,
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_format(&self) -> OutputFormat {
        match (self.json, self.format) {
            (true, _) => OutputFormat::Json,
            (false, format) => format.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the database schema.
    Init,
    /// Load sample categories, drugs, batches and sales into an empty database.
    Seed(SeedArgs),
    #[command(subcommand)]
    Category(CategoryCommands),
    #[command(subcommand)]
    Drug(DrugCommands),
    #[command(subcommand)]
    Batch(BatchCommands),
    #[command(subcommand)]
    Sale(SaleCommands),
    /// Expiring batches and drugs below their reorder threshold.
    Alerts(AlertsArgs),
    /// Project next-period demand for a drug.
    Forecast(ForecastArgs),
    /// Sales summary, top drugs, daily trend and stock value.
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct SeedArgs {
    #[arg(long, default_value_t = 90, help = "Days of synthetic sales history to generate")]
    pub history_days: u32,
    #[arg(long, help = "Seed for the synthetic sales history")]
    pub seed: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum CategoryCommands {
    Add {
        name: String,
    },
    List,
    Rename {
        id: CategoryId,
        name: String,
    },
    Delete {
        id: CategoryId,
    },
}

#[derive(Debug, Subcommand)]
pub enum DrugCommands {
    Add(DrugAddArgs),
    List(DrugListArgs),
    Show { id: DrugId },
    Update(DrugUpdateArgs),
    Deactivate { id: DrugId },
    Reactivate { id: DrugId },
}

#[derive(Debug, Args)]
pub struct DrugAddArgs {
    pub name: String,
    #[arg(long, help = "Unit price, e.g. 5.99")]
    pub price: Money,
    #[arg(long, default_value_t = 0, help = "Reorder threshold in units")]
    pub threshold: i64,
    #[arg(long)]
    pub category: Option<CategoryId>,
    #[arg(long)]
    pub supplier: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Active,
    Inactive,
    All,
}

#[derive(Debug, Args)]
pub struct DrugListArgs {
    #[arg(long, value_enum, default_value_t = StatusArg::Active)]
    pub status: StatusArg,
    #[arg(long)]
    pub category: Option<CategoryId>,
    #[arg(long, help = "Case-insensitive name substring")]
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct DrugUpdateArgs {
    pub id: DrugId,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub price: Option<Money>,
    #[arg(long)]
    pub threshold: Option<i64>,
    #[arg(long, conflicts_with = "clear_category")]
    pub category: Option<CategoryId>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub clear_category: bool,
    #[arg(long, conflicts_with = "clear_supplier")]
    pub supplier: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub clear_supplier: bool,
}

#[derive(Debug, Subcommand)]
pub enum BatchCommands {
    Receive(ReceiveArgs),
    List(BatchListArgs),
    Adjust(AdjustArgs),
    WriteOff {
        id: BatchId,
        #[arg(long, default_value = "expired")]
        reason: String,
    },
    Remove {
        id: BatchId,
    },
    /// Stock adjustment ledger, newest first.
    History(HistoryArgs),
}

#[derive(Debug, Args)]
pub struct ReceiveArgs {
    pub drug_id: DrugId,
    #[arg(long)]
    pub quantity: i64,
    #[arg(long, help = "Unit cost, e.g. 3.50")]
    pub cost: Money,
    #[arg(long, value_name = "DATE")]
    pub expiry: NaiveDate,
    #[arg(long, value_name = "DATE", help = "Defaults to today")]
    pub received: Option<NaiveDate>,
    #[arg(long)]
    pub lot: Option<String>,
}

#[derive(Debug, Args)]
pub struct BatchListArgs {
    #[arg(long)]
    pub drug: Option<DrugId>,
    #[arg(long, value_name = "DATE", help = "Only batches expiring on or before this date")]
    pub expiring_by: Option<DateArg>,
    #[arg(long, action = ArgAction::SetTrue, help = "Hide batches with no stock")]
    pub in_stock: bool,
    #[arg(long, action = ArgAction::SetTrue, help = "Hide batches that are already expired")]
    pub usable: bool,
}

/// A date argument; `today` is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateArg {
    Today,
    On(NaiveDate),
}

impl DateArg {
    pub fn resolve(self, today: NaiveDate) -> NaiveDate {
        match self {
            DateArg::Today => today,
            DateArg::On(day) => day,
        }
    }
}

impl core::str::FromStr for DateArg {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("today") {
            return Ok(DateArg::Today);
        }
        s.trim().parse().map(DateArg::On)
    }
}

#[derive(Debug, Args)]
pub struct AdjustArgs {
    pub batch_id: BatchId,
    #[arg(long, allow_hyphen_values = true, help = "Signed change in units, e.g. -3")]
    pub delta: i64,
    #[arg(long)]
    pub reason: String,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(long)]
    pub batch: Option<BatchId>,
    #[arg(long)]
    pub drug: Option<DrugId>,
    #[arg(long, value_name = "DATE", help = "First day to include")]
    pub from: Option<DateArg>,
    #[arg(long, value_name = "DATE", help = "Last day to include")]
    pub to: Option<DateArg>,
}

#[derive(Debug, Subcommand)]
pub enum SaleCommands {
    Record(RecordSaleArgs),
    List(SaleListArgs),
    Show { invoice: InvoiceNumber },
    Void {
        invoice: InvoiceNumber,
        #[arg(long, default_value = "voided")]
        reason: String,
    },
}

#[derive(Debug, Args)]
pub struct RecordSaleArgs {
    #[arg(
        long = "item",
        required = true,
        value_name = "DRUG_ID:QTY[:BATCH_ID]",
        help = "Sale line; repeat for several drugs"
    )]
    pub items: Vec<SaleItem>,
    #[arg(long, help = "Per-unit discount applied to every line")]
    pub discount: Option<Money>,
    #[arg(long, help = "Explicit invoice number; generated when absent")]
    pub invoice: Option<InvoiceNumber>,
    #[arg(long)]
    pub sold_by: Option<String>,
}

#[derive(Debug, Args)]
pub struct SaleListArgs {
    #[arg(long)]
    pub drug: Option<DrugId>,
    #[arg(long)]
    pub invoice: Option<InvoiceNumber>,
    #[arg(long, value_name = "DATE")]
    pub from: Option<DateArg>,
    #[arg(long, value_name = "DATE")]
    pub to: Option<DateArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlertKindArg {
    All,
    Expiry,
    LowStock,
}

#[derive(Debug, Args)]
pub struct AlertsArgs {
    #[arg(long, value_enum, default_value_t = AlertKindArg::All)]
    pub kind: AlertKindArg,
    #[arg(long)]
    pub lookahead_days: Option<u32>,
    #[arg(long)]
    pub critical_days: Option<u32>,
}

#[derive(Debug, Args)]
pub struct ForecastArgs {
    pub drug_id: DrugId,
    #[arg(long, help = "moving-average, linear-regression or random-forest")]
    pub model: Option<String>,
    #[arg(long, help = "day, week or month")]
    pub period: Option<String>,
    #[arg(long, help = "Complete periods of history to use")]
    pub history: Option<u32>,
    #[arg(long, help = "Moving average window")]
    pub window: Option<usize>,
    #[arg(long)]
    pub trees: Option<usize>,
    #[arg(long)]
    pub max_depth: Option<usize>,
    #[arg(long)]
    pub lags: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long, value_name = "DATE", help = "Defaults to 30 days before --to")]
    pub from: Option<DateArg>,
    #[arg(long, value_name = "DATE", help = "Defaults to today")]
    pub to: Option<DateArg>,
    #[arg(long, default_value_t = 5)]
    pub top: usize,
}
