use pharmacy_analytics::{AlertConfig, AlertEngine, AlertReport};

use super::Context;
use crate::cli::{AlertKindArg, AlertsArgs};
use crate::render;

pub fn run(ctx: &Context<'_>, args: AlertsArgs) -> anyhow::Result<()> {
    let report = scan(ctx, &args)?;
    render::emit_tabular(ctx.format, &report, render::alerts_csv, render::alerts)
}

pub fn scan(ctx: &Context<'_>, args: &AlertsArgs) -> anyhow::Result<AlertReport> {
    let defaults = ctx.settings.alerts;
    let config = AlertConfig {
        lookahead_days: args.lookahead_days.unwrap_or(defaults.lookahead_days),
        critical_days: args.critical_days.unwrap_or(defaults.critical_days),
        ..defaults
    };
    let engine = AlertEngine::new(ctx.store).with_config(config);

    Ok(match args.kind {
        AlertKindArg::All => engine.scan(ctx.today)?,
        AlertKindArg::Expiry => AlertReport {
            as_of: ctx.today,
            expiring: engine.expiring(ctx.today)?.collect(),
            low_stock: Vec::new(),
        },
        AlertKindArg::LowStock => AlertReport {
            as_of: ctx.today,
            expiring: Vec::new(),
            low_stock: engine.low_stock(ctx.today)?.collect(),
        },
    })
}
