use chrono::Days;

use pharmacy_analytics::Reporter;
use pharmacy_core::DomainError;

use super::Context;
use crate::cli::ReportArgs;
use crate::render::{self, FullReport};

pub fn run(ctx: &Context<'_>, args: ReportArgs) -> anyhow::Result<()> {
    let report = build(ctx, &args)?;
    render::emit_tabular(ctx.format, &report, render::report_csv, render::report)
}

/// Defaults to the 30 days ending today.
pub fn build(ctx: &Context<'_>, args: &ReportArgs) -> anyhow::Result<FullReport> {
    let to = args.to.map_or(ctx.today, |d| d.resolve(ctx.today));
    let from = match args.from {
        Some(day) => day.resolve(ctx.today),
        None => to
            .checked_sub_days(Days::new(29))
            .ok_or_else(|| DomainError::validation("report range starts before the calendar"))?,
    };

    let reporter = Reporter::new(ctx.store);
    Ok(FullReport {
        summary: reporter.summary(from, to)?,
        top_drugs: reporter.top_drugs(from, to, args.top)?,
        by_category: reporter.by_category(from, to)?,
        daily_trend: reporter.daily_trend(from, to)?,
        stock: reporter.stock_valuation(ctx.today)?,
    })
}
