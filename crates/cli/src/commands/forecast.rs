use pharmacy_analytics::{DemandForecast, DemandForecaster};

use super::Context;
use crate::cli::ForecastArgs;
use crate::render;

pub fn run(ctx: &Context<'_>, args: ForecastArgs) -> anyhow::Result<()> {
    let forecast = compute(ctx, args)?;
    render::emit(ctx.format, &forecast, render::forecast)
}

/// Configured forecast settings with any flags applied on top.
pub fn compute(ctx: &Context<'_>, args: ForecastArgs) -> anyhow::Result<DemandForecast> {
    let mut settings = ctx.settings.forecast.clone();
    if let Some(model) = args.model {
        settings.model = model;
    }
    if let Some(period) = args.period {
        settings.period = period;
    }
    settings.history_periods = args.history.unwrap_or(settings.history_periods);
    settings.window = args.window.unwrap_or(settings.window);
    settings.trees = args.trees.unwrap_or(settings.trees);
    settings.max_depth = args.max_depth.unwrap_or(settings.max_depth);
    settings.lags = args.lags.unwrap_or(settings.lags);
    settings.seed = args.seed.or(settings.seed);

    let model = settings.build_model()?;
    let forecast = DemandForecaster::new(ctx.store)
        .with_window(settings.window()?)
        .forecast(args.drug_id, &model, ctx.today)?;
    Ok(forecast)
}
