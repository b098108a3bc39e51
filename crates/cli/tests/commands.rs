use chrono::NaiveDate;

use pharmacy_analytics::{AlertConfig, Severity};
use pharmacy_catalog::Drug;
use pharmacy_cli::cli::{AlertKindArg, OutputFormat, AlertsArgs, DrugListArgs, ForecastArgs, RecordSaleArgs, ReportArgs, StatusArg};
use pharmacy_cli::commands::sale::SaleItem;
use pharmacy_cli::commands::{Context, alerts, catalog, forecast, report, sale};
use pharmacy_cli::config::{ForecastSettings, Settings};
use pharmacy_cli::seed;
use pharmacy_core::Money;
use pharmacy_observability::LogSettings;
use pharmacy_store::{DrugFilter, InMemoryStore, RecordStore};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

fn settings() -> Settings {
    Settings {
        database_url: "sqlite::memory:".to_string(),
        log: LogSettings::default(),
        alerts: AlertConfig::default(),
        forecast: ForecastSettings {
            model: "moving-average".to_string(),
            period: "week".to_string(),
            history_periods: 6,
            window: 3,
            trees: 20,
            max_depth: 4,
            min_samples_split: 2,
            lags: 1,
            seed: Some(1),
        },
    }
}

fn seeded() -> InMemoryStore {
    let store = InMemoryStore::new();
    seed::seed(&store, today(), 60, 5).unwrap();
    store
}

fn find(store: &InMemoryStore, name: &str) -> Drug {
    store
        .list_drugs(&DrugFilter {
            name_contains: Some(name.to_string()),
            ..Default::default()
        })
        .unwrap()
        .remove(0)
}

#[test]
fn seeded_store_raises_alerts() {
    let store = seeded();
    let settings = settings();
    let ctx = Context::new(&store, &settings, Some(today()), OutputFormat::Text);

    let report = alerts::scan(
        &ctx,
        &AlertsArgs {
            kind: AlertKindArg::All,
            lookahead_days: None,
            critical_days: None,
        },
    )
    .unwrap();

    assert!(!report.expiring.is_empty());
    assert!(report.expiring.windows(2).all(|w| w[0].expiry_date <= w[1].expiry_date));
    assert!(report.low_stock.iter().all(|a| a.on_hand < a.reorder_threshold));

    let expiry_only = alerts::scan(
        &ctx,
        &AlertsArgs {
            kind: AlertKindArg::Expiry,
            lookahead_days: Some(0),
            critical_days: Some(0),
        },
    )
    .unwrap();
    assert!(expiry_only.low_stock.is_empty());
    assert!(expiry_only.expiring.iter().all(|a| a.severity != Severity::Warning));
}

#[test]
fn forecast_flags_override_configuration() {
    let store = seeded();
    let settings = settings();
    let ctx = Context::new(&store, &settings, Some(today()), OutputFormat::Text);
    let vitamin = find(&store, "vitamin c");

    let result = forecast::compute(
        &ctx,
        ForecastArgs {
            drug_id: vitamin.id,
            model: Some("linear-regression".to_string()),
            period: Some("day".to_string()),
            history: Some(14),
            window: None,
            trees: None,
            max_depth: None,
            lags: None,
            seed: None,
        },
    )
    .unwrap();

    assert_eq!(result.series.len(), 14);
    assert_eq!(result.horizon_start, today());
    assert!(result.result.projected_quantity >= 0.0);
}

#[test]
fn sale_then_void_nets_to_zero() {
    let store = seeded();
    let settings = settings();
    let ctx = Context::new(&store, &settings, Some(today()), OutputFormat::Text);
    let aspirin = find(&store, "aspirin");
    let before = store.stock_on_hand(aspirin.id).unwrap();

    let order = sale::order_from(
        &ctx,
        RecordSaleArgs {
            items: vec![SaleItem {
                drug_id: aspirin.id,
                quantity: 3,
                batch_id: None,
            }],
            discount: Some(Money::from_cents(49)),
            invoice: None,
            sold_by: Some("front desk".to_string()),
        },
    );
    let receipt = store.record_sale(order).unwrap();
    assert_eq!(receipt.total, Money::from_cents(900));

    let view = sale::invoice_view(&ctx, &receipt.invoice).unwrap();
    assert_eq!(view.net_total, Money::from_cents(900));

    store.void_invoice(&receipt.invoice, "customer changed mind").unwrap();
    let view = sale::invoice_view(&ctx, &receipt.invoice).unwrap();
    assert_eq!(view.net_total, Money::ZERO);
    assert_eq!(store.stock_on_hand(aspirin.id).unwrap(), before);
}

#[test]
fn report_covers_thirty_days() {
    let store = seeded();
    let settings = settings();
    let ctx = Context::new(&store, &settings, Some(today()), OutputFormat::Text);

    let full = report::build(
        &ctx,
        &ReportArgs {
            from: None,
            to: None,
            top: 3,
        },
    )
    .unwrap();

    assert_eq!(full.daily_trend.len(), 30);
    assert!(full.summary.units > 0);
    assert!(full.top_drugs.len() <= 3);
    assert_eq!(full.summary.profit, full.summary.revenue - full.summary.cost);
}

#[test]
fn drug_list_includes_stock() {
    let store = seeded();
    let settings = settings();
    let ctx = Context::new(&store, &settings, Some(today()), OutputFormat::Text);

    let rows = catalog::list(
        &ctx,
        &DrugListArgs {
            status: StatusArg::All,
            category: None,
            name: Some("loperamide".to_string()),
        },
    )
    .unwrap();

    assert_eq!(rows.len(), 1);
    assert!(rows[0].on_hand >= rows[0].usable);
}

#[test]
fn report_and_sales_export_as_csv() {
    let store = seeded();
    let settings = settings();
    let ctx = Context::new(&store, &settings, Some(today()), OutputFormat::Csv);

    let full = report::build(
        &ctx,
        &ReportArgs {
            from: None,
            to: None,
            top: 3,
        },
    )
    .unwrap();
    let csv = pharmacy_cli::render::report_csv(&full).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 31);
    assert_eq!(lines[0], "day,units,revenue,profit");
    assert!(lines[1].starts_with("2026-01-31,"));

    let sales = store.list_sales(&pharmacy_store::SaleFilter::default()).unwrap();
    let names = ctx.drug_names().unwrap();
    let csv = pharmacy_cli::render::sales_csv(&sales, &names).unwrap();
    assert_eq!(csv.lines().count(), sales.len() + 1);
}
