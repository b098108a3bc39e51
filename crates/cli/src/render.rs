//! Text, JSON and CSV output.
//!
//! Renderers return strings so they can be checked without a terminal.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::Serialize;

use pharmacy_analytics::{
    AlertReport, CategorySales, DailyPoint, DemandForecast, DrugSales, SalesSummary, StockValuation,
};
use pharmacy_catalog::{Category, Drug};
use pharmacy_core::{DrugId, Money};
use pharmacy_inventory::{Batch, StockAdjustment};
use pharmacy_sales::{InvoiceNumber, Receipt, Sale, SaleReturn};

use crate::cli::OutputFormat;

/// Print `value` as pretty JSON or through its text renderer.
pub fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", text(value)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Csv => anyhow::bail!("csv output is only available for alerts, sale list and report"),
    }
    Ok(())
}

/// Like [`emit`], for results that also export as CSV.
pub fn emit_tabular<T: Serialize>(
    format: OutputFormat,
    value: &T,
    csv: impl FnOnce(&T) -> anyhow::Result<String>,
    text: impl FnOnce(&T) -> String,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Csv => {
            print!("{}", csv(value)?);
            Ok(())
        }
        other => emit(other, value, text),
    }
}

/// A drug with its current stock.
#[derive(Debug, Clone, Serialize)]
pub struct DrugRow {
    #[serde(flatten)]
    pub drug: Drug,
    pub on_hand: i64,
    pub usable: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrugDetail {
    #[serde(flatten)]
    pub row: DrugRow,
    pub category: Option<String>,
    pub batches: Vec<Batch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    pub invoice: InvoiceNumber,
    pub lines: Vec<Sale>,
    pub returns: Vec<SaleReturn>,
    pub total: Money,
    /// Total minus refunded amounts.
    pub net_total: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullReport {
    pub summary: SalesSummary,
    pub top_drugs: Vec<DrugSales>,
    pub by_category: Vec<CategorySales>,
    pub daily_trend: Vec<DailyPoint>,
    pub stock: StockValuation,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedSummary {
    /// Set when the database already had drugs and nothing was loaded.
    pub skipped: bool,
    pub categories: usize,
    pub drugs: usize,
    pub batches: usize,
    pub invoices: usize,
}

fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let mut out = String::new();
    push_line(&mut out, headers, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_line(&mut out, &rule.iter().map(String::as_str).collect::<Vec<_>>(), &widths);
    for row in rows {
        push_line(&mut out, &row.iter().map(String::as_str).collect::<Vec<_>>(), &widths);
    }
    out
}

fn push_line(out: &mut String, cells: &[&str], widths: &[usize]) {
    let rendered: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, w)| format!("{cell:<w$}", w = *w))
        .collect();
    let _ = writeln!(out, "{}", rendered.join("  ").trim_end());
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

fn name_of(names: &HashMap<DrugId, String>, id: DrugId) -> String {
    names.get(&id).cloned().unwrap_or_else(|| id.to_string())
}

pub fn categories(categories: &[Category]) -> String {
    if categories.is_empty() {
        return "No categories.\n".to_string();
    }
    let rows: Vec<Vec<String>> = categories
        .iter()
        .map(|c| vec![c.name.clone(), c.id.to_string()])
        .collect();
    table(&["NAME", "ID"], &rows)
}

pub fn category(category: &Category) -> String {
    format!("Category '{}' ({})\n", category.name, category.id)
}

pub fn drug(drug: &Drug) -> String {
    format!(
        "{} ({}) price {} reorder at {} [{}]\n",
        drug.name,
        drug.id,
        drug.unit_price,
        drug.reorder_threshold,
        drug.status.as_str()
    )
}

pub fn drug_rows(rows: &[DrugRow]) -> String {
    if rows.is_empty() {
        return "No drugs.\n".to_string();
    }
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.drug.name.clone(),
                r.drug.unit_price.to_string(),
                r.usable.to_string(),
                r.on_hand.to_string(),
                r.drug.reorder_threshold.to_string(),
                r.drug.status.as_str().to_string(),
                r.drug.id.to_string(),
            ]
        })
        .collect();
    table(&["NAME", "PRICE", "USABLE", "ON HAND", "REORDER", "STATUS", "ID"], &rows)
}

pub fn drug_detail(detail: &DrugDetail) -> String {
    let d = &detail.row.drug;
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", d.name, d.id);
    let _ = writeln!(out, "  status:    {}", d.status.as_str());
    let _ = writeln!(out, "  category:  {}", or_dash(detail.category.as_deref()));
    let _ = writeln!(out, "  supplier:  {}", or_dash(d.supplier.as_deref()));
    let _ = writeln!(out, "  price:     {}", d.unit_price);
    let _ = writeln!(out, "  reorder:   {}", d.reorder_threshold);
    let _ = writeln!(out, "  on hand:   {} ({} usable)", detail.row.on_hand, detail.row.usable);
    if !detail.batches.is_empty() {
        out.push('\n');
        out.push_str(&batches(&detail.batches, &HashMap::new()));
    }
    out
}

pub fn batch(batch: &Batch) -> String {
    format!(
        "Batch {} of {} units, expires {}\n",
        batch.id, batch.quantity, batch.expiry_date
    )
}

pub fn batches(batches: &[Batch], names: &HashMap<DrugId, String>) -> String {
    if batches.is_empty() {
        return "No batches.\n".to_string();
    }
    let with_drug = !names.is_empty();
    let rows: Vec<Vec<String>> = batches
        .iter()
        .map(|b| {
            let mut row = Vec::with_capacity(7);
            if with_drug {
                row.push(name_of(names, b.drug_id));
            }
            row.extend([
                or_dash(b.lot_number.as_deref()),
                b.quantity.to_string(),
                b.unit_cost.to_string(),
                b.expiry_date.to_string(),
                b.received_date.to_string(),
                b.id.to_string(),
            ]);
            row
        })
        .collect();
    let mut headers = vec!["LOT", "QTY", "COST", "EXPIRES", "RECEIVED", "ID"];
    if with_drug {
        headers.insert(0, "DRUG");
    }
    table(&headers, &rows)
}

pub fn adjustment(adj: &StockAdjustment) -> String {
    format!(
        "{} {:+} on batch {} ({})\n",
        adj.kind.as_str(),
        adj.delta,
        adj.batch_id,
        adj.reason
    )
}

pub fn adjustments(adjustments: &[StockAdjustment], names: &HashMap<DrugId, String>) -> String {
    if adjustments.is_empty() {
        return "No stock adjustments.\n".to_string();
    }
    let rows: Vec<Vec<String>> = adjustments
        .iter()
        .map(|a| {
            vec![
                a.adjusted_at.format("%Y-%m-%d %H:%M").to_string(),
                name_of(names, a.drug_id),
                a.kind.as_str().to_string(),
                format!("{:+}", a.delta),
                a.reason.clone(),
                a.batch_id.to_string(),
            ]
        })
        .collect();
    table(&["WHEN", "DRUG", "KIND", "DELTA", "REASON", "BATCH"], &rows)
}

pub fn receipt(receipt: &Receipt, names: &HashMap<DrugId, String>) -> String {
    let mut out = format!("Invoice {}\n", receipt.invoice);
    let rows: Vec<Vec<String>> = receipt
        .sales
        .iter()
        .map(|s| {
            vec![
                name_of(names, s.drug_id),
                s.quantity.to_string(),
                s.unit_price.to_string(),
                s.discount.to_string(),
                s.total.to_string(),
            ]
        })
        .collect();
    out.push_str(&table(&["DRUG", "QTY", "PRICE", "DISCOUNT", "TOTAL"], &rows));
    let _ = writeln!(out, "Total: {} ({} units)", receipt.total, receipt.units());
    out
}

pub fn sales(sales: &[Sale], names: &HashMap<DrugId, String>) -> String {
    if sales.is_empty() {
        return "No sales.\n".to_string();
    }
    let rows: Vec<Vec<String>> = sales
        .iter()
        .map(|s| {
            vec![
                s.sold_at.format("%Y-%m-%d %H:%M").to_string(),
                s.invoice.to_string(),
                name_of(names, s.drug_id),
                s.quantity.to_string(),
                s.total.to_string(),
                s.profit().map_or_else(|| "-".to_string(), |p| p.to_string()),
            ]
        })
        .collect();
    let total: Money = sales.iter().map(|s| s.total).sum();
    let mut out = table(&["WHEN", "INVOICE", "DRUG", "QTY", "TOTAL", "PROFIT"], &rows);
    let _ = writeln!(out, "{} lines, {} gross", sales.len(), total);
    out
}

pub fn invoice(view: &InvoiceView, names: &HashMap<DrugId, String>) -> String {
    let mut out = receipt(&Receipt::new(view.invoice.clone(), view.lines.clone()), names);
    if !view.returns.is_empty() {
        out.push_str("\nReturns\n");
        out.push_str(&returns(&view.returns, names));
        let _ = writeln!(out, "Net total: {}", view.net_total);
    }
    out
}

pub fn returns(returns: &[SaleReturn], names: &HashMap<DrugId, String>) -> String {
    let rows: Vec<Vec<String>> = returns
        .iter()
        .map(|r| {
            vec![
                r.returned_at.format("%Y-%m-%d %H:%M").to_string(),
                name_of(names, r.drug_id),
                r.quantity.to_string(),
                r.reason.clone(),
            ]
        })
        .collect();
    table(&["WHEN", "DRUG", "QTY", "REASON"], &rows)
}

pub fn alerts(report: &AlertReport) -> String {
    let mut out = String::new();
    if report.is_empty() {
        let _ = writeln!(out, "No alerts as of {}.", report.as_of);
        return out;
    }
    if !report.expiring.is_empty() {
        let _ = writeln!(out, "Expiring batches ({})", report.expiring.len());
        let rows: Vec<Vec<String>> = report
            .expiring
            .iter()
            .map(|a| {
                vec![
                    a.severity.as_str().to_uppercase(),
                    a.drug_name.clone(),
                    or_dash(a.lot_number.as_deref()),
                    a.quantity.to_string(),
                    a.expiry_date.to_string(),
                    a.days_remaining.to_string(),
                ]
            })
            .collect();
        out.push_str(&table(&["SEVERITY", "DRUG", "LOT", "QTY", "EXPIRES", "DAYS"], &rows));
    }
    if !report.low_stock.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "Low stock ({})", report.low_stock.len());
        let rows: Vec<Vec<String>> = report
            .low_stock
            .iter()
            .map(|a| {
                vec![
                    a.severity.as_str().to_uppercase(),
                    a.drug_name.clone(),
                    a.on_hand.to_string(),
                    a.reorder_threshold.to_string(),
                    a.deficit.to_string(),
                ]
            })
            .collect();
        out.push_str(&table(&["SEVERITY", "DRUG", "USABLE", "REORDER", "DEFICIT"], &rows));
    }
    out
}

pub fn forecast(forecast: &DemandForecast) -> String {
    let r = &forecast.result;
    let drug_name = r
        .metadata
        .get("drug_name")
        .and_then(|v| v.as_str())
        .unwrap_or("drug");
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{drug_name}: {:.1} units expected in the {} starting {} ({})",
        r.projected_quantity, r.horizon.period, forecast.horizon_start, r.model
    );
    let history: Vec<String> = forecast.series.values().iter().map(|q| format!("{q:.0}")).collect();
    let _ = writeln!(out, "  history ({} {}s): {}", r.history_len, r.horizon.period, history.join(" "));
    if let Some(fit) = r.metadata.get("fit_quality").and_then(|v| v.as_f64()) {
        let _ = writeln!(out, "  fit (R²):  {fit:.3}");
    }
    if let Some(spread) = r.metadata.get("spread").and_then(|v| v.as_f64()) {
        let _ = writeln!(out, "  spread:    {spread:.2}");
    }
    out
}

pub fn report(report: &FullReport) -> String {
    let s = &report.summary;
    let mut out = String::new();
    let _ = writeln!(out, "Sales {} to {}", s.from, s.to);
    let _ = writeln!(out, "  revenue:   {}", s.revenue);
    let _ = writeln!(out, "  cost:      {}", s.cost);
    let _ = writeln!(out, "  profit:    {}", s.profit);
    let _ = writeln!(out, "  units:     {} ({} returned)", s.units, s.returned_units);
    let _ = writeln!(out, "  invoices:  {}", s.invoices);

    if !report.top_drugs.is_empty() {
        out.push_str("\nTop drugs\n");
        let rows: Vec<Vec<String>> = report
            .top_drugs
            .iter()
            .map(|d| vec![d.drug_name.clone(), d.units.to_string(), d.revenue.to_string(), d.profit.to_string()])
            .collect();
        out.push_str(&table(&["DRUG", "UNITS", "REVENUE", "PROFIT"], &rows));
    }
    if !report.by_category.is_empty() {
        out.push_str("\nBy category\n");
        let rows: Vec<Vec<String>> = report
            .by_category
            .iter()
            .map(|c| vec![c.category_name.clone(), c.units.to_string(), c.revenue.to_string()])
            .collect();
        out.push_str(&table(&["CATEGORY", "UNITS", "REVENUE"], &rows));
    }

    out.push_str("\nDaily trend\n");
    let rows: Vec<Vec<String>> = report
        .daily_trend
        .iter()
        .map(|p| vec![p.day.to_string(), p.units.to_string(), p.revenue.to_string(), p.profit.to_string()])
        .collect();
    out.push_str(&table(&["DAY", "UNITS", "REVENUE", "PROFIT"], &rows));

    let v = &report.stock;
    let _ = writeln!(
        out,
        "\nStock at cost on {}: {} in {} units across {} batches",
        v.as_of, v.value, v.units, v.batches
    );
    if v.expired_units > 0 {
        let _ = writeln!(out, "Expired, not written off: {} units worth {}", v.expired_units, v.expired_value);
    }
    out
}

/// Header row followed by one record per row. Row fields must follow the
/// header order.
fn to_csv<R: Serialize>(headers: &[&str], rows: impl IntoIterator<Item = R>) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(headers)?;
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

#[derive(Serialize)]
struct AlertCsvRow<'a> {
    kind: &'static str,
    severity: &'static str,
    drug_id: DrugId,
    drug_name: &'a str,
    batch_id: Option<String>,
    lot_number: Option<&'a str>,
    expiry_date: Option<String>,
    days_remaining: Option<i64>,
    quantity: i64,
    reorder_threshold: Option<i64>,
    deficit: Option<i64>,
}

/// Expiring batches then low-stock drugs, one CSV with a `kind` column.
pub fn alerts_csv(report: &AlertReport) -> anyhow::Result<String> {
    let expiring = report.expiring.iter().map(|a| AlertCsvRow {
        kind: "expiry",
        severity: a.severity.as_str(),
        drug_id: a.drug_id,
        drug_name: &a.drug_name,
        batch_id: Some(a.batch_id.to_string()),
        lot_number: a.lot_number.as_deref(),
        expiry_date: Some(a.expiry_date.to_string()),
        days_remaining: Some(a.days_remaining),
        quantity: a.quantity,
        reorder_threshold: None,
        deficit: None,
    });
    let low_stock = report.low_stock.iter().map(|a| AlertCsvRow {
        kind: "low_stock",
        severity: a.severity.as_str(),
        drug_id: a.drug_id,
        drug_name: &a.drug_name,
        batch_id: None,
        lot_number: None,
        expiry_date: None,
        days_remaining: None,
        quantity: a.on_hand,
        reorder_threshold: Some(a.reorder_threshold),
        deficit: Some(a.deficit),
    });
    to_csv(
        &[
            "kind",
            "severity",
            "drug_id",
            "drug_name",
            "batch_id",
            "lot_number",
            "expiry_date",
            "days_remaining",
            "quantity",
            "reorder_threshold",
            "deficit",
        ],
        expiring.chain(low_stock),
    )
}

#[derive(Serialize)]
struct SaleCsvRow<'a> {
    invoice: &'a str,
    drug_name: String,
    batch_id: String,
    quantity: i64,
    unit_price: String,
    discount: String,
    total: String,
    profit: String,
    sold_at: String,
    sold_by: Option<&'a str>,
}

/// Sales ledger lines with amounts as decimal strings.
pub fn sales_csv(sales: &[Sale], names: &HashMap<DrugId, String>) -> anyhow::Result<String> {
    let rows = sales.iter().map(|s| SaleCsvRow {
        invoice: s.invoice.as_str(),
        drug_name: name_of(names, s.drug_id),
        batch_id: s.batch_id.to_string(),
        quantity: s.quantity,
        unit_price: s.unit_price.to_string(),
        discount: s.discount.to_string(),
        total: s.total.to_string(),
        profit: s.profit().map(|p| p.to_string()).unwrap_or_default(),
        sold_at: s.sold_at.to_rfc3339(),
        sold_by: s.sold_by.as_deref(),
    });
    to_csv(
        &[
            "invoice",
            "drug_name",
            "batch_id",
            "quantity",
            "unit_price",
            "discount",
            "total",
            "profit",
            "sold_at",
            "sold_by",
        ],
        rows,
    )
}

/// The daily trend of a report, one row per day.
pub fn report_csv(report: &FullReport) -> anyhow::Result<String> {
    let rows = report.daily_trend.iter().map(|p| {
        (
            p.day.to_string(),
            p.units,
            p.revenue.to_string(),
            p.profit.to_string(),
        )
    });
    to_csv(&["day", "units", "revenue", "profit"], rows)
}

pub fn seed_summary(summary: &SeedSummary) -> String {
    if summary.skipped {
        return "Database already has drugs; nothing seeded.\n".to_string();
    }
    format!(
        "Seeded {} categories, {} drugs, {} batches and {} invoices.\n",
        summary.categories, summary.drugs, summary.batches, summary.invoices
    )
}

pub fn message(text: &str) -> String {
    format!("{text}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_align_columns() {
        let rows = vec![
            vec!["Aspirin".to_string(), "3".to_string()],
            vec!["Amoxicillin 500mg".to_string(), "12".to_string()],
        ];
        let out = table(&["NAME", "QTY"], &rows);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], format!("{:<17}  QTY", "NAME"));
        assert_eq!(lines[1], format!("{}  ---", "-".repeat(17)));
        assert_eq!(lines[2], format!("{:<17}  3", "Aspirin"));
    }

    #[test]
    fn alerts_export_as_one_csv() {
        use chrono::NaiveDate;
        use pharmacy_analytics::{ExpiryAlert, LowStockAlert, Severity};
        use pharmacy_core::BatchId;

        let as_of = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let report = AlertReport {
            as_of,
            expiring: vec![ExpiryAlert {
                batch_id: BatchId::new(),
                drug_id: DrugId::new(),
                drug_name: "Insulin, Glargine".to_string(),
                lot_number: Some("L-7".to_string()),
                expiry_date: NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(),
                quantity: 8,
                days_remaining: 3,
                severity: Severity::Critical,
            }],
            low_stock: vec![LowStockAlert {
                drug_id: DrugId::new(),
                drug_name: "Aspirin 325mg".to_string(),
                on_hand: 4,
                reorder_threshold: 15,
                deficit: 11,
                severity: Severity::Warning,
            }],
        };

        let out = alerts_csv(&report).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("kind,severity,drug_id,drug_name,batch_id"));
        assert!(lines[1].starts_with("expiry,critical,"));
        assert!(lines[1].contains(",\"Insulin, Glargine\","));
        assert!(lines[1].ends_with(",L-7,2026-03-04,3,8,,"));
        assert!(lines[2].starts_with("low_stock,warning,"));
        assert!(lines[2].ends_with(",Aspirin 325mg,,,,,4,15,11"));
    }

    #[test]
    fn empty_csv_keeps_header() {
        let out = sales_csv(&[], &HashMap::new()).unwrap();
        assert_eq!(
            out,
            "invoice,drug_name,batch_id,quantity,unit_price,discount,total,profit,sold_at,sold_by\n"
        );
    }

    #[test]
    fn csv_is_not_offered_everywhere() {
        assert!(emit(OutputFormat::Csv, &1, |_| String::new()).is_err());
    }

    #[test]
    fn empty_lists_say_so() {
        assert_eq!(categories(&[]), "No categories.\n");
        assert_eq!(batches(&[], &HashMap::new()), "No batches.\n");
    }
}
