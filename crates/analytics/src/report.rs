//! Sales and stock reports.
//!
//! All figures are net of returns: a returned unit is taken off the day and
//! drug of the sale it came from, along with its revenue and cost.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use pharmacy_core::{CategoryId, DrugId, Money, SaleId};
use pharmacy_sales::Sale;
use pharmacy_store::{BatchFilter, DrugFilter, RecordStore, SaleFilter};

use crate::result::{AnalyticsError, AnalyticsResult};

/// One sale line after subtracting whatever was returned from it.
#[derive(Debug, Clone)]
struct NetLine {
    drug_id: DrugId,
    day: NaiveDate,
    invoice: String,
    units: i64,
    returned: i64,
    revenue: Money,
    cost: Money,
}

impl NetLine {
    fn new(sale: &Sale, returned: i64) -> AnalyticsResult<Self> {
        let units = sale.quantity - returned;
        let revenue = sale
            .unit_price
            .checked_sub(sale.discount)
            .and_then(|net| net.checked_mul(units))
            .ok_or_else(|| overflow("revenue of a sale line"))?;
        let cost = sale
            .unit_cost
            .checked_mul(units)
            .ok_or_else(|| overflow("cost of a sale line"))?;
        Ok(Self {
            drug_id: sale.drug_id,
            day: sale.sold_on(),
            invoice: sale.invoice.as_str().to_string(),
            units,
            returned,
            revenue,
            cost,
        })
    }

    fn profit(&self) -> AnalyticsResult<Money> {
        self.revenue
            .checked_sub(self.cost)
            .ok_or_else(|| overflow("profit of a sale line"))
    }
}

fn overflow(what: &str) -> AnalyticsError {
    AnalyticsError::InvalidInput(format!("{what} is too large to compute"))
}

fn add(total: Money, amount: Money, what: &str) -> AnalyticsResult<Money> {
    total.checked_add(amount).ok_or_else(|| overflow(what))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub revenue: Money,
    pub cost: Money,
    pub profit: Money,
    pub units: i64,
    pub returned_units: i64,
    /// Distinct invoices with at least one unit still sold.
    pub invoices: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugSales {
    pub drug_id: DrugId,
    pub drug_name: String,
    pub units: i64,
    pub revenue: Money,
    pub profit: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub day: NaiveDate,
    pub units: i64,
    pub revenue: Money,
    pub profit: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySales {
    /// `None` groups uncategorised drugs.
    pub category_id: Option<CategoryId>,
    pub category_name: String,
    pub units: i64,
    pub revenue: Money,
}

/// Stock value at cost of the sellable batches on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockValuation {
    pub as_of: NaiveDate,
    pub batches: usize,
    pub units: i64,
    pub value: Money,
    /// Units in batches that expired before `as_of` but were not written off.
    pub expired_units: i64,
    pub expired_value: Money,
}

pub struct Reporter<'a, S: RecordStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RecordStore + ?Sized> Reporter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    fn net_lines(&self, from: NaiveDate, to: NaiveDate) -> AnalyticsResult<Vec<NetLine>> {
        if from > to {
            return Err(AnalyticsError::InvalidInput(format!("empty date range {from}..={to}")));
        }
        let sales = self.store.list_sales(&SaleFilter::between(from, to))?;
        let ids: HashSet<SaleId> = sales.iter().map(|s| s.id).collect();

        let mut returned: HashMap<SaleId, i64> = HashMap::new();
        for ret in self.store.list_returns(&SaleFilter::default())? {
            if ids.contains(&ret.sale_id) {
                *returned.entry(ret.sale_id).or_default() += ret.quantity;
            }
        }

        sales
            .iter()
            .map(|s| NetLine::new(s, returned.get(&s.id).copied().unwrap_or(0)))
            .collect()
    }

    fn drug_names(&self) -> AnalyticsResult<HashMap<DrugId, (String, Option<CategoryId>)>> {
        Ok(self
            .store
            .list_drugs(&DrugFilter::default())?
            .into_iter()
            .map(|d| (d.id, (d.name, d.category_id)))
            .collect())
    }

    /// Totals over `from..=to`.
    pub fn summary(&self, from: NaiveDate, to: NaiveDate) -> AnalyticsResult<SalesSummary> {
        let lines = self.net_lines(from, to)?;
        let revenue = Money::checked_sum(lines.iter().map(|l| l.revenue))
            .ok_or_else(|| overflow("total revenue"))?;
        let cost = Money::checked_sum(lines.iter().map(|l| l.cost)).ok_or_else(|| overflow("total cost"))?;
        let profit = revenue.checked_sub(cost).ok_or_else(|| overflow("total profit"))?;
        let invoices: HashSet<&str> = lines
            .iter()
            .filter(|l| l.units > 0)
            .map(|l| l.invoice.as_str())
            .collect();

        Ok(SalesSummary {
            from,
            to,
            revenue,
            cost,
            profit,
            units: lines.iter().map(|l| l.units).sum(),
            returned_units: lines.iter().map(|l| l.returned).sum(),
            invoices: invoices.len(),
        })
    }

    /// Best sellers by net revenue; ties by name. Drugs with nothing left
    /// sold are omitted.
    pub fn top_drugs(&self, from: NaiveDate, to: NaiveDate, limit: usize) -> AnalyticsResult<Vec<DrugSales>> {
        let names = self.drug_names()?;
        let mut per_drug: HashMap<DrugId, DrugSales> = HashMap::new();
        for line in self.net_lines(from, to)? {
            let entry = per_drug.entry(line.drug_id).or_insert_with(|| DrugSales {
                drug_id: line.drug_id,
                drug_name: names.get(&line.drug_id).map(|(n, _)| n.clone()).unwrap_or_default(),
                units: 0,
                revenue: Money::ZERO,
                profit: Money::ZERO,
            });
            entry.units += line.units;
            entry.revenue = add(entry.revenue, line.revenue, "drug revenue")?;
            entry.profit = add(entry.profit, line.profit()?, "drug profit")?;
        }

        let mut ranked: Vec<DrugSales> = per_drug.into_values().filter(|d| d.units > 0).collect();
        ranked.sort_by(|a, b| {
            b.revenue
                .cmp(&a.revenue)
                .then_with(|| a.drug_name.cmp(&b.drug_name))
                .then(a.drug_id.cmp(&b.drug_id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// One point per day in `from..=to`, including days without sales.
    pub fn daily_trend(&self, from: NaiveDate, to: NaiveDate) -> AnalyticsResult<Vec<DailyPoint>> {
        let lines = self.net_lines(from, to)?;
        let mut days: BTreeMap<NaiveDate, DailyPoint> = BTreeMap::new();
        let mut cursor = Some(from);
        while let Some(day) = cursor.filter(|d| *d <= to) {
            days.insert(
                day,
                DailyPoint {
                    day,
                    units: 0,
                    revenue: Money::ZERO,
                    profit: Money::ZERO,
                },
            );
            cursor = day.checked_add_days(Days::new(1));
        }
        for line in lines {
            if let Some(point) = days.get_mut(&line.day) {
                point.units += line.units;
                point.revenue = add(point.revenue, line.revenue, "daily revenue")?;
                point.profit = add(point.profit, line.profit()?, "daily profit")?;
            }
        }
        Ok(days.into_values().collect())
    }

    /// Net units and revenue per category, highest revenue first.
    pub fn by_category(&self, from: NaiveDate, to: NaiveDate) -> AnalyticsResult<Vec<CategorySales>> {
        let drugs = self.drug_names()?;
        let categories: HashMap<CategoryId, String> = self
            .store
            .list_categories()?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        let mut grouped: HashMap<Option<CategoryId>, CategorySales> = HashMap::new();
        for line in self.net_lines(from, to)? {
            let category_id = drugs.get(&line.drug_id).and_then(|(_, c)| *c);
            let entry = grouped.entry(category_id).or_insert_with(|| CategorySales {
                category_id,
                category_name: category_id
                    .and_then(|id| categories.get(&id).cloned())
                    .unwrap_or_else(|| "Uncategorised".to_string()),
                units: 0,
                revenue: Money::ZERO,
            });
            entry.units += line.units;
            entry.revenue = add(entry.revenue, line.revenue, "category revenue")?;
        }

        let mut rows: Vec<CategorySales> = grouped.into_values().collect();
        rows.sort_by(|a, b| {
            b.revenue
                .cmp(&a.revenue)
                .then_with(|| a.category_name.cmp(&b.category_name))
        });
        Ok(rows)
    }

    pub fn stock_valuation(&self, as_of: NaiveDate) -> AnalyticsResult<StockValuation> {
        let batches = self.store.list_batches(&BatchFilter {
            in_stock_only: true,
            ..Default::default()
        })?;
        let mut valuation = StockValuation {
            as_of,
            batches: 0,
            units: 0,
            value: Money::ZERO,
            expired_units: 0,
            expired_value: Money::ZERO,
        };
        for batch in batches {
            let value = batch
                .unit_cost
                .checked_mul(batch.quantity)
                .ok_or_else(|| overflow("batch value"))?;
            if batch.is_expired(as_of) {
                valuation.expired_units += batch.quantity;
                valuation.expired_value = add(valuation.expired_value, value, "expired stock value")?;
            } else {
                valuation.batches += 1;
                valuation.units += batch.quantity;
                valuation.value = add(valuation.value, value, "stock value")?;
            }
        }
        Ok(valuation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pharmacy_catalog::{Drug, NewDrug};
    use pharmacy_inventory::NewBatch;
    use pharmacy_sales::{SaleLine, SaleOrder};
    use pharmacy_store::InMemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn stocked(store: &InMemoryStore, name: &str, price: i64, cost: i64) -> Drug {
        let drug = store
            .create_drug(NewDrug {
                name: name.to_string(),
                category_id: None,
                unit_price: Money::from_cents(price),
                reorder_threshold: 0,
                supplier: None,
            })
            .unwrap();
        store
            .receive_batch(NewBatch {
                drug_id: drug.id,
                lot_number: None,
                quantity: 100,
                unit_cost: Money::from_cents(cost),
                expiry_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
                received_date: day(1),
            })
            .unwrap();
        drug
    }

    fn sell(store: &InMemoryStore, drug: &Drug, qty: i64, on: u32) -> pharmacy_sales::Receipt {
        let at = Utc.with_ymd_and_hms(2026, 3, on, 10, 0, 0).unwrap();
        store
            .record_sale(SaleOrder::new(vec![SaleLine::new(drug.id, qty)], at))
            .unwrap()
    }

    #[test]
    fn summary_nets_voided_invoices() {
        let store = InMemoryStore::new();
        let para = stocked(&store, "Paracetamol 500mg", 300, 100);
        sell(&store, &para, 4, 2);
        let voided = sell(&store, &para, 2, 3);
        store.void_invoice(&voided.invoice, "wrong patient").unwrap();

        let summary = Reporter::new(&store).summary(day(1), day(5)).unwrap();

        assert_eq!(summary.units, 4);
        assert_eq!(summary.returned_units, 2);
        assert_eq!(summary.revenue, Money::from_cents(1200));
        assert_eq!(summary.profit, Money::from_cents(800));
        assert_eq!(summary.invoices, 1);
    }

    #[test]
    fn top_drugs_ranked_by_revenue() {
        let store = InMemoryStore::new();
        let cheap = stocked(&store, "Cheap", 100, 50);
        let pricey = stocked(&store, "Pricey", 1000, 400);
        sell(&store, &cheap, 20, 2);
        sell(&store, &pricey, 3, 2);

        let top = Reporter::new(&store).top_drugs(day(1), day(5), 1).unwrap();

        assert_eq!(top.len(), 1);
        assert_eq!(top[0].drug_name, "Pricey");
        assert_eq!(top[0].profit, Money::from_cents(1800));
    }

    #[test]
    fn daily_trend_is_zero_filled() {
        let store = InMemoryStore::new();
        let drug = stocked(&store, "Ibuprofen 200mg", 250, 100);
        sell(&store, &drug, 2, 2);
        sell(&store, &drug, 1, 4);

        let trend = Reporter::new(&store).daily_trend(day(1), day(4)).unwrap();
        let units: Vec<i64> = trend.iter().map(|p| p.units).collect();

        assert_eq!(units, vec![0, 2, 0, 1]);
        assert_eq!(trend[1].revenue, Money::from_cents(500));
    }

    #[test]
    fn uncategorised_drugs_are_grouped() {
        let store = InMemoryStore::new();
        let analgesics = store.create_category("Analgesics").unwrap();
        let para = stocked(&store, "Paracetamol 500mg", 300, 100);
        store
            .update_drug(
                para.id,
                pharmacy_catalog::DrugUpdate {
                    category_id: Some(Some(analgesics.id)),
                    ..Default::default()
                },
            )
            .unwrap();
        let other = stocked(&store, "Saline", 100, 50);
        sell(&store, &para, 1, 2);
        sell(&store, &other, 1, 2);

        let rows = Reporter::new(&store).by_category(day(1), day(3)).unwrap();

        assert_eq!(rows[0].category_name, "Analgesics");
        assert_eq!(rows[1].category_id, None);
    }

    #[test]
    fn valuation_separates_expired_stock() {
        let store = InMemoryStore::new();
        let drug = stocked(&store, "Insulin", 2000, 1500);
        store
            .receive_batch(NewBatch {
                drug_id: drug.id,
                lot_number: Some("OLD".to_string()),
                quantity: 2,
                unit_cost: Money::from_cents(1500),
                expiry_date: day(2),
                received_date: day(1),
            })
            .unwrap();

        let valuation = Reporter::new(&store).stock_valuation(day(10)).unwrap();

        assert_eq!((valuation.batches, valuation.units), (1, 100));
        assert_eq!(valuation.value, Money::from_cents(150_000));
        assert_eq!(valuation.expired_units, 2);
    }

    #[test]
    fn valuation_overflow_is_an_error() {
        let store = InMemoryStore::new();
        let drug = stocked(&store, "Orphan Drug", 100, 100);
        for _ in 0..10 {
            store
                .receive_batch(NewBatch {
                    drug_id: drug.id,
                    lot_number: None,
                    quantity: Money::MAX_UNITS,
                    unit_cost: Money::MAX_UNIT,
                    expiry_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
                    received_date: day(1),
                })
                .unwrap();
        }

        assert!(matches!(
            Reporter::new(&store).stock_valuation(day(10)),
            Err(AnalyticsError::InvalidInput(_))
        ));
    }

    #[test]
    fn oversized_receipt_never_reaches_reports() {
        let store = InMemoryStore::new();
        let drug = stocked(&store, "Orphan Drug", 100, 100);
        let rejected = store.receive_batch(NewBatch {
            drug_id: drug.id,
            lot_number: None,
            quantity: 10_000_000_000,
            unit_cost: "1000000000.00".parse().unwrap(),
            expiry_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
            received_date: day(1),
        });
        assert!(rejected.is_err());

        let valuation = Reporter::new(&store).stock_valuation(day(10)).unwrap();
        assert_eq!(valuation.value, Money::from_cents(10_000));
    }

    #[test]
    fn reversed_range_is_rejected() {
        let store = InMemoryStore::new();
        assert!(Reporter::new(&store).summary(day(5), day(1)).is_err());
    }
}
