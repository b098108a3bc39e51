//! Demand series built from the sales ledger.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use pharmacy_core::{DrugId, SaleId};
use pharmacy_sales::{Sale, SaleReturn};

use crate::result::{AnalyticsError, AnalyticsResult};

/// Bucket size of a demand series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }

    /// First day of the period containing `day`. Weeks start on Monday.
    pub fn start_of(self, day: NaiveDate) -> NaiveDate {
        match self {
            Period::Day => day,
            Period::Week => day - Days::new(u64::from(day.weekday().num_days_from_monday())),
            Period::Month => day.with_day(1).unwrap_or(day),
        }
    }

    /// Start of the period `n` periods after the one starting at `start`.
    pub fn advance(self, start: NaiveDate, n: u32) -> Option<NaiveDate> {
        match self {
            Period::Day => start.checked_add_days(Days::new(u64::from(n))),
            Period::Week => start.checked_add_days(Days::new(7 * u64::from(n))),
            Period::Month => start.checked_add_months(Months::new(n)),
        }
    }

    /// Start of the period `n` periods before the one starting at `start`.
    pub fn rewind(self, start: NaiveDate, n: u32) -> Option<NaiveDate> {
        match self {
            Period::Day => start.checked_sub_days(Days::new(u64::from(n))),
            Period::Week => start.checked_sub_days(Days::new(7 * u64::from(n))),
            Period::Month => start.checked_sub_months(Months::new(n)),
        }
    }
}

impl core::fmt::Display for Period {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Period {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Period::Day),
            "week" | "weekly" => Ok(Period::Week),
            "month" | "monthly" => Ok(Period::Month),
            other => Err(AnalyticsError::InvalidConfig(format!("unknown period '{other}'"))),
        }
    }
}

/// Units sold per period for one drug, oldest first, zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandSeries {
    pub drug_id: DrugId,
    pub period: Period,
    /// Start date of each bucket.
    pub starts: Vec<NaiveDate>,
    pub quantities: Vec<f64>,
}

impl DemandSeries {
    /// Bucket the drug's sales between `from` and `to` (inclusive days).
    ///
    /// Returned units are subtracted from the period of the original sale, so a
    /// voided invoice leaves no demand behind.
    pub fn from_ledger(
        drug_id: DrugId,
        period: Period,
        from: NaiveDate,
        to: NaiveDate,
        sales: &[Sale],
        returns: &[SaleReturn],
    ) -> AnalyticsResult<Self> {
        if from > to {
            return Err(AnalyticsError::InvalidInput(format!(
                "empty date range {from}..={to}"
            )));
        }

        let mut buckets: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        let mut cursor = period.start_of(from);
        let last = period.start_of(to);
        while cursor <= last {
            buckets.insert(cursor, 0.0);
            cursor = match period.advance(cursor, 1) {
                Some(next) => next,
                None => break,
            };
        }

        let mut sale_days: HashMap<SaleId, NaiveDate> = HashMap::new();
        for sale in sales.iter().filter(|s| s.drug_id == drug_id) {
            let day = sale.sold_on();
            if day < from || day > to {
                continue;
            }
            sale_days.insert(sale.id, day);
            if let Some(units) = buckets.get_mut(&period.start_of(day)) {
                *units += sale.quantity as f64;
            }
        }
        for ret in returns {
            let Some(day) = sale_days.get(&ret.sale_id) else {
                continue;
            };
            if let Some(units) = buckets.get_mut(&period.start_of(*day)) {
                *units -= ret.quantity as f64;
            }
        }

        let (starts, quantities) = buckets.into_iter().map(|(d, q)| (d, q.max(0.0))).unzip();
        Ok(Self {
            drug_id,
            period,
            starts,
            quantities,
        })
    }

    pub fn values(&self) -> &[f64] {
        &self.quantities
    }

    pub fn len(&self) -> usize {
        self.quantities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.quantities.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pharmacy_core::{BatchId, Money, ReturnId};
    use pharmacy_sales::InvoiceNumber;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sale(drug_id: DrugId, on: NaiveDate, qty: i64) -> Sale {
        Sale {
            id: SaleId::new(),
            invoice: InvoiceNumber::for_day(on, 1),
            drug_id,
            batch_id: BatchId::new(),
            quantity: qty,
            unit_price: Money::from_cents(100),
            unit_cost: Money::from_cents(50),
            discount: Money::ZERO,
            total: Money::from_cents(100 * qty),
            sold_by: None,
            sold_at: Utc.from_utc_datetime(&on.and_hms_opt(12, 0, 0).unwrap()),
        }
    }

    #[test]
    fn weeks_start_on_monday() {
        // 2026-03-04 is a Wednesday.
        assert_eq!(Period::Week.start_of(day(2026, 3, 4)), day(2026, 3, 2));
        assert_eq!(Period::Month.start_of(day(2026, 3, 4)), day(2026, 3, 1));
        assert_eq!(Period::Month.rewind(day(2026, 3, 1), 2), Some(day(2026, 1, 1)));
    }

    #[test]
    fn buckets_are_zero_filled_and_netted() {
        let drug = DrugId::new();
        let other = DrugId::new();
        let first = sale(drug, day(2026, 3, 1), 4);
        let sales = vec![
            first.clone(),
            sale(drug, day(2026, 3, 1), 2),
            sale(drug, day(2026, 3, 3), 5),
            sale(other, day(2026, 3, 2), 99),
            sale(drug, day(2026, 3, 9), 1),
        ];
        let returns = vec![SaleReturn {
            id: ReturnId::new(),
            sale_id: first.id,
            invoice: first.invoice.clone(),
            drug_id: drug,
            batch_id: first.batch_id,
            quantity: 4,
            reason: "void".to_string(),
            returned_at: first.sold_at,
        }];

        let series =
            DemandSeries::from_ledger(drug, Period::Day, day(2026, 3, 1), day(2026, 3, 4), &sales, &returns).unwrap();

        assert_eq!(series.starts.len(), 4);
        assert_eq!(series.values(), &[2.0, 0.0, 5.0, 0.0]);
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = DemandSeries::from_ledger(DrugId::new(), Period::Day, day(2026, 3, 2), day(2026, 3, 1), &[], &[])
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidInput(_)));
    }
}
