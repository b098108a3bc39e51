use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pharmacy_core::{BatchId, DrugId, Money, ReturnId, SaleId};

use crate::invoice::InvoiceNumber;

/// One line of the append-only sales ledger: units of one drug taken from one batch.
///
/// Prices and costs are captured at sale time, so later catalog changes do not
/// rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub invoice: InvoiceNumber,
    pub drug_id: DrugId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_price: Money,
    pub unit_cost: Money,
    /// Per-unit discount.
    pub discount: Money,
    /// `quantity * (unit_price - discount)`.
    pub total: Money,
    pub sold_by: Option<String>,
    pub sold_at: DateTime<Utc>,
}

impl Sale {
    /// `None` when the amount does not fit in [`Money`].
    pub fn cost(&self) -> Option<Money> {
        self.unit_cost.checked_mul(self.quantity)
    }

    pub fn profit(&self) -> Option<Money> {
        self.cost().and_then(|cost| self.total.checked_sub(cost))
    }

    pub fn sold_on(&self) -> NaiveDate {
        self.sold_at.date_naive()
    }
}

/// Append-only record that units of a sale line were put back into stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReturn {
    pub id: ReturnId,
    pub sale_id: SaleId,
    pub invoice: InvoiceNumber,
    pub drug_id: DrugId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub reason: String,
    pub returned_at: DateTime<Utc>,
}

/// A requested line of a sale. Without `batch_id` the store allocates
/// first-expiry-first-out across the drug's sellable batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub drug_id: DrugId,
    pub batch_id: Option<BatchId>,
    pub quantity: i64,
    pub discount_per_unit: Money,
}

impl SaleLine {
    pub fn new(drug_id: DrugId, quantity: i64) -> Self {
        Self {
            drug_id,
            batch_id: None,
            quantity,
            discount_per_unit: Money::ZERO,
        }
    }

    pub fn from_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_discount(mut self, discount_per_unit: Money) -> Self {
        self.discount_per_unit = discount_per_unit;
        self
    }
}

/// A sale request: one or more lines under a single invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleOrder {
    /// Explicit invoice number; generated from the sale day when absent.
    pub invoice: Option<InvoiceNumber>,
    pub lines: Vec<SaleLine>,
    pub sold_by: Option<String>,
    pub sold_at: DateTime<Utc>,
}

impl SaleOrder {
    pub fn new(lines: Vec<SaleLine>, sold_at: DateTime<Utc>) -> Self {
        Self {
            invoice: None,
            lines,
            sold_by: None,
            sold_at,
        }
    }

    pub fn sale_day(&self) -> NaiveDate {
        self.sold_at.date_naive()
    }
}

/// Outcome of a recorded sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub invoice: InvoiceNumber,
    pub sales: Vec<Sale>,
    pub total: Money,
}

impl Receipt {
    pub fn new(invoice: InvoiceNumber, sales: Vec<Sale>) -> Self {
        let total = sales.iter().map(|s| s.total).sum();
        Self { invoice, sales, total }
    }

    pub fn units(&self) -> i64 {
        self.sales.iter().map(|s| s.quantity).sum()
    }
}
