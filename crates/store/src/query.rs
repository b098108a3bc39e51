//! Filter criteria and derived read models for record store queries.
//!
//! Filters are plain data so every backend can translate them (SQL `WHERE`
//! clauses for SQLite, predicate functions for the in-memory store).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pharmacy_catalog::{Drug, DrugStatus};
use pharmacy_core::{BatchId, CategoryId, DrugId};
use pharmacy_inventory::{Batch, StockAdjustment};
use pharmacy_sales::{InvoiceNumber, Sale, SaleReturn};

/// Filter criteria for drug listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugFilter {
    pub status: Option<DrugStatus>,
    pub category_id: Option<CategoryId>,
    /// Case-insensitive substring of the drug name.
    pub name_contains: Option<String>,
}

impl DrugFilter {
    pub fn active() -> Self {
        Self {
            status: Some(DrugStatus::Active),
            ..Default::default()
        }
    }

    pub fn matches(&self, drug: &Drug) -> bool {
        if let Some(status) = self.status {
            if drug.status != status {
                return false;
            }
        }
        if let Some(category_id) = self.category_id {
            if drug.category_id != Some(category_id) {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            if !drug.name_key().contains(&needle.trim().to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Filter criteria for batch listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFilter {
    pub drug_id: Option<DrugId>,
    /// Only batches whose expiry date is on or before this day (inclusive).
    pub expiring_on_or_before: Option<NaiveDate>,
    /// Skip batches that are expired as of this day.
    pub usable_on: Option<NaiveDate>,
    /// Skip batches with no units left.
    pub in_stock_only: bool,
}

impl BatchFilter {
    pub fn for_drug(drug_id: DrugId) -> Self {
        Self {
            drug_id: Some(drug_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, batch: &Batch) -> bool {
        if let Some(drug_id) = self.drug_id {
            if batch.drug_id != drug_id {
                return false;
            }
        }
        if let Some(limit) = self.expiring_on_or_before {
            if batch.expiry_date > limit {
                return false;
            }
        }
        if let Some(day) = self.usable_on {
            if batch.is_expired(day) {
                return false;
            }
        }
        if self.in_stock_only && batch.quantity <= 0 {
            return false;
        }
        true
    }
}

/// Filter criteria for the sales and returns ledgers. Date bounds are
/// inclusive calendar days (UTC).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleFilter {
    pub drug_id: Option<DrugId>,
    pub invoice: Option<InvoiceNumber>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl SaleFilter {
    pub fn for_invoice(invoice: InvoiceNumber) -> Self {
        Self {
            invoice: Some(invoice),
            ..Default::default()
        }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn matches(&self, sale: &Sale) -> bool {
        self.matches_parts(sale.drug_id, &sale.invoice, sale.sold_on())
    }

    pub fn matches_return(&self, ret: &SaleReturn) -> bool {
        self.matches_parts(ret.drug_id, &ret.invoice, ret.returned_at.date_naive())
    }

    fn matches_parts(&self, drug_id: DrugId, invoice: &InvoiceNumber, day: NaiveDate) -> bool {
        if self.drug_id.is_some_and(|d| d != drug_id) {
            return false;
        }
        if self.invoice.as_ref().is_some_and(|i| i != invoice) {
            return false;
        }
        if self.from.is_some_and(|from| day < from) {
            return false;
        }
        if self.to.is_some_and(|to| day > to) {
            return false;
        }
        true
    }
}

/// Filter criteria for the stock adjustment ledger. Date bounds are
/// inclusive calendar days (UTC) of `adjusted_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentFilter {
    pub batch_id: Option<BatchId>,
    pub drug_id: Option<DrugId>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl AdjustmentFilter {
    pub fn matches(&self, adj: &StockAdjustment) -> bool {
        let day = adj.adjusted_at.date_naive();
        self.batch_id.is_none_or(|b| b == adj.batch_id)
            && self.drug_id.is_none_or(|d| d == adj.drug_id)
            && self.from.is_none_or(|from| day >= from)
            && self.to.is_none_or(|to| day <= to)
    }
}

/// Aggregate stock of one drug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub drug: Drug,
    /// Units across all batches, expired ones included.
    pub on_hand: i64,
    /// Units across batches that are not expired on the queried day.
    pub usable: i64,
}
