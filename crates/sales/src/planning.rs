//! Sale and void planning.
//!
//! Stores load the relevant drugs and batches, call these functions, and then
//! persist the returned plan in one atomic write. Nothing here touches storage,
//! so both store backends share the same rules.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use pharmacy_catalog::Drug;
use pharmacy_core::{BatchId, DomainError, DomainResult, DrugId, Money, ReturnId, SaleId};
use pharmacy_inventory::Batch;

use crate::invoice::InvoiceNumber;
use crate::sale::{Sale, SaleLine, SaleOrder, SaleReturn};

/// Ledger rows and batch states produced by a sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalePlan {
    pub sales: Vec<Sale>,
    /// Batches whose quantity changed, in the order they were first touched.
    pub batches: Vec<Batch>,
}

/// Validate `order` against current drugs and batches and allocate stock.
///
/// `batches` must contain every batch of every drug named in the order (and
/// any explicitly requested batch). Lines are processed in order against a
/// working copy, so two lines for the same drug cannot oversell.
pub fn plan_sale(
    order: &SaleOrder,
    invoice: &InvoiceNumber,
    drugs: &HashMap<DrugId, Drug>,
    batches: &[Batch],
) -> DomainResult<SalePlan> {
    if order.lines.is_empty() {
        return Err(DomainError::validation("cannot record an empty sale"));
    }

    let today = order.sale_day();
    let sold_by = order
        .sold_by
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut working: HashMap<BatchId, Batch> = batches.iter().map(|b| (b.id, b.clone())).collect();
    let mut touched: Vec<BatchId> = Vec::new();
    let mut sales = Vec::new();

    for line in &order.lines {
        let drug = drugs
            .get(&line.drug_id)
            .ok_or_else(|| DomainError::not_found(format!("drug {}", line.drug_id)))?;
        validate_line(line, drug)?;

        let allocations = match line.batch_id {
            Some(batch_id) => vec![(batch_id, line.quantity)],
            None => allocate_fefo(drug, line.quantity, &working, today)?,
        };

        for (batch_id, qty) in allocations {
            let batch = working
                .get(&batch_id)
                .ok_or_else(|| DomainError::not_found(format!("batch {batch_id}")))?;
            if batch.drug_id != drug.id {
                return Err(DomainError::constraint(format!(
                    "batch {batch_id} does not belong to drug '{}'",
                    drug.name
                )));
            }
            if batch.is_expired(today) {
                return Err(DomainError::constraint(format!(
                    "batch {batch_id} expired on {}",
                    batch.expiry_date
                )));
            }

            let next = batch.withdrawn(qty)?;
            let unit_cost = next.unit_cost;
            working.insert(batch_id, next);
            if !touched.contains(&batch_id) {
                touched.push(batch_id);
            }

            let net_price = drug.unit_price - line.discount_per_unit;
            let total = net_price
                .checked_mul(qty)
                .ok_or_else(|| DomainError::constraint("sale total overflows"))?;

            sales.push(Sale {
                id: SaleId::new(),
                invoice: invoice.clone(),
                drug_id: drug.id,
                batch_id,
                quantity: qty,
                unit_price: drug.unit_price,
                unit_cost,
                discount: line.discount_per_unit,
                total,
                sold_by: sold_by.clone(),
                sold_at: order.sold_at,
            });
        }
    }

    let batches = touched
        .into_iter()
        .filter_map(|id| working.remove(&id))
        .collect();

    Ok(SalePlan { sales, batches })
}

fn validate_line(line: &SaleLine, drug: &Drug) -> DomainResult<()> {
    if line.quantity <= 0 {
        return Err(DomainError::validation(format!(
            "quantity must be positive for '{}'",
            drug.name
        )));
    }
    drug.ensure_active()?;
    if line.discount_per_unit.is_negative() {
        return Err(DomainError::validation("discount cannot be negative"));
    }
    if line.discount_per_unit > drug.unit_price {
        return Err(DomainError::constraint(format!(
            "total sale amount cannot be negative for '{}'",
            drug.name
        )));
    }
    Ok(())
}

/// First-expiry-first-out allocation over the drug's sellable batches.
fn allocate_fefo(
    drug: &Drug,
    quantity: i64,
    working: &HashMap<BatchId, Batch>,
    today: NaiveDate,
) -> DomainResult<Vec<(BatchId, i64)>> {
    let mut candidates: Vec<&Batch> = working
        .values()
        .filter(|b| b.drug_id == drug.id && b.is_sellable(today))
        .collect();
    candidates.sort_by_key(|b| (b.expiry_date, b.received_date, b.id));

    let available: i64 = candidates.iter().map(|b| b.quantity).sum();
    if available < quantity {
        return Err(DomainError::constraint(format!(
            "only {available} units available for '{}'",
            drug.name
        )));
    }

    let mut remaining = quantity;
    let mut allocations = Vec::new();
    for batch in candidates {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.quantity);
        allocations.push((batch.id, take));
        remaining -= take;
    }
    Ok(allocations)
}

/// Build the return rows that void every line of an invoice.
///
/// `sales` are the ledger lines of the invoice; `existing_returns` are any
/// returns already recorded against them.
pub fn plan_void(
    invoice: &InvoiceNumber,
    sales: &[Sale],
    existing_returns: &[SaleReturn],
    reason: &str,
    now: DateTime<Utc>,
) -> DomainResult<Vec<SaleReturn>> {
    if sales.is_empty() {
        return Err(DomainError::not_found(format!("no sales found for invoice {invoice}")));
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::validation("a reason is required to void an invoice"));
    }
    if existing_returns
        .iter()
        .any(|r| sales.iter().any(|s| s.id == r.sale_id))
    {
        return Err(DomainError::constraint(format!("invoice {invoice} is already voided")));
    }

    Ok(sales
        .iter()
        .map(|s| SaleReturn {
            id: ReturnId::new(),
            sale_id: s.id,
            invoice: s.invoice.clone(),
            drug_id: s.drug_id,
            batch_id: s.batch_id,
            quantity: s.quantity,
            reason: reason.to_string(),
            returned_at: now,
        })
        .collect())
}

/// Sum of all line totals of a plan.
pub fn plan_total(plan: &SalePlan) -> Money {
    plan.sales.iter().map(|s| s.total).sum()
}
