use std::sync::Arc;

use chrono::NaiveDate;

use pharmacy_catalog::{Category, Drug, DrugUpdate, NewDrug};
use pharmacy_core::{BatchId, CategoryId, DrugId, SaleId};
use pharmacy_inventory::{AdjustmentKind, Batch, NewAdjustment, NewBatch, StockAdjustment};
use pharmacy_sales::{InvoiceNumber, Receipt, Sale, SaleOrder, SaleReturn};

use crate::error::{StoreError, StoreResult};
use crate::query::{AdjustmentFilter, BatchFilter, DrugFilter, SaleFilter, StockLevel};

/// Durable system of record for the catalog, batch stock and the sales ledger.
///
/// Every mutating operation is atomic: it either applies completely or leaves
/// the store exactly as it was. Batch quantities never go negative and sales
/// are never edited in place (voids append return rows instead).
pub trait RecordStore: Send + Sync {
    // Categories

    fn create_category(&self, name: &str) -> StoreResult<Category>;

    fn list_categories(&self) -> StoreResult<Vec<Category>>;

    fn rename_category(&self, id: CategoryId, name: &str) -> StoreResult<Category>;

    /// Fails with `ConstraintViolation` while any drug still references it.
    fn delete_category(&self, id: CategoryId) -> StoreResult<()>;

    // Drugs

    fn create_drug(&self, input: NewDrug) -> StoreResult<Drug>;

    fn get_drug(&self, id: DrugId) -> StoreResult<Drug>;

    fn update_drug(&self, id: DrugId, update: DrugUpdate) -> StoreResult<Drug>;

    fn deactivate_drug(&self, id: DrugId) -> StoreResult<Drug>;

    fn reactivate_drug(&self, id: DrugId) -> StoreResult<Drug>;

    /// Drugs ordered by name (case-insensitive), then id.
    fn list_drugs(&self, filter: &DrugFilter) -> StoreResult<Vec<Drug>>;

    // Batches

    /// Record a delivery. Also writes the `Receipt` adjustment for the initial
    /// quantity.
    fn receive_batch(&self, input: NewBatch) -> StoreResult<Batch>;

    fn get_batch(&self, id: BatchId) -> StoreResult<Batch>;

    /// Batches ordered by expiry date, then received date, then id.
    fn list_batches(&self, filter: &BatchFilter) -> StoreResult<Vec<Batch>>;

    /// Apply a manual correction or write-off to a batch.
    fn adjust_batch(&self, input: NewAdjustment) -> StoreResult<StockAdjustment>;

    /// Delete a batch that has no sales history, together with its adjustments.
    fn remove_batch(&self, id: BatchId) -> StoreResult<()>;

    /// Adjustments, newest first.
    fn list_adjustments(&self, filter: &AdjustmentFilter) -> StoreResult<Vec<StockAdjustment>>;

    // Sales

    /// Next free invoice number for `day` (`INV-YYMMDD-NNN`).
    fn next_invoice_number(&self, day: NaiveDate) -> StoreResult<InvoiceNumber>;

    /// Record every line of `order` under one invoice, or nothing at all.
    fn record_sale(&self, order: SaleOrder) -> StoreResult<Receipt>;

    fn get_sale(&self, id: SaleId) -> StoreResult<Sale>;

    /// Sales, newest first.
    fn list_sales(&self, filter: &SaleFilter) -> StoreResult<Vec<Sale>>;

    /// Reverse every line of an invoice and put the units back in their batches.
    fn void_invoice(&self, invoice: &InvoiceNumber, reason: &str) -> StoreResult<Vec<SaleReturn>>;

    /// Returns, newest first.
    fn list_returns(&self, filter: &SaleFilter) -> StoreResult<Vec<SaleReturn>>;

    // Stock totals

    /// Units across all batches of a drug, expired ones included.
    fn stock_on_hand(&self, drug_id: DrugId) -> StoreResult<i64>;

    /// Stock of every drug, ordered like `list_drugs`.
    fn stock_levels(&self, as_of: NaiveDate) -> StoreResult<Vec<StockLevel>>;

    /// Zero out a batch with a `WriteOff` adjustment.
    fn write_off_batch(&self, id: BatchId, reason: &str) -> StoreResult<StockAdjustment> {
        let batch = self.get_batch(id)?;
        if batch.quantity == 0 {
            return Err(StoreError::Validation(format!("batch {id} has no units to write off")));
        }
        self.adjust_batch(NewAdjustment {
            batch_id: id,
            delta: -batch.quantity,
            kind: AdjustmentKind::WriteOff,
            reason: reason.to_string(),
        })
    }
}

/// Receipts and returns are written by the store itself, never by callers.
pub(crate) fn ensure_caller_adjustment(kind: AdjustmentKind) -> StoreResult<()> {
    match kind {
        AdjustmentKind::Manual | AdjustmentKind::WriteOff => Ok(()),
        AdjustmentKind::Receipt | AdjustmentKind::Return => Err(StoreError::Validation(format!(
            "'{}' adjustments are recorded by the store",
            kind.as_str()
        ))),
    }
}

impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    fn create_category(&self, name: &str) -> StoreResult<Category> {
        (**self).create_category(name)
    }

    fn list_categories(&self) -> StoreResult<Vec<Category>> {
        (**self).list_categories()
    }

    fn rename_category(&self, id: CategoryId, name: &str) -> StoreResult<Category> {
        (**self).rename_category(id, name)
    }

    fn delete_category(&self, id: CategoryId) -> StoreResult<()> {
        (**self).delete_category(id)
    }

    fn create_drug(&self, input: NewDrug) -> StoreResult<Drug> {
        (**self).create_drug(input)
    }

    fn get_drug(&self, id: DrugId) -> StoreResult<Drug> {
        (**self).get_drug(id)
    }

    fn update_drug(&self, id: DrugId, update: DrugUpdate) -> StoreResult<Drug> {
        (**self).update_drug(id, update)
    }

    fn deactivate_drug(&self, id: DrugId) -> StoreResult<Drug> {
        (**self).deactivate_drug(id)
    }

    fn reactivate_drug(&self, id: DrugId) -> StoreResult<Drug> {
        (**self).reactivate_drug(id)
    }

    fn list_drugs(&self, filter: &DrugFilter) -> StoreResult<Vec<Drug>> {
        (**self).list_drugs(filter)
    }

    fn receive_batch(&self, input: NewBatch) -> StoreResult<Batch> {
        (**self).receive_batch(input)
    }

    fn get_batch(&self, id: BatchId) -> StoreResult<Batch> {
        (**self).get_batch(id)
    }

    fn list_batches(&self, filter: &BatchFilter) -> StoreResult<Vec<Batch>> {
        (**self).list_batches(filter)
    }

    fn adjust_batch(&self, input: NewAdjustment) -> StoreResult<StockAdjustment> {
        (**self).adjust_batch(input)
    }

    fn remove_batch(&self, id: BatchId) -> StoreResult<()> {
        (**self).remove_batch(id)
    }

    fn list_adjustments(&self, filter: &AdjustmentFilter) -> StoreResult<Vec<StockAdjustment>> {
        (**self).list_adjustments(filter)
    }

    fn next_invoice_number(&self, day: NaiveDate) -> StoreResult<InvoiceNumber> {
        (**self).next_invoice_number(day)
    }

    fn record_sale(&self, order: SaleOrder) -> StoreResult<Receipt> {
        (**self).record_sale(order)
    }

    fn get_sale(&self, id: SaleId) -> StoreResult<Sale> {
        (**self).get_sale(id)
    }

    fn list_sales(&self, filter: &SaleFilter) -> StoreResult<Vec<Sale>> {
        (**self).list_sales(filter)
    }

    fn void_invoice(&self, invoice: &InvoiceNumber, reason: &str) -> StoreResult<Vec<SaleReturn>> {
        (**self).void_invoice(invoice, reason)
    }

    fn list_returns(&self, filter: &SaleFilter) -> StoreResult<Vec<SaleReturn>> {
        (**self).list_returns(filter)
    }

    fn stock_on_hand(&self, drug_id: DrugId) -> StoreResult<i64> {
        (**self).stock_on_hand(drug_id)
    }

    fn stock_levels(&self, as_of: NaiveDate) -> StoreResult<Vec<StockLevel>> {
        (**self).stock_levels(as_of)
    }
}
