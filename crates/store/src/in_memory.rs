use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{NaiveDate, Utc};

use pharmacy_catalog::{Category, Drug, DrugUpdate, NewDrug, name_key};
use pharmacy_core::{AdjustmentId, BatchId, CategoryId, DrugId, SaleId};
use pharmacy_inventory::{AdjustmentKind, Batch, NewAdjustment, NewBatch, StockAdjustment};
use pharmacy_sales::{InvoiceNumber, Receipt, Sale, SaleOrder, SaleReturn, plan_sale, plan_void};

use crate::error::{StoreError, StoreResult};
use crate::query::{AdjustmentFilter, BatchFilter, DrugFilter, SaleFilter, StockLevel};
use crate::record_store::{RecordStore, ensure_caller_adjustment};

#[derive(Debug, Default)]
struct State {
    categories: BTreeMap<CategoryId, Category>,
    drugs: BTreeMap<DrugId, Drug>,
    batches: BTreeMap<BatchId, Batch>,
    adjustments: Vec<StockAdjustment>,
    sales: Vec<Sale>,
    returns: Vec<SaleReturn>,
}

impl State {
    fn drug(&self, id: DrugId) -> StoreResult<&Drug> {
        self.drugs
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("drug {id}")))
    }

    fn batch(&self, id: BatchId) -> StoreResult<&Batch> {
        self.batches
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {id}")))
    }

    fn ensure_category(&self, id: Option<CategoryId>) -> StoreResult<()> {
        match id {
            Some(id) if !self.categories.contains_key(&id) => Err(StoreError::NotFound(format!("category {id}"))),
            _ => Ok(()),
        }
    }

    fn ensure_unique_drug_name(&self, drug: &Drug) -> StoreResult<()> {
        let key = drug.name_key();
        if self.drugs.values().any(|d| d.id != drug.id && d.name_key() == key) {
            return Err(StoreError::ConstraintViolation(format!(
                "a drug named '{}' already exists",
                drug.name
            )));
        }
        Ok(())
    }

    fn ensure_unique_category_name(&self, category: &Category) -> StoreResult<()> {
        let key = name_key(&category.name);
        if self
            .categories
            .values()
            .any(|c| c.id != category.id && name_key(&c.name) == key)
        {
            return Err(StoreError::ConstraintViolation(format!(
                "category '{}' already exists",
                category.name
            )));
        }
        Ok(())
    }

    fn invoice_exists(&self, invoice: &InvoiceNumber) -> bool {
        self.sales.iter().any(|s| &s.invoice == invoice)
    }

    fn next_invoice(&self, day: NaiveDate) -> InvoiceNumber {
        let prefix = InvoiceNumber::day_prefix(day);
        let issued: BTreeSet<&str> = self
            .sales
            .iter()
            .map(|s| s.invoice.as_str())
            .filter(|inv| inv.starts_with(&prefix))
            .collect();
        let mut seq = issued.len() as u32 + 1;
        loop {
            let candidate = InvoiceNumber::for_day(day, seq);
            if !self.invoice_exists(&candidate) {
                return candidate;
            }
            seq += 1;
        }
    }
}

fn sort_drugs(drugs: &mut [Drug]) {
    drugs.sort_by(|a, b| a.name_key().cmp(&b.name_key()).then(a.id.cmp(&b.id)));
}

/// In-memory record store.
///
/// Intended for tests and scratch sessions. All writes go through a single
/// write lock and are validated before any state is touched.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| StoreError::poisoned())
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| StoreError::poisoned())
    }

    fn update_drug_with(
        &self,
        id: DrugId,
        change: impl FnOnce(&Drug) -> StoreResult<Drug>,
    ) -> StoreResult<Drug> {
        let mut state = self.write()?;
        let next = change(state.drug(id)?)?;
        state.ensure_category(next.category_id)?;
        state.ensure_unique_drug_name(&next)?;
        state.drugs.insert(id, next.clone());
        Ok(next)
    }
}

impl RecordStore for InMemoryStore {
    fn create_category(&self, name: &str) -> StoreResult<Category> {
        let category = Category::create(CategoryId::new(), name)?;
        let mut state = self.write()?;
        state.ensure_unique_category_name(&category)?;
        state.categories.insert(category.id, category.clone());
        Ok(category)
    }

    fn list_categories(&self) -> StoreResult<Vec<Category>> {
        let state = self.read()?;
        let mut out: Vec<Category> = state.categories.values().cloned().collect();
        out.sort_by(|a, b| name_key(&a.name).cmp(&name_key(&b.name)).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    fn rename_category(&self, id: CategoryId, name: &str) -> StoreResult<Category> {
        let mut state = self.write()?;
        let current = state
            .categories
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("category {id}")))?;
        let next = current.renamed(name)?;
        state.ensure_unique_category_name(&next)?;
        state.categories.insert(id, next.clone());
        Ok(next)
    }

    fn delete_category(&self, id: CategoryId) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.categories.contains_key(&id) {
            return Err(StoreError::NotFound(format!("category {id}")));
        }
        let in_use = state.drugs.values().filter(|d| d.category_id == Some(id)).count();
        if in_use > 0 {
            return Err(StoreError::ConstraintViolation(format!(
                "category is used by {in_use} drug(s)"
            )));
        }
        state.categories.remove(&id);
        Ok(())
    }

    fn create_drug(&self, input: NewDrug) -> StoreResult<Drug> {
        let drug = Drug::create(DrugId::new(), input, Utc::now())?;
        let mut state = self.write()?;
        state.ensure_category(drug.category_id)?;
        state.ensure_unique_drug_name(&drug)?;
        state.drugs.insert(drug.id, drug.clone());
        Ok(drug)
    }

    fn get_drug(&self, id: DrugId) -> StoreResult<Drug> {
        self.read()?.drug(id).cloned()
    }

    fn update_drug(&self, id: DrugId, update: DrugUpdate) -> StoreResult<Drug> {
        self.update_drug_with(id, |d| Ok(d.updated(update)?))
    }

    fn deactivate_drug(&self, id: DrugId) -> StoreResult<Drug> {
        self.update_drug_with(id, |d| Ok(d.deactivated()?))
    }

    fn reactivate_drug(&self, id: DrugId) -> StoreResult<Drug> {
        self.update_drug_with(id, |d| Ok(d.reactivated()?))
    }

    fn list_drugs(&self, filter: &DrugFilter) -> StoreResult<Vec<Drug>> {
        let state = self.read()?;
        let mut out: Vec<Drug> = state.drugs.values().filter(|d| filter.matches(d)).cloned().collect();
        sort_drugs(&mut out);
        Ok(out)
    }

    fn receive_batch(&self, input: NewBatch) -> StoreResult<Batch> {
        let now = Utc::now();
        let batch = Batch::receive(BatchId::new(), input, now)?;
        let receipt = StockAdjustment::record(
            AdjustmentId::new(),
            batch.id,
            batch.drug_id,
            batch.quantity,
            AdjustmentKind::Receipt,
            "received",
            now,
        )?;

        let mut state = self.write()?;
        state.drug(batch.drug_id)?.ensure_active()?;
        if let Some(lot) = &batch.lot_number {
            let duplicate = state
                .batches
                .values()
                .any(|b| b.drug_id == batch.drug_id && b.lot_number.as_ref() == Some(lot));
            if duplicate {
                return Err(StoreError::ConstraintViolation(format!(
                    "lot '{lot}' already received for this drug"
                )));
            }
        }
        state.batches.insert(batch.id, batch.clone());
        state.adjustments.push(receipt);
        Ok(batch)
    }

    fn get_batch(&self, id: BatchId) -> StoreResult<Batch> {
        self.read()?.batch(id).cloned()
    }

    fn list_batches(&self, filter: &BatchFilter) -> StoreResult<Vec<Batch>> {
        let state = self.read()?;
        let mut out: Vec<Batch> = state.batches.values().filter(|b| filter.matches(b)).cloned().collect();
        out.sort_by_key(|b| (b.expiry_date, b.received_date, b.id));
        Ok(out)
    }

    fn adjust_batch(&self, input: NewAdjustment) -> StoreResult<StockAdjustment> {
        ensure_caller_adjustment(input.kind)?;
        let mut state = self.write()?;
        let batch = state.batch(input.batch_id)?;
        let next = batch.adjusted(input.delta)?;
        let adjustment = StockAdjustment::record(
            AdjustmentId::new(),
            batch.id,
            batch.drug_id,
            input.delta,
            input.kind,
            &input.reason,
            Utc::now(),
        )?;
        state.batches.insert(next.id, next);
        state.adjustments.push(adjustment.clone());
        Ok(adjustment)
    }

    fn remove_batch(&self, id: BatchId) -> StoreResult<()> {
        let mut state = self.write()?;
        state.batch(id)?;
        if state.sales.iter().any(|s| s.batch_id == id) {
            return Err(StoreError::ConstraintViolation(format!(
                "batch {id} has sales history and cannot be removed"
            )));
        }
        state.batches.remove(&id);
        state.adjustments.retain(|a| a.batch_id != id);
        Ok(())
    }

    fn list_adjustments(&self, filter: &AdjustmentFilter) -> StoreResult<Vec<StockAdjustment>> {
        let state = self.read()?;
        let mut out: Vec<StockAdjustment> = state
            .adjustments
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.adjusted_at.cmp(&a.adjusted_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn next_invoice_number(&self, day: NaiveDate) -> StoreResult<InvoiceNumber> {
        Ok(self.read()?.next_invoice(day))
    }

    fn record_sale(&self, order: SaleOrder) -> StoreResult<Receipt> {
        let mut state = self.write()?;

        let invoice = match &order.invoice {
            Some(invoice) if state.invoice_exists(invoice) => {
                return Err(StoreError::ConstraintViolation(format!(
                    "invoice {invoice} already exists"
                )));
            }
            Some(invoice) => invoice.clone(),
            None => state.next_invoice(order.sale_day()),
        };

        let drug_ids: BTreeSet<DrugId> = order.lines.iter().map(|l| l.drug_id).collect();
        let explicit: BTreeSet<BatchId> = order.lines.iter().filter_map(|l| l.batch_id).collect();
        let drugs: HashMap<DrugId, Drug> = drug_ids
            .iter()
            .filter_map(|id| state.drugs.get(id).map(|d| (*id, d.clone())))
            .collect();
        let batches: Vec<Batch> = state
            .batches
            .values()
            .filter(|b| drug_ids.contains(&b.drug_id) || explicit.contains(&b.id))
            .cloned()
            .collect();

        let plan = plan_sale(&order, &invoice, &drugs, &batches)?;

        for batch in plan.batches {
            state.batches.insert(batch.id, batch);
        }
        state.sales.extend(plan.sales.iter().cloned());
        Ok(Receipt::new(invoice, plan.sales))
    }

    fn get_sale(&self, id: SaleId) -> StoreResult<Sale> {
        self.read()?
            .sales
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("sale {id}")))
    }

    fn list_sales(&self, filter: &SaleFilter) -> StoreResult<Vec<Sale>> {
        let state = self.read()?;
        let mut out: Vec<Sale> = state.sales.iter().filter(|s| filter.matches(s)).cloned().collect();
        out.sort_by(|a, b| b.sold_at.cmp(&a.sold_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn void_invoice(&self, invoice: &InvoiceNumber, reason: &str) -> StoreResult<Vec<SaleReturn>> {
        let now = Utc::now();
        let mut state = self.write()?;

        let sales: Vec<Sale> = state.sales.iter().filter(|s| &s.invoice == invoice).cloned().collect();
        let returns = plan_void(invoice, &sales, &state.returns, reason, now)?;

        let mut restocked: BTreeMap<BatchId, Batch> = BTreeMap::new();
        let mut adjustments = Vec::with_capacity(returns.len());
        for ret in &returns {
            let current = match restocked.get(&ret.batch_id) {
                Some(b) => b.clone(),
                None => state.batch(ret.batch_id)?.clone(),
            };
            restocked.insert(ret.batch_id, current.adjusted(ret.quantity)?);
            adjustments.push(StockAdjustment::record(
                AdjustmentId::new(),
                ret.batch_id,
                ret.drug_id,
                ret.quantity,
                AdjustmentKind::Return,
                &format!("void {invoice}: {}", ret.reason),
                now,
            )?);
        }

        state.batches.extend(restocked);
        state.adjustments.extend(adjustments);
        state.returns.extend(returns.iter().cloned());
        Ok(returns)
    }

    fn list_returns(&self, filter: &SaleFilter) -> StoreResult<Vec<SaleReturn>> {
        let state = self.read()?;
        let mut out: Vec<SaleReturn> = state
            .returns
            .iter()
            .filter(|r| filter.matches_return(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.returned_at.cmp(&a.returned_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn stock_on_hand(&self, drug_id: DrugId) -> StoreResult<i64> {
        let state = self.read()?;
        state.drug(drug_id)?;
        Ok(state
            .batches
            .values()
            .filter(|b| b.drug_id == drug_id)
            .map(|b| b.quantity)
            .sum())
    }

    fn stock_levels(&self, as_of: NaiveDate) -> StoreResult<Vec<StockLevel>> {
        let state = self.read()?;
        let mut drugs: Vec<Drug> = state.drugs.values().cloned().collect();
        sort_drugs(&mut drugs);
        Ok(drugs
            .into_iter()
            .map(|drug| {
                let (on_hand, usable) = state
                    .batches
                    .values()
                    .filter(|b| b.drug_id == drug.id)
                    .fold((0, 0), |(all, usable), b| {
                        let fresh = if b.is_expired(as_of) { 0 } else { b.quantity };
                        (all + b.quantity, usable + fresh)
                    });
                StockLevel { drug, on_hand, usable }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use pharmacy_core::Money;
    use pharmacy_sales::SaleLine;

    fn sold_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    fn seeded() -> (InMemoryStore, Drug, Batch) {
        let store = InMemoryStore::new();
        let drug = store
            .create_drug(NewDrug {
                name: "Paracetamol 500mg".to_string(),
                category_id: None,
                unit_price: Money::from_cents(599),
                reorder_threshold: 20,
                supplier: None,
            })
            .unwrap();
        let batch = store
            .receive_batch(NewBatch {
                drug_id: drug.id,
                lot_number: Some("LOT-1".to_string()),
                quantity: 10,
                unit_cost: Money::from_cents(300),
                expiry_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
                received_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            })
            .unwrap();
        (store, drug, batch)
    }

    #[test]
    fn failed_sale_leaves_no_trace() {
        let (store, drug, batch) = seeded();
        let order = SaleOrder::new(
            vec![SaleLine::new(drug.id, 4), SaleLine::new(drug.id, 7)],
            sold_at(),
        );

        assert!(store.record_sale(order).is_err());
        assert_eq!(store.get_batch(batch.id).unwrap().quantity, 10);
        assert!(store.list_sales(&SaleFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn explicit_invoice_cannot_be_reused() {
        let (store, drug, _) = seeded();
        let invoice: InvoiceNumber = "INV-CUSTOM-1".parse().unwrap();
        let mut order = SaleOrder::new(vec![SaleLine::new(drug.id, 1)], sold_at());
        order.invoice = Some(invoice.clone());

        store.record_sale(order.clone()).unwrap();
        let err = store.record_sale(order).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn caller_cannot_forge_receipts() {
        let (store, _, batch) = seeded();
        let err = store
            .adjust_batch(NewAdjustment {
                batch_id: batch.id,
                delta: 5,
                kind: AdjustmentKind::Receipt,
                reason: "sneaky".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
