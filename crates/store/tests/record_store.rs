//! Behaviour shared by every `RecordStore` backend.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use pharmacy_catalog::{Drug, DrugStatus, DrugUpdate, NewDrug};
use pharmacy_core::{BatchId, CategoryId, Money};
use pharmacy_inventory::{AdjustmentKind, Batch, NewAdjustment, NewBatch};
use pharmacy_sales::{InvoiceNumber, SaleLine, SaleOrder};
use pharmacy_store::{
    AdjustmentFilter, BatchFilter, DrugFilter, InMemoryStore, RecordStore, SaleFilter, SqliteStore,
    StoreError,
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn new_drug(name: &str, price_cents: i64, threshold: i64) -> NewDrug {
    NewDrug {
        name: name.to_string(),
        category_id: None,
        unit_price: Money::from_cents(price_cents),
        reorder_threshold: threshold,
        supplier: None,
    }
}

fn receive(store: &impl RecordStore, drug: &Drug, qty: i64, expiry: NaiveDate) -> Batch {
    store
        .receive_batch(NewBatch {
            drug_id: drug.id,
            lot_number: None,
            quantity: qty,
            unit_cost: Money::from_cents(250),
            expiry_date: expiry,
            received_date: day(2026, 1, 10),
        })
        .unwrap()
}

fn sell(store: &impl RecordStore, drug: &Drug, qty: i64, when: DateTime<Utc>) -> Result<pharmacy_sales::Receipt, StoreError> {
    store.record_sale(SaleOrder::new(vec![SaleLine::new(drug.id, qty)], when))
}

fn round_trip_received_minus_sold(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Amoxicillin 500mg", 899, 10)).unwrap();
    receive(&store, &drug, 100, day(2026, 12, 31));

    let receipt = sell(&store, &drug, 30, at(2026, 3, 1, 9)).unwrap();

    assert_eq!(receipt.units(), 30);
    assert_eq!(receipt.total, Money::from_cents(899 * 30));
    assert_eq!(store.stock_on_hand(drug.id).unwrap(), 70);
    let sales = store.list_sales(&SaleFilter::default()).unwrap();
    assert_eq!(sales.len(), 1);
    assert_eq!(store.get_sale(sales[0].id).unwrap(), sales[0]);
}

fn oversell_leaves_state_unchanged(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Ibuprofen 200mg", 450, 10)).unwrap();
    let batch = receive(&store, &drug, 5, day(2026, 12, 31));

    let err = sell(&store, &drug, 6, at(2026, 3, 1, 9)).unwrap_err();

    assert!(matches!(err, StoreError::ConstraintViolation(_)));
    assert_eq!(store.get_batch(batch.id).unwrap().quantity, 5);
    assert!(store.list_sales(&SaleFilter::default()).unwrap().is_empty());
}

fn multi_line_sale_is_all_or_nothing(store: impl RecordStore) {
    let a = store.create_drug(new_drug("Cetirizine 10mg", 300, 5)).unwrap();
    let b = store.create_drug(new_drug("Loratadine 10mg", 350, 5)).unwrap();
    let batch_a = receive(&store, &a, 10, day(2026, 12, 31));
    receive(&store, &b, 1, day(2026, 12, 31));

    let order = SaleOrder::new(vec![SaleLine::new(a.id, 4), SaleLine::new(b.id, 2)], at(2026, 3, 1, 9));
    assert!(store.record_sale(order).is_err());
    assert_eq!(store.get_batch(batch_a.id).unwrap().quantity, 10);

    let order = SaleOrder::new(vec![SaleLine::new(a.id, 4), SaleLine::new(b.id, 1)], at(2026, 3, 1, 9));
    let receipt = store.record_sale(order).unwrap();
    assert_eq!(receipt.sales.len(), 2);
    assert!(receipt.sales.iter().all(|s| s.invoice == receipt.invoice));
    assert_eq!(receipt.total, Money::from_cents(4 * 300 + 350));
}

fn sales_draw_from_earliest_expiry_first(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Metformin 850mg", 120, 10)).unwrap();
    let late = receive(&store, &drug, 10, day(2027, 6, 30));
    let soon = receive(&store, &drug, 3, day(2026, 8, 31));
    let expired = receive(&store, &drug, 50, day(2026, 6, 30));

    let receipt = sell(&store, &drug, 5, at(2026, 7, 15, 9)).unwrap();

    assert_eq!(receipt.sales.len(), 2);
    assert_eq!(store.get_batch(soon.id).unwrap().quantity, 0);
    assert_eq!(store.get_batch(late.id).unwrap().quantity, 8);
    assert_eq!(store.get_batch(expired.id).unwrap().quantity, 50);
}

fn invoice_numbers_follow_the_sale_day(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Omeprazole 20mg", 500, 10)).unwrap();
    receive(&store, &drug, 20, day(2026, 12, 31));

    let first = sell(&store, &drug, 1, at(2026, 3, 1, 9)).unwrap();
    let second = sell(&store, &drug, 1, at(2026, 3, 1, 15)).unwrap();
    let next_day = sell(&store, &drug, 1, at(2026, 3, 2, 9)).unwrap();

    assert_eq!(first.invoice.as_str(), "INV-260301-001");
    assert_eq!(second.invoice.as_str(), "INV-260301-002");
    assert_eq!(next_day.invoice.as_str(), "INV-260302-001");
    assert_eq!(store.next_invoice_number(day(2026, 3, 1)).unwrap().as_str(), "INV-260301-003");
}

fn voiding_restocks_and_cannot_repeat(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Salbutamol Inhaler", 1250, 2)).unwrap();
    let batch = receive(&store, &drug, 8, day(2026, 12, 31));
    let receipt = sell(&store, &drug, 3, at(2026, 3, 1, 9)).unwrap();

    let returns = store.void_invoice(&receipt.invoice, "dispensing error").unwrap();

    assert_eq!(returns.len(), 1);
    assert_eq!(returns[0].quantity, 3);
    assert_eq!(store.get_batch(batch.id).unwrap().quantity, 8);
    assert_eq!(store.list_sales(&SaleFilter::default()).unwrap().len(), 1);
    let listed = store
        .list_returns(&SaleFilter::for_invoice(receipt.invoice.clone()))
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, returns[0].id);
    assert_eq!(listed[0].sale_id, receipt.sales[0].id);
    let history = store
        .list_adjustments(&AdjustmentFilter {
            batch_id: Some(batch.id),
            ..Default::default()
        })
        .unwrap();
    assert!(history.iter().any(|a| a.kind == AdjustmentKind::Return && a.delta == 3));

    let again = store.void_invoice(&receipt.invoice, "again").unwrap_err();
    assert!(matches!(again, StoreError::ConstraintViolation(_)));

    let missing: InvoiceNumber = "INV-000000-999".parse().unwrap();
    assert!(matches!(store.void_invoice(&missing, "x"), Err(StoreError::NotFound(_))));
}

fn categories_are_unique_and_protected(store: impl RecordStore) {
    let analgesics = store.create_category("Analgesics").unwrap();
    assert!(matches!(
        store.create_category("  analgesics "),
        Err(StoreError::ConstraintViolation(_))
    ));

    let mut input = new_drug("Aspirin 300mg", 199, 10);
    input.category_id = Some(analgesics.id);
    let drug = store.create_drug(input).unwrap();

    assert!(matches!(
        store.delete_category(analgesics.id),
        Err(StoreError::ConstraintViolation(_))
    ));

    let renamed = store.rename_category(analgesics.id, "Pain Relief").unwrap();
    assert_eq!(renamed.name, "Pain Relief");

    store
        .update_drug(
            drug.id,
            DrugUpdate {
                category_id: Some(None),
                ..Default::default()
            },
        )
        .unwrap();
    store.delete_category(analgesics.id).unwrap();
    assert!(store.list_categories().unwrap().is_empty());
    assert!(matches!(
        store.delete_category(CategoryId::new()),
        Err(StoreError::NotFound(_))
    ));
}

fn drug_names_are_unique_ignoring_case(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Atorvastatin 20mg", 780, 10)).unwrap();
    assert!(matches!(
        store.create_drug(new_drug("ATORVASTATIN 20MG", 780, 10)),
        Err(StoreError::ConstraintViolation(_))
    ));

    let mut input = new_drug("Losartan 50mg", 640, 10);
    input.category_id = Some(CategoryId::new());
    assert!(matches!(store.create_drug(input), Err(StoreError::NotFound(_))));

    let updated = store
        .update_drug(
            drug.id,
            DrugUpdate {
                unit_price: Some(Money::from_cents(820)),
                supplier: Some(Some("MedSupply Co".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.unit_price, Money::from_cents(820));
    assert_eq!(store.get_drug(drug.id).unwrap(), updated);
}

fn inactive_drugs_cannot_move_stock(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Ranitidine 150mg", 300, 10)).unwrap();
    receive(&store, &drug, 10, day(2026, 12, 31));
    store.deactivate_drug(drug.id).unwrap();

    assert!(matches!(
        store.receive_batch(NewBatch {
            drug_id: drug.id,
            lot_number: None,
            quantity: 5,
            unit_cost: Money::from_cents(100),
            expiry_date: day(2026, 12, 31),
            received_date: day(2026, 2, 1),
        }),
        Err(StoreError::ConstraintViolation(_))
    ));
    assert!(matches!(
        sell(&store, &drug, 1, at(2026, 3, 1, 9)),
        Err(StoreError::ConstraintViolation(_))
    ));

    assert_eq!(store.list_drugs(&DrugFilter::active()).unwrap(), vec![]);
    let reactivated = store.reactivate_drug(drug.id).unwrap();
    assert_eq!(reactivated.status, DrugStatus::Active);
    sell(&store, &drug, 1, at(2026, 3, 1, 9)).unwrap();
}

fn adjustments_cannot_go_below_zero(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Insulin Glargine", 4200, 2)).unwrap();
    let batch = receive(&store, &drug, 4, day(2026, 12, 31));

    let err = store
        .adjust_batch(NewAdjustment {
            batch_id: batch.id,
            delta: -5,
            kind: AdjustmentKind::Manual,
            reason: "stock count".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation(_)));
    assert_eq!(store.get_batch(batch.id).unwrap().quantity, 4);

    store
        .adjust_batch(NewAdjustment {
            batch_id: batch.id,
            delta: -1,
            kind: AdjustmentKind::Manual,
            reason: "damaged vial".to_string(),
        })
        .unwrap();
    let written_off = store.write_off_batch(batch.id, "cold chain failure").unwrap();
    assert_eq!(written_off.delta, -3);
    assert_eq!(store.get_batch(batch.id).unwrap().quantity, 0);
    assert!(matches!(
        store.write_off_batch(batch.id, "again"),
        Err(StoreError::Validation(_))
    ));

    let kinds: Vec<AdjustmentKind> = store
        .list_adjustments(&AdjustmentFilter {
            batch_id: Some(batch.id),
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|a| a.kind)
        .collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds.contains(&AdjustmentKind::Receipt));
    assert!(kinds.contains(&AdjustmentKind::WriteOff));
}

fn batches_with_sales_cannot_be_removed(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Diclofenac Gel", 650, 3)).unwrap();
    let sold = receive(&store, &drug, 5, day(2026, 12, 31));
    sell(&store, &drug, 1, at(2026, 3, 1, 9)).unwrap();
    let untouched = receive(&store, &drug, 5, day(2027, 12, 31));

    assert!(matches!(store.remove_batch(sold.id), Err(StoreError::ConstraintViolation(_))));
    store.remove_batch(untouched.id).unwrap();
    assert!(matches!(store.get_batch(untouched.id), Err(StoreError::NotFound(_))));
    assert!(matches!(store.remove_batch(BatchId::new()), Err(StoreError::NotFound(_))));
    assert!(
        store
            .list_adjustments(&AdjustmentFilter {
                batch_id: Some(untouched.id),
                ..Default::default()
            })
            .unwrap()
            .is_empty()
    );
}

fn lot_numbers_are_unique_per_drug(store: impl RecordStore) {
    let a = store.create_drug(new_drug("Prednisolone 5mg", 210, 5)).unwrap();
    let b = store.create_drug(new_drug("Folic Acid 5mg", 90, 5)).unwrap();
    let lot = |drug: &Drug| NewBatch {
        drug_id: drug.id,
        lot_number: Some("LOT-42".to_string()),
        quantity: 5,
        unit_cost: Money::from_cents(50),
        expiry_date: day(2026, 12, 31),
        received_date: day(2026, 1, 10),
    };

    store.receive_batch(lot(&a)).unwrap();
    store.receive_batch(lot(&b)).unwrap();
    assert!(matches!(store.receive_batch(lot(&a)), Err(StoreError::ConstraintViolation(_))));
}

fn batch_filters_apply_expiry_bounds(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Azithromycin 250mg", 1100, 5)).unwrap();
    let expired = receive(&store, &drug, 5, day(2026, 2, 28));
    let boundary = receive(&store, &drug, 5, day(2026, 3, 31));
    let later = receive(&store, &drug, 5, day(2026, 4, 1));

    let expiring = store
        .list_batches(&BatchFilter {
            expiring_on_or_before: Some(day(2026, 3, 31)),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(expiring.iter().map(|b| b.id).collect::<Vec<_>>(), vec![expired.id, boundary.id]);

    let usable = store
        .list_batches(&BatchFilter {
            usable_on: Some(day(2026, 3, 1)),
            ..BatchFilter::for_drug(drug.id)
        })
        .unwrap();
    assert_eq!(usable.iter().map(|b| b.id).collect::<Vec<_>>(), vec![boundary.id, later.id]);

    let levels = store.stock_levels(day(2026, 3, 1)).unwrap();
    assert_eq!(levels.len(), 1);
    assert_eq!((levels[0].on_hand, levels[0].usable), (15, 10));
}

fn sales_date_range_is_inclusive(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Vitamin D3 1000IU", 150, 10)).unwrap();
    receive(&store, &drug, 100, day(2026, 12, 31));
    sell(&store, &drug, 1, at(2026, 3, 1, 0)).unwrap();
    sell(&store, &drug, 2, at(2026, 3, 2, 23)).unwrap();
    sell(&store, &drug, 3, at(2026, 3, 3, 12)).unwrap();

    let sales = store
        .list_sales(&SaleFilter::between(day(2026, 3, 1), day(2026, 3, 2)))
        .unwrap();
    assert_eq!(sales.iter().map(|s| s.quantity).collect::<Vec<_>>(), vec![2, 1]);
}

fn adjustment_history_date_range_is_inclusive(store: impl RecordStore) {
    let drug = store.create_drug(new_drug("Clotrimazole Cream", 420, 2)).unwrap();
    let batch = receive(&store, &drug, 6, day(2026, 12, 31));
    store
        .adjust_batch(NewAdjustment {
            batch_id: batch.id,
            delta: -1,
            kind: AdjustmentKind::Manual,
            reason: "recount".to_string(),
        })
        .unwrap();

    let today = Utc::now().date_naive();
    let history = |from: Option<NaiveDate>, to: Option<NaiveDate>| {
        store
            .list_adjustments(&AdjustmentFilter {
                batch_id: Some(batch.id),
                from,
                to,
                ..Default::default()
            })
            .unwrap()
    };

    assert_eq!(history(Some(today), Some(today)).len(), 2);
    assert_eq!(history(None, Some(today)).len(), 2);
    assert!(history(None, today.pred_opt()).is_empty());
    assert!(history(today.succ_opt(), None).is_empty());
}

macro_rules! store_suite {
    ($name:ident, $make:expr) => {
        mod $name {
            use super::*;

            #[test]
            fn round_trip() {
                round_trip_received_minus_sold($make);
            }

            #[test]
            fn oversell() {
                oversell_leaves_state_unchanged($make);
            }

            #[test]
            fn multi_line_atomicity() {
                multi_line_sale_is_all_or_nothing($make);
            }

            #[test]
            fn fefo() {
                sales_draw_from_earliest_expiry_first($make);
            }

            #[test]
            fn invoice_numbers() {
                invoice_numbers_follow_the_sale_day($make);
            }

            #[test]
            fn void_invoice() {
                voiding_restocks_and_cannot_repeat($make);
            }

            #[test]
            fn categories() {
                categories_are_unique_and_protected($make);
            }

            #[test]
            fn drug_names() {
                drug_names_are_unique_ignoring_case($make);
            }

            #[test]
            fn inactive_drugs() {
                inactive_drugs_cannot_move_stock($make);
            }

            #[test]
            fn adjustments() {
                adjustments_cannot_go_below_zero($make);
            }

            #[test]
            fn batch_removal() {
                batches_with_sales_cannot_be_removed($make);
            }

            #[test]
            fn lot_numbers() {
                lot_numbers_are_unique_per_drug($make);
            }

            #[test]
            fn batch_filters() {
                batch_filters_apply_expiry_bounds($make);
            }

            #[test]
            fn sales_date_range() {
                sales_date_range_is_inclusive($make);
            }

            #[test]
            fn adjustment_date_range() {
                adjustment_history_date_range_is_inclusive($make);
            }
        }
    };
}

store_suite!(in_memory, InMemoryStore::new());
store_suite!(sqlite, SqliteStore::in_memory().unwrap());

#[test]
fn sqlite_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("pharmacy.db").display());

    let drug_id = {
        let store = SqliteStore::open(&url).unwrap();
        let drug = store.create_drug(new_drug("Amlodipine 5mg", 330, 10)).unwrap();
        receive(&store, &drug, 12, day(2026, 12, 31));
        sell(&store, &drug, 2, at(2026, 3, 1, 9)).unwrap();
        drug.id
    };

    let store = SqliteStore::open(&url).unwrap();
    assert_eq!(store.stock_on_hand(drug_id).unwrap(), 10);
    assert_eq!(store.list_sales(&SaleFilter::default()).unwrap().len(), 1);
}

proptest! {
    #[test]
    fn stock_is_conserved_across_random_sales(requests in prop::collection::vec(1i64..15, 1..20)) {
        let store = InMemoryStore::new();
        let drug = store.create_drug(new_drug("Paracetamol 500mg", 100, 10)).unwrap();
        receive(&store, &drug, 40, day(2026, 12, 31));
        receive(&store, &drug, 25, day(2027, 6, 30));

        let mut sold = 0;
        for qty in requests {
            if sell(&store, &drug, qty, at(2026, 3, 1, 9)).is_ok() {
                sold += qty;
            }
        }

        let batches = store.list_batches(&BatchFilter::for_drug(drug.id)).unwrap();
        prop_assert!(batches.iter().all(|b| b.quantity >= 0));
        prop_assert_eq!(store.stock_on_hand(drug.id).unwrap(), 65 - sold);
    }
}
