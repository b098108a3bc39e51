//! Sample data for trying the tool out.
//!
//! Expiry dates are relative to the seeding day so the alert list always has
//! something in it: a few batches are already past expiry, a few fall inside
//! the default 30 day window and a few drugs start below their reorder level.

use std::collections::HashMap;

use chrono::{Days, NaiveDate, NaiveTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pharmacy_catalog::NewDrug;
use pharmacy_core::{CategoryId, Money};
use pharmacy_inventory::NewBatch;
use pharmacy_sales::{SaleLine, SaleOrder};
use pharmacy_store::{DrugFilter, RecordStore, StoreError};

use crate::render::SeedSummary;

const CATEGORIES: &[&str] = &[
    "Analgesics",
    "Antibiotics",
    "Antihistamines",
    "Antihypertensives",
    "Antidiabetics",
    "Antacids & GI Drugs",
    "Cardiovascular Drugs",
    "Respiratory Drugs",
    "Vitamins & Supplements",
    "Dermatologicals",
];

struct SampleDrug {
    name: &'static str,
    category: &'static str,
    price: i64,
    cost: i64,
    reorder: i64,
    supplier: &'static str,
    /// `(quantity, days from today until expiry)` per batch.
    batches: &'static [(i64, i64)],
    /// Upper bound of units sold on a busy day.
    daily_demand: i64,
}

const DRUGS: &[SampleDrug] = &[
    SampleDrug { name: "Ibuprofen 200mg", category: "Analgesics", price: 599, cost: 350, reorder: 20, supplier: "Supplier A", batches: &[(60, 20), (120, 400)], daily_demand: 4 },
    SampleDrug { name: "Acetaminophen 500mg", category: "Analgesics", price: 499, cost: 280, reorder: 30, supplier: "Supplier B", batches: &[(200, 300)], daily_demand: 5 },
    SampleDrug { name: "Aspirin 325mg", category: "Analgesics", price: 349, cost: 200, reorder: 15, supplier: "Supplier A", batches: &[(80, 520)], daily_demand: 2 },
    SampleDrug { name: "Naproxen 250mg", category: "Analgesics", price: 649, cost: 390, reorder: 10, supplier: "Supplier C", batches: &[(12, -4), (15, 5)], daily_demand: 1 },
    SampleDrug { name: "Amoxicillin 500mg", category: "Antibiotics", price: 899, cost: 550, reorder: 10, supplier: "Supplier D", batches: &[(70, 240)], daily_demand: 2 },
    SampleDrug { name: "Azithromycin 250mg", category: "Antibiotics", price: 1099, cost: 680, reorder: 5, supplier: "Supplier E", batches: &[(40, 12)], daily_demand: 1 },
    SampleDrug { name: "Ciprofloxacin 500mg", category: "Antibiotics", price: 1249, cost: 750, reorder: 10, supplier: "Supplier D", batches: &[(30, 330)], daily_demand: 1 },
    SampleDrug { name: "Cetirizine 10mg", category: "Antihistamines", price: 649, cost: 380, reorder: 15, supplier: "Supplier F", batches: &[(110, 180)], daily_demand: 3 },
    SampleDrug { name: "Loratadine 10mg", category: "Antihistamines", price: 599, cost: 350, reorder: 20, supplier: "Supplier F", batches: &[(120, 500)], daily_demand: 2 },
    SampleDrug { name: "Lisinopril 10mg", category: "Antihypertensives", price: 699, cost: 420, reorder: 20, supplier: "Supplier H", batches: &[(140, 270)], daily_demand: 3 },
    SampleDrug { name: "Amlodipine 5mg", category: "Antihypertensives", price: 849, cost: 510, reorder: 20, supplier: "Supplier H", batches: &[(100, 460)], daily_demand: 2 },
    SampleDrug { name: "Metformin 500mg", category: "Antidiabetics", price: 799, cost: 480, reorder: 20, supplier: "Supplier J", batches: &[(160, 480)], daily_demand: 3 },
    SampleDrug { name: "Insulin Glargine 100U/mL", category: "Antidiabetics", price: 4999, cost: 3000, reorder: 5, supplier: "Supplier K", batches: &[(8, 25)], daily_demand: 1 },
    SampleDrug { name: "Omeprazole 20mg", category: "Antacids & GI Drugs", price: 899, cost: 540, reorder: 15, supplier: "Supplier Q", batches: &[(90, 450)], daily_demand: 2 },
    SampleDrug { name: "Loperamide 2mg", category: "Antacids & GI Drugs", price: 499, cost: 300, reorder: 20, supplier: "Supplier Q", batches: &[(25, -10), (30, 200)], daily_demand: 1 },
    SampleDrug { name: "Atenolol 50mg", category: "Cardiovascular Drugs", price: 799, cost: 480, reorder: 15, supplier: "Supplier R", batches: &[(90, 540)], daily_demand: 2 },
    SampleDrug { name: "Simvastatin 20mg", category: "Cardiovascular Drugs", price: 899, cost: 540, reorder: 10, supplier: "Supplier R", batches: &[(70, 380)], daily_demand: 2 },
    SampleDrug { name: "Albuterol Inhaler 90mcg", category: "Respiratory Drugs", price: 2499, cost: 1500, reorder: 5, supplier: "Supplier T", batches: &[(6, 150)], daily_demand: 1 },
    SampleDrug { name: "Montelukast 10mg", category: "Respiratory Drugs", price: 999, cost: 600, reorder: 10, supplier: "Supplier T", batches: &[(60, 510)], daily_demand: 1 },
    SampleDrug { name: "Vitamin C 1000mg", category: "Vitamins & Supplements", price: 499, cost: 290, reorder: 30, supplier: "Supplier U", batches: &[(260, 620)], daily_demand: 5 },
    SampleDrug { name: "Vitamin D3 2000IU", category: "Vitamins & Supplements", price: 549, cost: 320, reorder: 25, supplier: "Supplier U", batches: &[(220, 580)], daily_demand: 4 },
    SampleDrug { name: "Hydrocortisone Cream 1%", category: "Dermatologicals", price: 699, cost: 420, reorder: 10, supplier: "Supplier AA", batches: &[(45, 28)], daily_demand: 1 },
];

/// Load the sample catalog, stock and `history_days` of sales ending
/// yesterday. Does nothing when the store already has drugs.
pub fn seed(store: &dyn RecordStore, today: NaiveDate, history_days: u32, rng_seed: u64) -> anyhow::Result<SeedSummary> {
    if !store.list_drugs(&DrugFilter::default())?.is_empty() {
        return Ok(SeedSummary {
            skipped: true,
            ..Default::default()
        });
    }
    let mut summary = SeedSummary::default();

    let mut categories: HashMap<&str, CategoryId> = HashMap::new();
    for &name in CATEGORIES {
        let category = store.create_category(name)?;
        categories.insert(name, category.id);
        summary.categories += 1;
    }

    let received = offset(today, -(i64::from(history_days) + 1))?;
    let mut stocked = Vec::with_capacity(DRUGS.len());
    for sample in DRUGS {
        let drug = store.create_drug(NewDrug {
            name: sample.name.to_string(),
            category_id: categories.get(sample.category).copied(),
            unit_price: Money::from_cents(sample.price),
            reorder_threshold: sample.reorder,
            supplier: Some(sample.supplier.to_string()),
        })?;
        summary.drugs += 1;

        for (lot, &(quantity, expires_in)) in sample.batches.iter().enumerate() {
            let expiry_date = offset(today, expires_in)?.max(received);
            store.receive_batch(NewBatch {
                drug_id: drug.id,
                lot_number: Some(format!("L{}-{:02}", received.format("%y%m"), lot + 1)),
                quantity,
                unit_cost: Money::from_cents(sample.cost),
                expiry_date,
                received_date: received,
            })?;
            summary.batches += 1;
        }
        stocked.push((drug, sample.daily_demand));
    }

    let mut rng = StdRng::seed_from_u64(rng_seed);
    for days_ago in (1..=i64::from(history_days)).rev() {
        let day = offset(today, -days_ago)?;
        let mut lines = Vec::new();
        for (drug, demand) in &stocked {
            if rng.gen_bool(0.35) {
                lines.push(SaleLine::new(drug.id, rng.gen_range(1..=*demand)));
            }
        }
        if lines.is_empty() {
            continue;
        }

        let minutes = rng.gen_range(9 * 60..19 * 60);
        let time = NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or(NaiveTime::MIN);
        let order = SaleOrder::new(lines, day.and_time(time).and_utc());
        match store.record_sale(order) {
            Ok(_) => summary.invoices += 1,
            // Stock ran out for one of the lines; the history just has a gap.
            Err(StoreError::ConstraintViolation(reason)) => {
                tracing::debug!(%day, %reason, "skipped sample sale");
            }
            Err(err) => return Err(err.into()),
        }
    }

    tracing::info!(
        categories = summary.categories,
        drugs = summary.drugs,
        invoices = summary.invoices,
        "sample data loaded"
    );
    Ok(summary)
}

fn offset(day: NaiveDate, days: i64) -> anyhow::Result<NaiveDate> {
    let shifted = if days >= 0 {
        day.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        day.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.ok_or_else(|| anyhow::anyhow!("date {day} shifted by {days} days is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmacy_store::InMemoryStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn seeds_once() {
        let store = InMemoryStore::new();
        let first = seed(&store, today(), 14, 7).unwrap();
        assert!(!first.skipped);
        assert_eq!(first.drugs, DRUGS.len());
        assert_eq!(first.categories, CATEGORIES.len());

        let second = seed(&store, today(), 14, 7).unwrap();
        assert!(second.skipped);
        assert_eq!(store.list_drugs(&DrugFilter::default()).unwrap().len(), DRUGS.len());
    }

    #[test]
    fn same_seed_same_history() {
        let a = InMemoryStore::new();
        let b = InMemoryStore::new();
        let sa = seed(&a, today(), 30, 11).unwrap();
        let sb = seed(&b, today(), 30, 11).unwrap();
        assert_eq!(sa.invoices, sb.invoices);
        assert!(sa.invoices > 0);
    }

    #[test]
    fn history_ends_yesterday() {
        let store = InMemoryStore::new();
        seed(&store, today(), 10, 3).unwrap();
        let sales = store.list_sales(&pharmacy_store::SaleFilter::default()).unwrap();
        assert!(sales.iter().all(|s| s.sold_on() < today()));
    }
}
