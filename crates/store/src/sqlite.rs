//! SQLite-backed record store.
//!
//! sqlx is async; the store exposes the synchronous `RecordStore` API by
//! driving a private current-thread runtime with `block_on`. The pool holds a
//! single connection so in-memory databases survive for the store's lifetime
//! and every transaction is serialized.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tokio::runtime::Runtime;

use pharmacy_catalog::{Category, Drug, DrugUpdate, NewDrug, name_key};
use pharmacy_core::{AdjustmentId, BatchId, CategoryId, DrugId, Money, SaleId};
use pharmacy_inventory::{AdjustmentKind, Batch, NewAdjustment, NewBatch, StockAdjustment};
use pharmacy_sales::{InvoiceNumber, Receipt, Sale, SaleOrder, SaleReturn, plan_sale, plan_void};

use crate::error::{StoreError, StoreResult};
use crate::query::{AdjustmentFilter, BatchFilter, DrugFilter, SaleFilter, StockLevel};
use crate::record_store::{RecordStore, ensure_caller_adjustment};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id       TEXT PRIMARY KEY,
        name     TEXT NOT NULL,
        name_key TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS drugs (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL,
        name_key          TEXT NOT NULL UNIQUE,
        category_id       TEXT NULL REFERENCES categories(id),
        unit_price_cents  INTEGER NOT NULL CHECK (unit_price_cents >= 0),
        reorder_threshold INTEGER NOT NULL CHECK (reorder_threshold >= 0),
        supplier          TEXT NULL,
        status            TEXT NOT NULL CHECK (status IN ('active', 'inactive')),
        created_at        TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS batches (
        id              TEXT PRIMARY KEY,
        drug_id         TEXT NOT NULL REFERENCES drugs(id),
        lot_number      TEXT NULL,
        quantity        INTEGER NOT NULL CHECK (quantity >= 0),
        unit_cost_cents INTEGER NOT NULL CHECK (unit_cost_cents >= 0),
        expiry_date     TEXT NOT NULL,
        received_date   TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        UNIQUE (drug_id, lot_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_adjustments (
        id          TEXT PRIMARY KEY,
        batch_id    TEXT NOT NULL REFERENCES batches(id),
        drug_id     TEXT NOT NULL REFERENCES drugs(id),
        delta       INTEGER NOT NULL CHECK (delta <> 0),
        kind        TEXT NOT NULL,
        reason      TEXT NOT NULL,
        adjusted_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sales (
        id               TEXT PRIMARY KEY,
        invoice          TEXT NOT NULL,
        drug_id          TEXT NOT NULL REFERENCES drugs(id),
        batch_id         TEXT NOT NULL REFERENCES batches(id),
        quantity         INTEGER NOT NULL CHECK (quantity > 0),
        unit_price_cents INTEGER NOT NULL,
        unit_cost_cents  INTEGER NOT NULL,
        discount_cents   INTEGER NOT NULL DEFAULT 0,
        total_cents      INTEGER NOT NULL CHECK (total_cents >= 0),
        sold_by          TEXT NULL,
        sold_at          TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sale_returns (
        id          TEXT PRIMARY KEY,
        sale_id     TEXT NOT NULL UNIQUE REFERENCES sales(id),
        invoice     TEXT NOT NULL,
        drug_id     TEXT NOT NULL REFERENCES drugs(id),
        batch_id    TEXT NOT NULL REFERENCES batches(id),
        quantity    INTEGER NOT NULL CHECK (quantity > 0),
        reason      TEXT NOT NULL,
        returned_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS sales_no_update BEFORE UPDATE ON sales
    BEGIN
        SELECT RAISE(ABORT, 'sales ledger is append-only');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS sales_no_delete BEFORE DELETE ON sales
    BEGIN
        SELECT RAISE(ABORT, 'sales ledger is append-only');
    END
    "#,
    "CREATE INDEX IF NOT EXISTS idx_batches_drug ON batches (drug_id)",
    "CREATE INDEX IF NOT EXISTS idx_batches_expiry ON batches (expiry_date)",
    "CREATE INDEX IF NOT EXISTS idx_adjustments_batch ON stock_adjustments (batch_id)",
    "CREATE INDEX IF NOT EXISTS idx_sales_invoice ON sales (invoice)",
    "CREATE INDEX IF NOT EXISTS idx_sales_sold_at ON sales (sold_at)",
    "CREATE INDEX IF NOT EXISTS idx_sales_drug ON sales (drug_id)",
];

const DRUG_COLUMNS: &str =
    "id, name, category_id, unit_price_cents, reorder_threshold, supplier, status, created_at";
const BATCH_COLUMNS: &str =
    "id, drug_id, lot_number, quantity, unit_cost_cents, expiry_date, received_date, created_at";
const ADJUSTMENT_COLUMNS: &str = "id, batch_id, drug_id, delta, kind, reason, adjusted_at";
const SALE_COLUMNS: &str = "id, invoice, drug_id, batch_id, quantity, unit_price_cents, \
     unit_cost_cents, discount_cents, total_cents, sold_by, sold_at";
const RETURN_COLUMNS: &str = "id, sale_id, invoice, drug_id, batch_id, quantity, reason, returned_at";

/// Record store persisted in a SQLite database file (or `sqlite::memory:`).
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    runtime: Runtime,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the schema.
    ///
    /// Accepts sqlx URLs (`sqlite://pharmacy.db`, `sqlite::memory:`) as well
    /// as bare file paths.
    pub fn open(url: &str) -> StoreResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Backend(format!("failed to start sqlite runtime: {e}")))?;

        let options = if url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(url).map_err(map_sqlx)?
        } else {
            SqliteConnectOptions::new().filename(url)
        }
        .create_if_missing(true)
        .foreign_keys(true);

        let pool = runtime
            .block_on(
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options),
            )
            .map_err(map_sqlx)?;

        let store = Self { pool, runtime };
        store.migrate()?;
        tracing::debug!(url, "sqlite record store ready");
        Ok(store)
    }

    /// Private in-memory database, gone when the store is dropped.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open("sqlite::memory:")
    }

    fn block_on<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        self.runtime.block_on(fut)
    }

    fn migrate(&self) -> StoreResult<()> {
        self.block_on(async {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            for statement in SCHEMA.iter().copied() {
                sqlx::query(statement).execute(&mut *conn).await.map_err(map_sqlx)?;
            }
            Ok(())
        })
    }

    fn update_drug_with(
        &self,
        id: DrugId,
        change: impl FnOnce(&Drug) -> StoreResult<Drug>,
    ) -> StoreResult<Drug> {
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            let current = fetch_drug(&mut tx, id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("drug {id}")))?;
            let next = change(&current)?;
            ensure_category(&mut tx, next.category_id).await?;
            ensure_unique_drug_name(&mut tx, &next).await?;

            sqlx::query(
                r#"
                UPDATE drugs
                SET name = ?2, name_key = ?3, category_id = ?4, unit_price_cents = ?5,
                    reorder_threshold = ?6, supplier = ?7, status = ?8
                WHERE id = ?1
                "#,
            )
            .bind(next.id.to_string())
            .bind(&next.name)
            .bind(next.name_key())
            .bind(next.category_id.map(|c| c.to_string()))
            .bind(next.unit_price.cents())
            .bind(next.reorder_threshold)
            .bind(&next.supplier)
            .bind(next.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

            tx.commit().await.map_err(map_sqlx)?;
            Ok(next)
        })
    }
}

impl RecordStore for SqliteStore {
    fn create_category(&self, name: &str) -> StoreResult<Category> {
        let category = Category::create(CategoryId::new(), name)?;
        self.block_on(async {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            ensure_unique_category_name(&mut conn, &category).await?;
            sqlx::query("INSERT INTO categories (id, name, name_key) VALUES (?1, ?2, ?3)")
                .bind(category.id.to_string())
                .bind(&category.name)
                .bind(name_key(&category.name))
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx)?;
            Ok(category)
        })
    }

    fn list_categories(&self) -> StoreResult<Vec<Category>> {
        self.block_on(async {
            let rows = sqlx::query("SELECT id, name FROM categories ORDER BY name_key, id")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?;
            rows.iter().map(category_from_row).collect()
        })
    }

    fn rename_category(&self, id: CategoryId, name: &str) -> StoreResult<Category> {
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            let current = fetch_category(&mut tx, id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("category {id}")))?;
            let next = current.renamed(name)?;
            ensure_unique_category_name(&mut tx, &next).await?;
            sqlx::query("UPDATE categories SET name = ?2, name_key = ?3 WHERE id = ?1")
                .bind(id.to_string())
                .bind(&next.name)
                .bind(name_key(&next.name))
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            tx.commit().await.map_err(map_sqlx)?;
            Ok(next)
        })
    }

    fn delete_category(&self, id: CategoryId) -> StoreResult<()> {
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            if fetch_category(&mut tx, id).await?.is_none() {
                return Err(StoreError::NotFound(format!("category {id}")));
            }
            let in_use: i64 = sqlx::query("SELECT COUNT(*) AS n FROM drugs WHERE category_id = ?1")
                .bind(id.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx)
                .and_then(|row| col(&row, "n"))?;
            if in_use > 0 {
                return Err(StoreError::ConstraintViolation(format!(
                    "category is used by {in_use} drug(s)"
                )));
            }
            sqlx::query("DELETE FROM categories WHERE id = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            tx.commit().await.map_err(map_sqlx)?;
            Ok(())
        })
    }

    fn create_drug(&self, input: NewDrug) -> StoreResult<Drug> {
        let drug = Drug::create(DrugId::new(), input, Utc::now())?;
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            ensure_category(&mut tx, drug.category_id).await?;
            ensure_unique_drug_name(&mut tx, &drug).await?;
            sqlx::query(
                r#"
                INSERT INTO drugs
                    (id, name, name_key, category_id, unit_price_cents, reorder_threshold,
                     supplier, status, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(drug.id.to_string())
            .bind(&drug.name)
            .bind(drug.name_key())
            .bind(drug.category_id.map(|c| c.to_string()))
            .bind(drug.unit_price.cents())
            .bind(drug.reorder_threshold)
            .bind(&drug.supplier)
            .bind(drug.status.as_str())
            .bind(timestamp(drug.created_at))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            tx.commit().await.map_err(map_sqlx)?;
            Ok(drug)
        })
    }

    fn get_drug(&self, id: DrugId) -> StoreResult<Drug> {
        self.block_on(async {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            fetch_drug(&mut conn, id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("drug {id}")))
        })
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
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {DRUG_COLUMNS} FROM drugs WHERE 1 = 1"));
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(category_id) = filter.category_id {
            qb.push(" AND category_id = ").push_bind(category_id.to_string());
        }
        if let Some(needle) = &filter.name_contains {
            qb.push(" AND instr(name_key, ")
                .push_bind(needle.trim().to_lowercase())
                .push(") > 0");
        }
        qb.push(" ORDER BY name_key, id");

        self.block_on(async {
            let rows = qb.build().fetch_all(&self.pool).await.map_err(map_sqlx)?;
            rows.iter().map(drug_from_row).collect()
        })
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

        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            let drug = fetch_drug(&mut tx, batch.drug_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("drug {}", batch.drug_id)))?;
            drug.ensure_active()?;

            if let Some(lot) = &batch.lot_number {
                let duplicate = sqlx::query("SELECT 1 FROM batches WHERE drug_id = ?1 AND lot_number = ?2")
                    .bind(batch.drug_id.to_string())
                    .bind(lot)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                if duplicate.is_some() {
                    return Err(StoreError::ConstraintViolation(format!(
                        "lot '{lot}' already received for this drug"
                    )));
                }
            }

            sqlx::query(
                r#"
                INSERT INTO batches
                    (id, drug_id, lot_number, quantity, unit_cost_cents, expiry_date,
                     received_date, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(batch.id.to_string())
            .bind(batch.drug_id.to_string())
            .bind(&batch.lot_number)
            .bind(batch.quantity)
            .bind(batch.unit_cost.cents())
            .bind(date(batch.expiry_date))
            .bind(date(batch.received_date))
            .bind(timestamp(batch.created_at))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            insert_adjustment(&mut tx, &receipt).await?;

            tx.commit().await.map_err(map_sqlx)?;
            Ok(batch)
        })
    }

    fn get_batch(&self, id: BatchId) -> StoreResult<Batch> {
        self.block_on(async {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            fetch_batch(&mut conn, id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("batch {id}")))
        })
    }

    fn list_batches(&self, filter: &BatchFilter) -> StoreResult<Vec<Batch>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {BATCH_COLUMNS} FROM batches WHERE 1 = 1"));
        if let Some(drug_id) = filter.drug_id {
            qb.push(" AND drug_id = ").push_bind(drug_id.to_string());
        }
        if let Some(limit) = filter.expiring_on_or_before {
            qb.push(" AND expiry_date <= ").push_bind(date(limit));
        }
        if let Some(day) = filter.usable_on {
            qb.push(" AND expiry_date >= ").push_bind(date(day));
        }
        if filter.in_stock_only {
            qb.push(" AND quantity > 0");
        }
        qb.push(" ORDER BY expiry_date, received_date, id");

        self.block_on(async {
            let rows = qb.build().fetch_all(&self.pool).await.map_err(map_sqlx)?;
            rows.iter().map(batch_from_row).collect()
        })
    }

    fn adjust_batch(&self, input: NewAdjustment) -> StoreResult<StockAdjustment> {
        ensure_caller_adjustment(input.kind)?;
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            let batch = fetch_batch(&mut tx, input.batch_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("batch {}", input.batch_id)))?;
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

            set_batch_quantity(&mut tx, &next).await?;
            insert_adjustment(&mut tx, &adjustment).await?;
            tx.commit().await.map_err(map_sqlx)?;
            Ok(adjustment)
        })
    }

    fn remove_batch(&self, id: BatchId) -> StoreResult<()> {
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
            if fetch_batch(&mut tx, id).await?.is_none() {
                return Err(StoreError::NotFound(format!("batch {id}")));
            }
            let sold: i64 = sqlx::query("SELECT COUNT(*) AS n FROM sales WHERE batch_id = ?1")
                .bind(id.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx)
                .and_then(|row| col(&row, "n"))?;
            if sold > 0 {
                return Err(StoreError::ConstraintViolation(format!(
                    "batch {id} has sales history and cannot be removed"
                )));
            }
            sqlx::query("DELETE FROM stock_adjustments WHERE batch_id = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            sqlx::query("DELETE FROM batches WHERE id = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            tx.commit().await.map_err(map_sqlx)?;
            Ok(())
        })
    }

    fn list_adjustments(&self, filter: &AdjustmentFilter) -> StoreResult<Vec<StockAdjustment>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ADJUSTMENT_COLUMNS} FROM stock_adjustments WHERE 1 = 1"
        ));
        if let Some(batch_id) = filter.batch_id {
            qb.push(" AND batch_id = ").push_bind(batch_id.to_string());
        }
        if let Some(drug_id) = filter.drug_id {
            qb.push(" AND drug_id = ").push_bind(drug_id.to_string());
        }
        push_day_range(&mut qb, filter.from, filter.to, "adjusted_at");
        qb.push(" ORDER BY adjusted_at DESC, id DESC");

        self.block_on(async {
            let rows = qb.build().fetch_all(&self.pool).await.map_err(map_sqlx)?;
            rows.iter().map(adjustment_from_row).collect()
        })
    }

    fn next_invoice_number(&self, day: NaiveDate) -> StoreResult<InvoiceNumber> {
        self.block_on(async {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            next_invoice(&mut conn, day).await
        })
    }

    fn record_sale(&self, order: SaleOrder) -> StoreResult<Receipt> {
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

            let invoice = match &order.invoice {
                Some(invoice) => {
                    if invoice_exists(&mut tx, invoice).await? {
                        return Err(StoreError::ConstraintViolation(format!(
                            "invoice {invoice} already exists"
                        )));
                    }
                    invoice.clone()
                }
                None => next_invoice(&mut tx, order.sale_day()).await?,
            };

            let drug_ids: BTreeSet<DrugId> = order.lines.iter().map(|l| l.drug_id).collect();
            let mut drugs = HashMap::new();
            let mut batches = Vec::new();
            for id in &drug_ids {
                if let Some(drug) = fetch_drug(&mut tx, *id).await? {
                    drugs.insert(*id, drug);
                }
                batches.extend(batches_for_drug(&mut tx, *id).await?);
            }
            for batch_id in order.lines.iter().filter_map(|l| l.batch_id) {
                if batches.iter().any(|b: &Batch| b.id == batch_id) {
                    continue;
                }
                if let Some(batch) = fetch_batch(&mut tx, batch_id).await? {
                    batches.push(batch);
                }
            }

            let plan = plan_sale(&order, &invoice, &drugs, &batches)?;

            for batch in &plan.batches {
                set_batch_quantity(&mut tx, batch).await?;
            }
            for sale in &plan.sales {
                insert_sale(&mut tx, sale).await?;
            }
            tx.commit().await.map_err(map_sqlx)?;

            tracing::info!(invoice = %invoice, lines = plan.sales.len(), "sale recorded");
            Ok(Receipt::new(invoice, plan.sales))
        })
    }

    fn get_sale(&self, id: SaleId) -> StoreResult<Sale> {
        self.block_on(async {
            let row = sqlx::query(&format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
            match row {
                Some(row) => sale_from_row(&row),
                None => Err(StoreError::NotFound(format!("sale {id}"))),
            }
        })
    }

    fn list_sales(&self, filter: &SaleFilter) -> StoreResult<Vec<Sale>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {SALE_COLUMNS} FROM sales WHERE 1 = 1"));
        push_ledger_filter(&mut qb, filter, "sold_at");
        qb.push(" ORDER BY sold_at DESC, id DESC");

        self.block_on(async {
            let rows = qb.build().fetch_all(&self.pool).await.map_err(map_sqlx)?;
            rows.iter().map(sale_from_row).collect()
        })
    }

    fn void_invoice(&self, invoice: &InvoiceNumber, reason: &str) -> StoreResult<Vec<SaleReturn>> {
        let now = Utc::now();
        self.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

            let rows = sqlx::query(&format!("SELECT {SALE_COLUMNS} FROM sales WHERE invoice = ?1"))
                .bind(invoice.as_str())
                .fetch_all(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            let sales = rows.iter().map(sale_from_row).collect::<StoreResult<Vec<_>>>()?;

            let rows = sqlx::query(&format!("SELECT {RETURN_COLUMNS} FROM sale_returns WHERE invoice = ?1"))
                .bind(invoice.as_str())
                .fetch_all(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            let existing = rows.iter().map(return_from_row).collect::<StoreResult<Vec<_>>>()?;

            let returns = plan_void(invoice, &sales, &existing, reason, now)?;

            for ret in &returns {
                let batch = fetch_batch(&mut tx, ret.batch_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("batch {}", ret.batch_id)))?;
                let restocked = batch.adjusted(ret.quantity)?;
                let adjustment = StockAdjustment::record(
                    AdjustmentId::new(),
                    ret.batch_id,
                    ret.drug_id,
                    ret.quantity,
                    AdjustmentKind::Return,
                    &format!("void {invoice}: {}", ret.reason),
                    now,
                )?;
                set_batch_quantity(&mut tx, &restocked).await?;
                insert_adjustment(&mut tx, &adjustment).await?;
                insert_return(&mut tx, ret).await?;
            }

            tx.commit().await.map_err(map_sqlx)?;
            tracing::info!(invoice = %invoice, lines = returns.len(), "invoice voided");
            Ok(returns)
        })
    }

    fn list_returns(&self, filter: &SaleFilter) -> StoreResult<Vec<SaleReturn>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RETURN_COLUMNS} FROM sale_returns WHERE 1 = 1"
        ));
        push_ledger_filter(&mut qb, filter, "returned_at");
        qb.push(" ORDER BY returned_at DESC, id DESC");

        self.block_on(async {
            let rows = qb.build().fetch_all(&self.pool).await.map_err(map_sqlx)?;
            rows.iter().map(return_from_row).collect()
        })
    }

    fn stock_on_hand(&self, drug_id: DrugId) -> StoreResult<i64> {
        self.block_on(async {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            if fetch_drug(&mut conn, drug_id).await?.is_none() {
                return Err(StoreError::NotFound(format!("drug {drug_id}")));
            }
            let row = sqlx::query("SELECT COALESCE(SUM(quantity), 0) AS on_hand FROM batches WHERE drug_id = ?1")
                .bind(drug_id.to_string())
                .fetch_one(&mut *conn)
                .await
                .map_err(map_sqlx)?;
            col(&row, "on_hand")
        })
    }

    fn stock_levels(&self, as_of: NaiveDate) -> StoreResult<Vec<StockLevel>> {
        self.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT d.*,
                       COALESCE(SUM(b.quantity), 0) AS on_hand,
                       COALESCE(SUM(CASE WHEN b.expiry_date >= ?1 THEN b.quantity ELSE 0 END), 0) AS usable
                FROM drugs d
                LEFT JOIN batches b ON b.drug_id = d.id
                GROUP BY d.id
                ORDER BY d.name_key, d.id
                "#,
            )
            .bind(date(as_of))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

            rows.iter()
                .map(|row| {
                    Ok(StockLevel {
                        drug: drug_from_row(row)?,
                        on_hand: col(row, "on_hand")?,
                        usable: col(row, "usable")?,
                    })
                })
                .collect()
        })
    }
}

// Connection-level helpers shared by pooled reads and transactions.

async fn fetch_category(conn: &mut SqliteConnection, id: CategoryId) -> StoreResult<Option<Category>> {
    let row = sqlx::query("SELECT id, name FROM categories WHERE id = ?1")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    row.as_ref().map(category_from_row).transpose()
}

async fn ensure_category(conn: &mut SqliteConnection, id: Option<CategoryId>) -> StoreResult<()> {
    match id {
        Some(id) if fetch_category(conn, id).await?.is_none() => {
            Err(StoreError::NotFound(format!("category {id}")))
        }
        _ => Ok(()),
    }
}

async fn ensure_unique_category_name(conn: &mut SqliteConnection, category: &Category) -> StoreResult<()> {
    let clash = sqlx::query("SELECT 1 FROM categories WHERE name_key = ?1 AND id <> ?2")
        .bind(name_key(&category.name))
        .bind(category.id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    match clash {
        Some(_) => Err(StoreError::ConstraintViolation(format!(
            "category '{}' already exists",
            category.name
        ))),
        None => Ok(()),
    }
}

async fn ensure_unique_drug_name(conn: &mut SqliteConnection, drug: &Drug) -> StoreResult<()> {
    let clash = sqlx::query("SELECT 1 FROM drugs WHERE name_key = ?1 AND id <> ?2")
        .bind(drug.name_key())
        .bind(drug.id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    match clash {
        Some(_) => Err(StoreError::ConstraintViolation(format!(
            "a drug named '{}' already exists",
            drug.name
        ))),
        None => Ok(()),
    }
}

async fn fetch_drug(conn: &mut SqliteConnection, id: DrugId) -> StoreResult<Option<Drug>> {
    let row = sqlx::query(&format!("SELECT {DRUG_COLUMNS} FROM drugs WHERE id = ?1"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    row.as_ref().map(drug_from_row).transpose()
}

async fn fetch_batch(conn: &mut SqliteConnection, id: BatchId) -> StoreResult<Option<Batch>> {
    let row = sqlx::query(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    row.as_ref().map(batch_from_row).transpose()
}

async fn batches_for_drug(conn: &mut SqliteConnection, drug_id: DrugId) -> StoreResult<Vec<Batch>> {
    let rows = sqlx::query(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE drug_id = ?1"))
        .bind(drug_id.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    rows.iter().map(batch_from_row).collect()
}

async fn set_batch_quantity(conn: &mut SqliteConnection, batch: &Batch) -> StoreResult<()> {
    sqlx::query("UPDATE batches SET quantity = ?2 WHERE id = ?1")
        .bind(batch.id.to_string())
        .bind(batch.quantity)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

async fn insert_adjustment(conn: &mut SqliteConnection, adj: &StockAdjustment) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_adjustments (id, batch_id, drug_id, delta, kind, reason, adjusted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(adj.id.to_string())
    .bind(adj.batch_id.to_string())
    .bind(adj.drug_id.to_string())
    .bind(adj.delta)
    .bind(adj.kind.as_str())
    .bind(&adj.reason)
    .bind(timestamp(adj.adjusted_at))
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

async fn insert_sale(conn: &mut SqliteConnection, sale: &Sale) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sales
            (id, invoice, drug_id, batch_id, quantity, unit_price_cents, unit_cost_cents,
             discount_cents, total_cents, sold_by, sold_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(sale.id.to_string())
    .bind(sale.invoice.as_str())
    .bind(sale.drug_id.to_string())
    .bind(sale.batch_id.to_string())
    .bind(sale.quantity)
    .bind(sale.unit_price.cents())
    .bind(sale.unit_cost.cents())
    .bind(sale.discount.cents())
    .bind(sale.total.cents())
    .bind(&sale.sold_by)
    .bind(timestamp(sale.sold_at))
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

async fn insert_return(conn: &mut SqliteConnection, ret: &SaleReturn) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sale_returns
            (id, sale_id, invoice, drug_id, batch_id, quantity, reason, returned_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(ret.id.to_string())
    .bind(ret.sale_id.to_string())
    .bind(ret.invoice.as_str())
    .bind(ret.drug_id.to_string())
    .bind(ret.batch_id.to_string())
    .bind(ret.quantity)
    .bind(&ret.reason)
    .bind(timestamp(ret.returned_at))
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

async fn invoice_exists(conn: &mut SqliteConnection, invoice: &InvoiceNumber) -> StoreResult<bool> {
    let row = sqlx::query("SELECT 1 FROM sales WHERE invoice = ?1 LIMIT 1")
        .bind(invoice.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    Ok(row.is_some())
}

async fn next_invoice(conn: &mut SqliteConnection, day: NaiveDate) -> StoreResult<InvoiceNumber> {
    let prefix = InvoiceNumber::day_prefix(day);
    let issued: i64 = sqlx::query("SELECT COUNT(DISTINCT invoice) AS n FROM sales WHERE substr(invoice, 1, ?2) = ?1")
        .bind(&prefix)
        .bind(prefix.len() as i64)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx)
        .and_then(|row| col(&row, "n"))?;

    let mut seq = issued as u32 + 1;
    loop {
        let candidate = InvoiceNumber::for_day(day, seq);
        if !invoice_exists(conn, &candidate).await? {
            return Ok(candidate);
        }
        seq += 1;
    }
}

fn push_ledger_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &SaleFilter, at_column: &str) {
    if let Some(drug_id) = filter.drug_id {
        qb.push(" AND drug_id = ").push_bind(drug_id.to_string());
    }
    if let Some(invoice) = &filter.invoice {
        qb.push(" AND invoice = ").push_bind(invoice.as_str().to_string());
    }
    push_day_range(qb, filter.from, filter.to, at_column);
}

/// Inclusive calendar-day bounds on an RFC 3339 timestamp column.
fn push_day_range(
    qb: &mut QueryBuilder<'_, Sqlite>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    at_column: &str,
) {
    if let Some(from) = from {
        qb.push(format!(" AND {at_column} >= ")).push_bind(start_of(from));
    }
    if let Some(next_day) = to.and_then(|to| to.succ_opt()) {
        qb.push(format!(" AND {at_column} < ")).push_bind(start_of(next_day));
    }
}

// Row mapping.

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(map_sqlx)
}

fn parse<T>(value: &str, what: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Backend(format!("invalid {what} '{value}' in database: {e}")))
}

fn parse_date(value: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| StoreError::Backend(format!("invalid date '{value}' in database: {e}")))
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid timestamp '{value}' in database: {e}")))
}

fn date(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn start_of(day: NaiveDate) -> String {
    timestamp(day.and_time(NaiveTime::MIN).and_utc())
}

fn category_from_row(row: &SqliteRow) -> StoreResult<Category> {
    let id: String = col(row, "id")?;
    Ok(Category {
        id: parse(&id, "category id")?,
        name: col(row, "name")?,
    })
}

fn drug_from_row(row: &SqliteRow) -> StoreResult<Drug> {
    let id: String = col(row, "id")?;
    let category_id: Option<String> = col(row, "category_id")?;
    let status: String = col(row, "status")?;
    let created_at: String = col(row, "created_at")?;
    Ok(Drug {
        id: parse(&id, "drug id")?,
        name: col(row, "name")?,
        category_id: category_id
            .as_deref()
            .map(|v| parse(v, "category id"))
            .transpose()?,
        unit_price: Money::from_cents(col(row, "unit_price_cents")?),
        reorder_threshold: col(row, "reorder_threshold")?,
        supplier: col(row, "supplier")?,
        status: parse(&status, "drug status")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn batch_from_row(row: &SqliteRow) -> StoreResult<Batch> {
    let id: String = col(row, "id")?;
    let drug_id: String = col(row, "drug_id")?;
    let expiry_date: String = col(row, "expiry_date")?;
    let received_date: String = col(row, "received_date")?;
    let created_at: String = col(row, "created_at")?;
    Ok(Batch {
        id: parse(&id, "batch id")?,
        drug_id: parse(&drug_id, "drug id")?,
        lot_number: col(row, "lot_number")?,
        quantity: col(row, "quantity")?,
        unit_cost: Money::from_cents(col(row, "unit_cost_cents")?),
        expiry_date: parse_date(&expiry_date)?,
        received_date: parse_date(&received_date)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn adjustment_from_row(row: &SqliteRow) -> StoreResult<StockAdjustment> {
    let id: String = col(row, "id")?;
    let batch_id: String = col(row, "batch_id")?;
    let drug_id: String = col(row, "drug_id")?;
    let kind: String = col(row, "kind")?;
    let adjusted_at: String = col(row, "adjusted_at")?;
    Ok(StockAdjustment {
        id: parse(&id, "adjustment id")?,
        batch_id: parse(&batch_id, "batch id")?,
        drug_id: parse(&drug_id, "drug id")?,
        delta: col(row, "delta")?,
        kind: parse(&kind, "adjustment kind")?,
        reason: col(row, "reason")?,
        adjusted_at: parse_timestamp(&adjusted_at)?,
    })
}

fn sale_from_row(row: &SqliteRow) -> StoreResult<Sale> {
    let id: String = col(row, "id")?;
    let invoice: String = col(row, "invoice")?;
    let drug_id: String = col(row, "drug_id")?;
    let batch_id: String = col(row, "batch_id")?;
    let sold_at: String = col(row, "sold_at")?;
    Ok(Sale {
        id: parse(&id, "sale id")?,
        invoice: parse(&invoice, "invoice number")?,
        drug_id: parse(&drug_id, "drug id")?,
        batch_id: parse(&batch_id, "batch id")?,
        quantity: col(row, "quantity")?,
        unit_price: Money::from_cents(col(row, "unit_price_cents")?),
        unit_cost: Money::from_cents(col(row, "unit_cost_cents")?),
        discount: Money::from_cents(col(row, "discount_cents")?),
        total: Money::from_cents(col(row, "total_cents")?),
        sold_by: col(row, "sold_by")?,
        sold_at: parse_timestamp(&sold_at)?,
    })
}

fn return_from_row(row: &SqliteRow) -> StoreResult<SaleReturn> {
    let id: String = col(row, "id")?;
    let sale_id: String = col(row, "sale_id")?;
    let invoice: String = col(row, "invoice")?;
    let drug_id: String = col(row, "drug_id")?;
    let batch_id: String = col(row, "batch_id")?;
    let returned_at: String = col(row, "returned_at")?;
    Ok(SaleReturn {
        id: parse(&id, "return id")?,
        sale_id: parse(&sale_id, "sale id")?,
        invoice: parse(&invoice, "invoice number")?,
        drug_id: parse(&drug_id, "drug id")?,
        batch_id: parse(&batch_id, "batch id")?,
        quantity: col(row, "quantity")?,
        reason: col(row, "reason")?,
        returned_at: parse_timestamp(&returned_at)?,
    })
}

/// Map sqlx failures onto the store's error kinds. Constraint failures raised
/// by SQLite itself surface as `ConstraintViolation`.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => StoreError::ConstraintViolation(db.message().to_string()),
            _ if db.message().contains("append-only") => {
                StoreError::ConstraintViolation(db.message().to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        },
        sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}
