//! Record store.
//!
//! The durable system of record for drugs, batches, stock adjustments and the
//! sales ledger, with an in-memory backend for tests and a SQLite backend for
//! real use.

pub mod error;
pub mod in_memory;
pub mod query;
pub mod record_store;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use in_memory::InMemoryStore;
pub use query::{AdjustmentFilter, BatchFilter, DrugFilter, SaleFilter, StockLevel};
pub use record_store::RecordStore;
pub use sqlite::SqliteStore;
