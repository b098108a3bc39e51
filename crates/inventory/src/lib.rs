//! Inventory domain module.
//!
//! This crate contains business rules for batches and the stock-adjustment
//! ledger, implemented purely as deterministic domain logic (no IO, no storage).

pub mod adjustment;
pub mod batch;

pub use adjustment::{AdjustmentKind, NewAdjustment, StockAdjustment};
pub use batch::{Batch, NewBatch};
