//! `pharmacy-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;

pub use error::{DomainError, DomainResult};
pub use id::{AdjustmentId, BatchId, CategoryId, DrugId, ReturnId, SaleId};
pub use money::Money;
