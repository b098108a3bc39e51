//! Sales domain module.
//!
//! The append-only sales ledger, invoice numbering and the pure planning step
//! that turns a sale request into ledger rows and batch withdrawals.

pub mod invoice;
pub mod planning;
pub mod sale;

pub use invoice::InvoiceNumber;
pub use planning::{SalePlan, plan_sale, plan_total, plan_void};
pub use sale::{Receipt, Sale, SaleLine, SaleOrder, SaleReturn};
