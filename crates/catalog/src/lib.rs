//! Drug catalog domain module.
//!
//! Business rules for catalog entries and categories, implemented as plain
//! deterministic functions (no IO, no storage).

pub mod category;
pub mod drug;

pub use category::Category;
pub use drug::{Drug, DrugStatus, DrugUpdate, NewDrug, name_key};
