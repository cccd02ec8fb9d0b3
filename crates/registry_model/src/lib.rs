//! Registry Model - Member records and the in-memory working set
//!
//! This crate provides the data model for the CWAC member registry:
//! paid, unpaid and status records grouped by area, their embedded
//! audit history, phone-number rules and the session working set.

mod audit;
mod error;
mod member;
mod phone;
mod role;
mod working_set;

pub use audit::*;
pub use error::*;
pub use member::*;
pub use phone::*;
pub use role::*;
pub use working_set::*;
