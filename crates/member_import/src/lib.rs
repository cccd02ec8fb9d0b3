//! Bulk import and export for the member registry.
//!
//! Import files are read in chunks ([`read_lines`]), split into fields
//! ([`split_row`]) and reconciled into staged collections plus one remote
//! batch ([`ImportReconciler`]). The batch is committed through the
//! [`SyncEngine`](registry_sync::SyncEngine), which swaps the staged
//! collections in only after the commit succeeds.

mod chunked;
mod error;
mod export;
mod reconciler;
mod rows;

pub use chunked::*;
pub use error::*;
pub use export::*;
pub use reconciler::*;
pub use rows::*;
