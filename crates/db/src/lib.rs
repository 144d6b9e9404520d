//! File-backed storage: the recipient and allocation tables, and the claim ledger.

pub mod allocations;
pub mod config;
pub mod error;
pub mod ledger;

pub use allocations::AllocationSource;
pub use config::StorageConfig;
pub use error::{Error, Result};
pub use ledger::{AppendError, ClaimLedger};
