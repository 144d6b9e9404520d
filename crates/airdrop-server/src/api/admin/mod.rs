//! Operator routes, all guarded by the [`Admin`](crate::middleware::admin::Admin) extractor.

pub mod allocations;
pub mod get_job;
pub mod refresh;
pub mod run_transfer;
