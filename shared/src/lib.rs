//! Shared types and models for the Stockroom inventory ledger
//!
//! This crate holds the plain domain entities (products, ledger movements,
//! stock-affecting documents, daily aggregates, reconciliation rows) and the
//! pure rules derived from them. It performs no I/O.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
