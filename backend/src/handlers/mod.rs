//! HTTP request handlers

pub mod documents;
pub mod health;
pub mod inventory;
pub mod reporting;

pub use documents::*;
pub use health::*;
pub use inventory::*;
pub use reporting::*;
