//! Domain models for the inventory ledger

mod daily;
mod document;
mod movement;
mod product;
mod reconciliation;

pub use daily::*;
pub use document::*;
pub use movement::*;
pub use product::*;
pub use reconciliation::*;
