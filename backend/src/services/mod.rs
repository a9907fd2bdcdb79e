//! Business logic services for the Stockroom inventory ledger

pub mod aggregation;
pub mod closing;
pub mod documents;
pub mod ledger;
pub mod reconciliation;
pub mod stock;

pub use aggregation::DailyAggregator;
pub use closing::ClosingService;
pub use documents::DocumentService;
pub use ledger::LedgerService;
pub use reconciliation::ReconciliationService;
pub use stock::StockService;
