//! Infrastructure layer: storage contracts, both store backends, and the
//! reservation/settlement/reconciliation services built on them.

pub mod jobs;
pub mod ledger;
pub mod order_store;
pub mod reconciliation;
pub mod reservation;
pub mod settlement;
pub mod stock_store;
pub mod store;

pub use ledger::{LedgerError, StockLedger};
pub use reservation::{ReservationService, ReserveOutcome};
pub use settlement::{SettleOutcome, SettlementCoordinator, SettlementError};
pub use store::StoreError;
