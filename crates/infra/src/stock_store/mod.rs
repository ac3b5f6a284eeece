//! Authoritative stock storage boundary.
//!
//! This module defines the infrastructure-facing abstraction for reading and
//! atomically adjusting sellable stock, without making storage assumptions
//! beyond the atomicity contract documented on the trait.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use r#trait::{AdjustOutcome, ReconcileOutcome, StockStore, StockTarget};
