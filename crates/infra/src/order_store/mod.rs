//! Settled-order storage boundary.
//!
//! The uniqueness of the payment session id lives here, in the store,
//! because two settlement triggers can be in flight concurrently on
//! separate connections; see the trait docs.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use r#trait::{InsertOutcome, OrderStore};
