//! `stockline-orders` — settled-order domain model.
//!
//! An order is the durable record of a completed payment session. It is
//! created exactly once per session by the settlement coordinator and is
//! never observable half-built: either the order and all of its items exist,
//! or nothing does.

pub mod order;

pub use order::{DraftItem, Order, OrderDraft, OrderItem, OrderStatus, PaymentStatus};
