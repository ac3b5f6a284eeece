//! `stockline-catalog` — product and variant domain model.
//!
//! Owns the two-level stock shape: a product carries its own sellable count,
//! and when variants exist the product-level count is an aggregate derived
//! from them. Checkout UI logic never mutates these directly; mutation goes
//! through the reservation service and the reconciliation job.

pub mod product;

pub use product::{Product, ProductVariant, VariantAttributes};
