//! Storage-layer error model shared by both stores.

use thiserror::Error;

/// Storage operation error.
///
/// These are **infrastructure errors** (missing rows, constraint failures,
/// connectivity) as opposed to domain errors (validation, invariants).
/// Expected business outcomes (insufficient stock, duplicate payment
/// sessions) are modeled as outcome variants on the store operations, not
/// as errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed product, variant or order does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage constraint rejected the write (check constraint, foreign
    /// key, unexpected uniqueness collision).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Connectivity or other backend failure.
    #[error("storage failure: {0}")]
    Storage(String),
}
