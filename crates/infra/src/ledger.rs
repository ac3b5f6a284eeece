//! Stock ledger: the single source of truth for "how many units of X are
//! sellable right now".

use thiserror::Error;
use tracing::{info, instrument};

use stockline_core::ProductId;

use crate::stock_store::{AdjustOutcome, ReconcileOutcome, StockStore, StockTarget};
use crate::store::StoreError;

/// Ledger operation error.
///
/// `InsufficientStock` is the one expected, user-facing case; everything
/// else is a caller bug or an infrastructure failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown product or variant")]
    NotFound,

    #[error(transparent)]
    Store(StoreError),
}

impl LedgerError {
    fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            other => Self::Store(other),
        }
    }
}

/// Façade over a [`StockStore`] enforcing the ledger semantics: adjustments
/// are atomic conditional updates, counts never go negative, and the
/// product aggregate always follows its variants.
#[derive(Debug, Clone)]
pub struct StockLedger<S: StockStore> {
    store: S,
}

impl<S: StockStore> StockLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Current sellable units. No side effect.
    pub async fn available(&self, target: StockTarget) -> Result<i64, LedgerError> {
        self.store
            .available(target)
            .await
            .map_err(LedgerError::from_store)
    }

    /// Atomically apply `delta` (positive = release, negative = reserve).
    ///
    /// Either succeeds fully, returning the new available count, or fails
    /// with no partial effect. A timed-out call does not reveal whether the
    /// adjustment committed; callers must re-query `available` before
    /// deciding to retry.
    #[instrument(
        skip(self),
        fields(product_id = %target.product_id(), variant_id = ?target.variant_id(), delta)
    )]
    pub async fn adjust(&self, target: StockTarget, delta: i64) -> Result<i64, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::Validation("delta cannot be zero".to_string()));
        }

        match self
            .store
            .adjust(target, delta)
            .await
            .map_err(LedgerError::from_store)?
        {
            AdjustOutcome::Adjusted { available } => Ok(available),
            AdjustOutcome::Insufficient { available } => Err(LedgerError::InsufficientStock {
                requested: -delta,
                available,
            }),
        }
    }

    /// Recompute the product aggregate from its variants, rewriting it if
    /// it disagrees. Idempotent; every correction is logged for audit.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn reconcile_aggregate(
        &self,
        product_id: ProductId,
    ) -> Result<ReconcileOutcome, LedgerError> {
        let outcome = self
            .store
            .reconcile_aggregate(product_id)
            .await
            .map_err(LedgerError::from_store)?;

        if let ReconcileOutcome::Corrected {
            previous,
            corrected,
        } = outcome
        {
            info!(
                product_id = %product_id,
                previous,
                corrected,
                "corrected product stock aggregate"
            );
        }
        Ok(outcome)
    }
}
