//! Settlement coordinator: turns a completed payment into exactly one
//! persisted order.
//!
//! Two independent triggers race to create the same order: the payment
//! provider's asynchronous notification (at-least-once delivery) and the
//! client's success-redirect callback. They may arrive in any order, any
//! number of times, including concurrently. The coordinator does not referee that race in
//! application code: it inserts first and lets the store's uniqueness
//! constraint on the payment session id arbitrate. The losing trigger gets
//! the existing order back as `AlreadySettled`, which callers treat as
//! success.
//!
//! Stock is **not** touched here. Reservation already decremented the
//! ledger when the items entered the cart; re-decrementing at settlement
//! would double-count.

use thiserror::Error;
use tracing::{debug, info, instrument};

use stockline_core::{OrderId, PaymentSessionId};
use stockline_orders::{Order, OrderDraft};

use crate::order_store::{InsertOutcome, OrderStore};
use crate::store::StoreError;

/// Settlement failure.
///
/// Every variant is safe to retry with the same payload: the store
/// constraint makes re-submission idempotent.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid order payload: {0}")]
    Validation(String),

    /// A non-duplicate conflict (e.g. the duplicate's order vanished
    /// between insert and lookup). Retryable.
    #[error("settlement conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),
}

/// Result of a settlement attempt. Both variants are success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This caller created the order.
    Created(Order),
    /// Another trigger got there first; here is its order.
    AlreadySettled(Order),
}

impl SettleOutcome {
    pub fn order(&self) -> &Order {
        match self {
            Self::Created(o) | Self::AlreadySettled(o) => o,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettlementCoordinator<O: OrderStore> {
    orders: O,
}

impl<O: OrderStore> SettlementCoordinator<O> {
    pub fn new(orders: O) -> Self {
        Self { orders }
    }

    /// Settle a payment session: at most one order ever exists for it.
    ///
    /// 1. Validate the payload.
    /// 2. Attempt the constrained insert (order + items, one atomic unit).
    /// 3. On a duplicate, fetch the existing order and return
    ///    `AlreadySettled`, the expected second-trigger outcome.
    #[instrument(skip(self, draft), fields(session = %session, items = draft.items.len()))]
    pub async fn settle(
        &self,
        session: PaymentSessionId,
        draft: &OrderDraft,
    ) -> Result<SettleOutcome, SettlementError> {
        draft
            .validate()
            .map_err(|e| SettlementError::Validation(e.to_string()))?;

        let order_id = OrderId::new();
        match self
            .orders
            .insert_settled(session.clone(), draft, order_id)
            .await
            .map_err(SettlementError::Store)?
        {
            InsertOutcome::Inserted(order) => {
                info!(order_id = %order.id, total = order.total, "settled payment session");
                Ok(SettleOutcome::Created(order))
            }
            InsertOutcome::DuplicateSession => {
                let existing = self
                    .orders
                    .find_by_session(&session)
                    .await
                    .map_err(SettlementError::Store)?;

                match existing {
                    Some(order) => {
                        debug!(order_id = %order.id, "payment session already settled");
                        Ok(SettleOutcome::AlreadySettled(order))
                    }
                    // The winning order disappeared between the insert and
                    // the lookup (concurrent reconciliation is the only
                    // code path that deletes). Retryable.
                    None => Err(SettlementError::Conflict(format!(
                        "order for session {session} not found after duplicate insert"
                    ))),
                }
            }
        }
    }
}
