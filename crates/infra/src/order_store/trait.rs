use async_trait::async_trait;
use std::sync::Arc;

use stockline_core::{OrderId, PaymentSessionId};
use stockline_orders::{Order, OrderDraft};

use crate::store::StoreError;

/// Result of a constrained settlement insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The order and all of its items were created.
    Inserted(Order),
    /// An order for this payment session already exists; nothing was written.
    ///
    /// This is the expected, common outcome of the second settlement
    /// trigger arriving, not an error.
    DuplicateSession,
}

/// Durable store for settled orders.
///
/// ## Uniqueness contract
///
/// `insert_settled()` is where exactly-once settlement is decided, so the
/// uniqueness of `payment_session_id` must be enforced **by the store
/// itself**: a unique index in Postgres, a single critical section over
/// the map in memory. An application-level "does an order exist?" check
/// followed by an insert races when two settlement triggers land on
/// separate connections; that race is precisely what produced the
/// duplicate-order history this subsystem heals.
///
/// ## Atomicity
///
/// The order row and all of its items are written in one atomic unit.
/// A half-created order (row without items, or vice versa) must never be
/// observable, including by the reconciliation scans.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Create the settled order for a payment session, or report that one
    /// already exists. Writes `status = confirmed`, `payment_status = paid`
    /// and snapshots the draft's prices and totals.
    async fn insert_settled(
        &self,
        session: PaymentSessionId,
        draft: &OrderDraft,
        order_id: OrderId,
    ) -> Result<InsertOutcome, StoreError>;

    /// The order for a payment session.
    ///
    /// When legacy duplicates exist, returns the one reconciliation would
    /// keep: earliest `created_at`, ties broken by lowest id.
    async fn find_by_session(
        &self,
        session: &PaymentSessionId,
    ) -> Result<Option<Order>, StoreError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Delete an order and its items in one atomic unit. Reconciliation
    /// only; nothing else ever deletes orders.
    async fn delete_with_items(&self, id: OrderId) -> Result<(), StoreError>;

    /// Groups of orders sharing a non-null payment session id, with more
    /// than one member. Each group is sorted by (`created_at`, id)
    /// ascending, so the survivor is always `group[0]`.
    async fn duplicate_session_groups(&self) -> Result<Vec<Vec<Order>>, StoreError>;

    /// Record a payment method on an order only if none is recorded yet.
    /// Returns whether a write happened.
    async fn merge_payment_method(&self, id: OrderId, method: &str) -> Result<bool, StoreError>;

    /// Insert an order bypassing the session-uniqueness check.
    ///
    /// Exists for loading rows created before the constraint (the drift
    /// reconciliation heals) and for staging duplicates in tests. Not part
    /// of any request path.
    async fn insert_unchecked(&self, order: Order) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    async fn insert_settled(
        &self,
        session: PaymentSessionId,
        draft: &OrderDraft,
        order_id: OrderId,
    ) -> Result<InsertOutcome, StoreError> {
        (**self).insert_settled(session, draft, order_id).await
    }

    async fn find_by_session(
        &self,
        session: &PaymentSessionId,
    ) -> Result<Option<Order>, StoreError> {
        (**self).find_by_session(session).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).get(id).await
    }

    async fn delete_with_items(&self, id: OrderId) -> Result<(), StoreError> {
        (**self).delete_with_items(id).await
    }

    async fn duplicate_session_groups(&self) -> Result<Vec<Vec<Order>>, StoreError> {
        (**self).duplicate_session_groups().await
    }

    async fn merge_payment_method(&self, id: OrderId, method: &str) -> Result<bool, StoreError> {
        (**self).merge_payment_method(id, method).await
    }

    async fn insert_unchecked(&self, order: Order) -> Result<(), StoreError> {
        (**self).insert_unchecked(order).await
    }
}

/// Assemble the `Order` a settlement insert persists. Shared by both
/// backends so they write identical shapes.
pub(crate) fn settled_order(
    session: PaymentSessionId,
    draft: &OrderDraft,
    order_id: OrderId,
    created_at: chrono::DateTime<chrono::Utc>,
) -> Order {
    use stockline_core::OrderItemId;
    use stockline_orders::{OrderItem, OrderStatus, PaymentStatus};

    let items = draft
        .items
        .iter()
        .map(|i| OrderItem {
            id: OrderItemId::new(),
            order_id,
            product_id: i.product_id,
            variant_id: i.variant_id,
            quantity: i.quantity,
            unit_price: i.unit_price,
        })
        .collect();

    Order {
        id: order_id,
        payment_session_id: Some(session),
        status: OrderStatus::Confirmed,
        payment_status: PaymentStatus::Paid,
        payment_method: draft.payment_method.clone(),
        total: draft.total(),
        created_at,
        items,
    }
}
