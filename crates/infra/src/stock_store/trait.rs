use async_trait::async_trait;
use std::sync::Arc;

use stockline_catalog::Product;
use stockline_core::{ProductId, VariantId};

use crate::store::StoreError;

/// Target of a stock read or adjustment: the variant when the cart line
/// names one, otherwise the product itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StockTarget {
    Product(ProductId),
    Variant(ProductId, VariantId),
}

impl StockTarget {
    pub fn of(product_id: ProductId, variant_id: Option<VariantId>) -> Self {
        match variant_id {
            Some(v) => Self::Variant(product_id, v),
            None => Self::Product(product_id),
        }
    }

    pub fn product_id(&self) -> ProductId {
        match self {
            Self::Product(p) | Self::Variant(p, _) => *p,
        }
    }

    pub fn variant_id(&self) -> Option<VariantId> {
        match self {
            Self::Product(_) => None,
            Self::Variant(_, v) => Some(*v),
        }
    }
}

/// Result of a conditional stock adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// The delta was applied; `available` is the target's new count.
    Adjusted { available: i64 },
    /// The delta would have driven the count negative; nothing was written.
    /// `available` is the target's unchanged count.
    Insufficient { available: i64 },
}

/// Result of recomputing a product's aggregate from its variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The stored aggregate disagreed and was rewritten.
    Corrected { previous: i64, corrected: i64 },
    /// The stored aggregate already matched.
    NoOp,
}

/// Authoritative store for sellable stock counts.
///
/// ## Atomicity contract
///
/// `adjust()` is the load-bearing operation. Implementations must perform
/// the non-negativity check and the write as **one atomic unit** per
/// (product, variant) key: a conditional update, never a read followed by
/// a separate write across two round trips. Two workers adjusting the same
/// key concurrently must serialize; the loser observes the winner's count.
///
/// When the target is a variant, the parent product's aggregate `stock` and
/// `is_active` flag are rewritten inside the same unit of work, so no
/// reader ever observes a variant total that disagrees with its product.
///
/// ## Product-level targets
///
/// A product that carries variants cannot be adjusted at the product level:
/// its product-level count is derived, and writing it directly is exactly
/// the drift the reconciliation job exists to heal. Implementations reject
/// that with `StoreError::Constraint`.
///
/// ## Seeding
///
/// `insert_product` stores the row as given, without invariant checks:
/// reconciliation tests and legacy backfills need to be able to stage the
/// drifted shapes the running system has actually produced.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Seed or replace a catalog row (ops surface; checkout never calls this).
    async fn insert_product(&self, product: Product) -> Result<(), StoreError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Full catalog scan, used by reconciliation.
    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Current sellable units for the target. No side effect.
    async fn available(&self, target: StockTarget) -> Result<i64, StoreError>;

    /// Atomically apply `delta` (positive = release, negative = reserve),
    /// refusing any result below zero. See the trait docs for the
    /// atomicity contract.
    async fn adjust(&self, target: StockTarget, delta: i64) -> Result<AdjustOutcome, StoreError>;

    /// Recompute the product aggregate (`stock`, `is_active`) from its
    /// variants and rewrite it if it disagrees. Idempotent; safe anytime.
    async fn reconcile_aggregate(&self, id: ProductId) -> Result<ReconcileOutcome, StoreError>;

    /// Products whose stored stock disagrees with their variant sum.
    async fn mismatched_products(&self) -> Result<Vec<ProductId>, StoreError>;
}

#[async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        (**self).insert_product(product).await
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get_product(id).await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).list_products().await
    }

    async fn available(&self, target: StockTarget) -> Result<i64, StoreError> {
        (**self).available(target).await
    }

    async fn adjust(&self, target: StockTarget, delta: i64) -> Result<AdjustOutcome, StoreError> {
        (**self).adjust(target, delta).await
    }

    async fn reconcile_aggregate(&self, id: ProductId) -> Result<ReconcileOutcome, StoreError> {
        (**self).reconcile_aggregate(id).await
    }

    async fn mismatched_products(&self) -> Result<Vec<ProductId>, StoreError> {
        (**self).mismatched_products().await
    }
}
