//! Reservation service: translates cart-line transitions into ledger
//! adjustments.
//!
//! Neither `reserve` nor `release` is idempotent on its own: releasing the
//! same cart line twice double-credits stock, and the ledger has no way to
//! tell a legitimate release from a clerical duplicate because no
//! reservation record is kept. The cart collaborator owns that contract: it
//! calls each operation exactly once per line transition, keyed by the
//! stable [`CartLineId`] it supplies.

use tracing::{info, instrument};

use stockline_core::{CartLineId, ProductId, VariantId};

use crate::ledger::{LedgerError, StockLedger};
use crate::stock_store::{StockStore, StockTarget};

/// Result of a reservation attempt.
///
/// Rejection is an expected outcome the cart acts on immediately ("not
/// enough stock"), not an error; no component retries it automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved { available: i64 },
    Rejected { requested: i64, available: i64 },
}

/// The unit of concurrency control for cart operations.
#[derive(Debug, Clone)]
pub struct ReservationService<S: StockStore> {
    ledger: StockLedger<S>,
}

impl<S: StockStore> ReservationService<S> {
    pub fn new(ledger: StockLedger<S>) -> Self {
        Self { ledger }
    }

    /// Hold `quantity` units against a cart line.
    ///
    /// On rejection the caller must not add the line item.
    #[instrument(
        skip(self),
        fields(cart_line = %line, product_id = %product_id, variant_id = ?variant_id, quantity)
    )]
    pub async fn reserve(
        &self,
        line: CartLineId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: i64,
    ) -> Result<ReserveOutcome, LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::Validation(
                "quantity must be positive".to_string(),
            ));
        }

        let target = StockTarget::of(product_id, variant_id);
        match self.ledger.adjust(target, -quantity).await {
            Ok(available) => {
                info!(available, "reserved stock for cart line");
                Ok(ReserveOutcome::Reserved { available })
            }
            Err(LedgerError::InsufficientStock {
                requested,
                available,
            }) => Ok(ReserveOutcome::Rejected {
                requested,
                available,
            }),
            Err(other) => Err(other),
        }
    }

    /// Return `quantity` units when a cart line is removed or the checkout
    /// is abandoned/cancelled. Returns the new available count.
    ///
    /// Releasing is additive and cannot violate the non-negative invariant;
    /// a release with no matching reservation is a caller bug the ledger
    /// cannot detect.
    #[instrument(
        skip(self),
        fields(cart_line = %line, product_id = %product_id, variant_id = ?variant_id, quantity)
    )]
    pub async fn release(
        &self,
        line: CartLineId,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: i64,
    ) -> Result<i64, LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::Validation(
                "quantity must be positive".to_string(),
            ));
        }

        let target = StockTarget::of(product_id, variant_id);
        let available = self.ledger.adjust(target, quantity).await?;
        info!(available, "released stock for cart line");
        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock_store::InMemoryStockStore;
    use std::sync::Arc;
    use stockline_catalog::{Product, ProductVariant, VariantAttributes};

    async fn service_with_variants() -> (
        ReservationService<Arc<InMemoryStockStore>>,
        Arc<InMemoryStockStore>,
        ProductId,
        VariantId,
        VariantId,
    ) {
        let store = Arc::new(InMemoryStockStore::new());
        let product_id = ProductId::new();
        let small = VariantId::new();
        let medium = VariantId::new();
        let product = Product::new(product_id, "Shirt", 0)
            .unwrap()
            .with_variants(vec![
                ProductVariant::new(small, product_id, VariantAttributes::default(), 3).unwrap(),
                ProductVariant::new(medium, product_id, VariantAttributes::default(), 2).unwrap(),
            ])
            .unwrap();
        store.insert_product(product).await.unwrap();

        let service = ReservationService::new(StockLedger::new(store.clone()));
        (service, store, product_id, small, medium)
    }

    #[tokio::test]
    async fn reserve_then_re_reserve_beyond_stock_is_rejected() {
        let (service, store, product_id, small, _) = service_with_variants().await;

        let first = service
            .reserve(CartLineId::new(), product_id, Some(small), 2)
            .await
            .unwrap();
        assert_eq!(first, ReserveOutcome::Reserved { available: 1 });

        let product = store.get_product(product_id).await.unwrap().unwrap();
        assert_eq!(product.stock, 3);

        let second = service
            .reserve(CartLineId::new(), product_id, Some(small), 2)
            .await
            .unwrap();
        assert_eq!(
            second,
            ReserveOutcome::Rejected {
                requested: 2,
                available: 1
            }
        );

        // The rejected attempt left nothing behind.
        let product = store.get_product(product_id).await.unwrap().unwrap();
        assert_eq!(product.variant(small).unwrap().stock, 1);
        assert_eq!(product.stock, 3);
    }

    #[tokio::test]
    async fn release_restores_stock_and_activity() {
        let store = Arc::new(InMemoryStockStore::new());
        let product_id = ProductId::new();
        store
            .insert_product(Product::new(product_id, "Mug", 5).unwrap())
            .await
            .unwrap();
        let service = ReservationService::new(StockLedger::new(store.clone()));
        let line = CartLineId::new();

        let reserved = service.reserve(line, product_id, None, 5).await.unwrap();
        assert_eq!(reserved, ReserveOutcome::Reserved { available: 0 });
        assert!(!store.get_product(product_id).await.unwrap().unwrap().is_active);

        let available = service.release(line, product_id, None, 5).await.unwrap();
        assert_eq!(available, 5);

        let product = store.get_product(product_id).await.unwrap().unwrap();
        assert_eq!(product.stock, 5);
        assert!(product.is_active);
    }

    #[tokio::test]
    async fn release_without_matching_reservation_is_accepted() {
        // No reservation record is kept, so the ledger cannot tell a
        // legitimate release from a clerical duplicate; the extra units
        // simply appear. The cart's exactly-once contract is the guard.
        let store = Arc::new(InMemoryStockStore::new());
        let product_id = ProductId::new();
        store
            .insert_product(Product::new(product_id, "Mug", 5).unwrap())
            .await
            .unwrap();
        let service = ReservationService::new(StockLedger::new(store));

        let available = service
            .release(CartLineId::new(), product_id, None, 1)
            .await
            .unwrap();
        assert_eq!(available, 6);
    }

    #[tokio::test]
    async fn non_positive_quantities_are_rejected_up_front() {
        let (service, _, product_id, small, _) = service_with_variants().await;

        let err = service
            .reserve(CartLineId::new(), product_id, Some(small), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = service
            .release(CartLineId::new(), product_id, Some(small), -1)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
