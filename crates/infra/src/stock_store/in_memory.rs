use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use stockline_catalog::Product;
use stockline_core::ProductId;

use super::r#trait::{AdjustOutcome, ReconcileOutcome, StockStore, StockTarget};
use crate::store::StoreError;

/// In-memory stock store.
///
/// Intended for tests/dev. Every trait operation takes the single mutex for
/// its full duration, which makes the check-and-write of `adjust` one
/// critical section: linearizable per key, the same guarantee the Postgres
/// backend gets from conditional updates.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    products: Mutex<HashMap<ProductId, Product>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ProductId, Product>>, StoreError> {
        self.products
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut products = self.lock()?;
        products.insert(product.id, product);
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let products = self.lock()?;
        Ok(products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let products = self.lock()?;
        let mut all: Vec<Product> = products.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    async fn available(&self, target: StockTarget) -> Result<i64, StoreError> {
        let products = self.lock()?;
        let product = products
            .get(&target.product_id())
            .ok_or_else(|| StoreError::NotFound(format!("product {}", target.product_id())))?;

        match target {
            // Read the stored aggregate, not a recomputed one: readers see
            // what the Postgres backend would return, drift included.
            StockTarget::Product(_) => Ok(product.stock),
            StockTarget::Variant(_, variant_id) => product
                .variant(variant_id)
                .map(|v| v.stock)
                .ok_or_else(|| StoreError::NotFound(format!("variant {variant_id}"))),
        }
    }

    async fn adjust(&self, target: StockTarget, delta: i64) -> Result<AdjustOutcome, StoreError> {
        let mut products = self.lock()?;
        let product = products
            .get_mut(&target.product_id())
            .ok_or_else(|| StoreError::NotFound(format!("product {}", target.product_id())))?;

        match target {
            StockTarget::Product(id) => {
                if product.has_variants() {
                    return Err(StoreError::Constraint(format!(
                        "product {id} has variants; adjust a variant instead"
                    )));
                }
                let next = product.stock + delta;
                if next < 0 {
                    return Ok(AdjustOutcome::Insufficient {
                        available: product.stock,
                    });
                }
                product.stock = next;
                product.is_active = next > 0;
                Ok(AdjustOutcome::Adjusted { available: next })
            }
            StockTarget::Variant(_, variant_id) => {
                let variant = product
                    .variant_mut(variant_id)
                    .ok_or_else(|| StoreError::NotFound(format!("variant {variant_id}")))?;
                let next = variant.stock + delta;
                if next < 0 {
                    return Ok(AdjustOutcome::Insufficient {
                        available: variant.stock,
                    });
                }
                variant.stock = next;
                // Same unit of work: the parent aggregate must never be
                // observable out of step with its variants.
                product.recompute_aggregate();
                Ok(AdjustOutcome::Adjusted { available: next })
            }
        }
    }

    async fn reconcile_aggregate(&self, id: ProductId) -> Result<ReconcileOutcome, StoreError> {
        let mut products = self.lock()?;
        let product = products
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;

        let previous = product.stock;
        if product.recompute_aggregate() {
            Ok(ReconcileOutcome::Corrected {
                previous,
                corrected: product.stock,
            })
        } else {
            Ok(ReconcileOutcome::NoOp)
        }
    }

    async fn mismatched_products(&self) -> Result<Vec<ProductId>, StoreError> {
        let products = self.lock()?;
        let mut ids: Vec<ProductId> = products
            .values()
            .filter(|p| p.has_variants() && p.stock != p.variant_stock_sum())
            .map(|p| p.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
