use serde::{Deserialize, Serialize};

use stockline_core::{DomainError, DomainResult, ProductId, VariantId};

/// Variant attributes (size/color).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAttributes {
    pub size: Option<String>,
    pub color: Option<String>,
}

/// A sellable variant, owned exclusively by its product.
///
/// Lifecycle is tied to the product: replacing the product's variant set
/// drops the previous variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub attributes: VariantAttributes,
    /// Sellable units. Never negative.
    pub stock: i64,
}

impl ProductVariant {
    pub fn new(
        id: VariantId,
        product_id: ProductId,
        attributes: VariantAttributes,
        stock: i64,
    ) -> DomainResult<Self> {
        if stock < 0 {
            return Err(DomainError::validation("variant stock cannot be negative"));
        }
        Ok(Self {
            id,
            product_id,
            attributes,
            stock,
        })
    }
}

/// A catalog product.
///
/// Invariants:
/// - `variants` non-empty implies `stock == Σ variant.stock`
/// - `is_active == (effective stock > 0)`
/// - all stock counts are non-negative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Product-level sellable units; the variant aggregate when variants exist.
    pub stock: i64,
    /// Derived: whether any unit is sellable right now.
    pub is_active: bool,
    pub variants: Vec<ProductVariant>,
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, stock: i64) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if stock < 0 {
            return Err(DomainError::validation("stock cannot be negative"));
        }
        Ok(Self {
            id,
            name,
            stock,
            is_active: stock > 0,
            variants: Vec::new(),
        })
    }

    /// Replace the entire variant set.
    ///
    /// Previous variants are dropped (their lifecycle is tied to the
    /// product); `stock` and `is_active` are re-derived from the new set.
    pub fn with_variants(mut self, variants: Vec<ProductVariant>) -> DomainResult<Self> {
        for v in &variants {
            if v.product_id != self.id {
                return Err(DomainError::validation(format!(
                    "variant {} does not belong to product {}",
                    v.id, self.id
                )));
            }
            if v.stock < 0 {
                return Err(DomainError::validation("variant stock cannot be negative"));
            }
        }
        self.variants = variants;
        self.recompute_aggregate();
        Ok(self)
    }

    pub fn has_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    pub fn variant(&self, id: VariantId) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| v.id == id)
    }

    pub fn variant_mut(&mut self, id: VariantId) -> Option<&mut ProductVariant> {
        self.variants.iter_mut().find(|v| v.id == id)
    }

    pub fn variant_stock_sum(&self) -> i64 {
        self.variants.iter().map(|v| v.stock).sum()
    }

    /// Sellable units: `stock` when no variants exist, else the variant sum.
    pub fn effective_stock(&self) -> i64 {
        if self.has_variants() {
            self.variant_stock_sum()
        } else {
            self.stock
        }
    }

    /// Recompute `stock` and `is_active` from the variant set.
    ///
    /// Returns whether anything changed. Idempotent; this is the pure half
    /// of the ledger's `reconcile_aggregate`.
    pub fn recompute_aggregate(&mut self) -> bool {
        let stock = self.effective_stock();
        let is_active = stock > 0;
        let changed = self.stock != stock || self.is_active != is_active;
        self.stock = stock;
        self.is_active = is_active;
        changed
    }

    /// Check the product/variant invariants without mutating anything.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.stock < 0 {
            return Err(DomainError::invariant(format!(
                "product {} has negative stock {}",
                self.id, self.stock
            )));
        }
        for v in &self.variants {
            if v.stock < 0 {
                return Err(DomainError::invariant(format!(
                    "variant {} has negative stock {}",
                    v.id, v.stock
                )));
            }
            if v.product_id != self.id {
                return Err(DomainError::invariant(format!(
                    "variant {} is owned by product {}, found under {}",
                    v.id, v.product_id, self.id
                )));
            }
        }
        if self.has_variants() && self.stock != self.variant_stock_sum() {
            return Err(DomainError::invariant(format!(
                "product {} stock {} != variant sum {}",
                self.id,
                self.stock,
                self.variant_stock_sum()
            )));
        }
        if self.is_active != (self.effective_stock() > 0) {
            return Err(DomainError::invariant(format!(
                "product {} is_active does not match effective stock {}",
                self.id,
                self.effective_stock()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_product_id() -> ProductId {
        ProductId::new()
    }

    fn variant(product_id: ProductId, stock: i64) -> ProductVariant {
        ProductVariant::new(
            VariantId::new(),
            product_id,
            VariantAttributes::default(),
            stock,
        )
        .unwrap()
    }

    #[test]
    fn new_product_derives_is_active_from_stock() {
        let active = Product::new(test_product_id(), "Shirt", 5).unwrap();
        assert!(active.is_active);

        let inactive = Product::new(test_product_id(), "Shirt", 0).unwrap();
        assert!(!inactive.is_active);
    }

    #[test]
    fn rejects_empty_name_and_negative_stock() {
        assert!(Product::new(test_product_id(), "  ", 1).is_err());
        assert!(Product::new(test_product_id(), "Shirt", -1).is_err());
    }

    #[test]
    fn with_variants_rederives_aggregate() {
        let id = test_product_id();
        let product = Product::new(id, "Shirt", 99)
            .unwrap()
            .with_variants(vec![variant(id, 3), variant(id, 2)])
            .unwrap();

        assert_eq!(product.stock, 5);
        assert_eq!(product.effective_stock(), 5);
        assert!(product.is_active);
        product.check_invariants().unwrap();
    }

    #[test]
    fn with_variants_rejects_foreign_ownership() {
        let id = test_product_id();
        let foreign = variant(test_product_id(), 1);
        let err = Product::new(id, "Shirt", 0)
            .unwrap()
            .with_variants(vec![foreign])
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn recompute_aggregate_is_idempotent() {
        let id = test_product_id();
        let mut product = Product::new(id, "Shirt", 0)
            .unwrap()
            .with_variants(vec![variant(id, 4)])
            .unwrap();

        // Simulate drift the way the repair scripts used to find it.
        product.stock = 17;
        product.is_active = false;

        assert!(product.recompute_aggregate());
        assert_eq!(product.stock, 4);
        assert!(product.is_active);

        assert!(!product.recompute_aggregate());
        product.check_invariants().unwrap();
    }

    #[test]
    fn check_invariants_catches_sum_drift() {
        let id = test_product_id();
        let mut product = Product::new(id, "Shirt", 0)
            .unwrap()
            .with_variants(vec![variant(id, 2), variant(id, 2)])
            .unwrap();
        product.stock = 3;

        let err = product.check_invariants().unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 512,
                ..ProptestConfig::default()
            })]

            /// Property: after recompute, the invariants always hold, and a
            /// second recompute is a no-op.
            #[test]
            fn recompute_restores_invariants(stocks in prop::collection::vec(0i64..10_000, 0..8)) {
                let id = ProductId::new();
                let variants = stocks
                    .iter()
                    .map(|&s| variant(id, s))
                    .collect::<Vec<_>>();
                let mut product = Product::new(id, "Shirt", 0).unwrap()
                    .with_variants(variants)
                    .unwrap();

                product.stock = 10_000_000; // arbitrary drift
                product.is_active = false;
                product.recompute_aggregate();

                prop_assert!(product.check_invariants().is_ok());
                prop_assert!(!product.recompute_aggregate());
            }
        }
    }
}
