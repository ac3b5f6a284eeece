//! Postgres-backed stock store.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE products (
//!     id         UUID PRIMARY KEY,
//!     name       TEXT NOT NULL,
//!     stock      BIGINT NOT NULL CHECK (stock >= 0),
//!     is_active  BOOLEAN NOT NULL
//! );
//!
//! CREATE TABLE product_variants (
//!     id          UUID PRIMARY KEY,
//!     product_id  UUID NOT NULL REFERENCES products (id) ON DELETE CASCADE,
//!     size        TEXT,
//!     color       TEXT,
//!     stock       BIGINT NOT NULL CHECK (stock >= 0)
//! );
//! ```
//!
//! ## Concurrency
//!
//! `adjust` never reads a count into the application and writes a computed
//! value back across two round trips. The delta and the non-negativity
//! precondition travel in one conditional `UPDATE`, so the row lock taken by
//! the statement serializes concurrent workers and the check constraint
//! backstops it. The parent-aggregate rewrite for variant targets runs in
//! the same transaction.
//!
//! ## Error mapping
//!
//! | PostgreSQL error code | `StoreError` | Scenario |
//! |-----------------------|--------------|----------|
//! | `23505` unique violation    | `Constraint` | Duplicate primary key on seed |
//! | `23503` foreign key         | `Constraint` | Variant referencing missing product |
//! | `23514` check constraint    | `Constraint` | Negative stock reached the database |
//! | other                       | `Storage`    | Connectivity and the rest |

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;

use stockline_catalog::{Product, ProductVariant, VariantAttributes};
use stockline_core::{ProductId, VariantId};

use super::r#trait::{AdjustOutcome, ReconcileOutcome, StockStore, StockTarget};
use crate::store::StoreError;

/// Postgres-backed stock store. Cloneable; all clones share one pool.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_variants(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<ProductVariant>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, size, color, stock
            FROM product_variants
            WHERE product_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_variants", e))?;

        rows.iter().map(variant_from_row).collect()
    }

    /// Rewrite the parent aggregate from the variant sum, inside the
    /// caller's transaction.
    async fn rewrite_aggregate(
        tx: &mut Transaction<'_, Postgres>,
        product_id: ProductId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE products p
            SET stock = v.total, is_active = v.total > 0
            FROM (
                SELECT COALESCE(SUM(stock), 0)::BIGINT AS total
                FROM product_variants
                WHERE product_id = $1
            ) v
            WHERE p.id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("rewrite_aggregate", e))?;
        Ok(())
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    async fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO products (id, name, stock, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                stock = EXCLUDED.stock,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.stock)
        .bind(product.is_active)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        // Variant lifecycle is tied to the product: replacing the row
        // replaces the whole variant set.
        sqlx::query("DELETE FROM product_variants WHERE product_id = $1")
            .bind(product.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_variants", e))?;

        for variant in &product.variants {
            sqlx::query(
                r#"
                INSERT INTO product_variants (id, product_id, size, color, stock)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(variant.id.as_uuid())
            .bind(variant.product_id.as_uuid())
            .bind(variant.attributes.size.as_deref())
            .bind(variant.attributes.color.as_deref())
            .bind(variant.stock)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_variant", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, stock, is_active
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut product = product_from_row(&row)?;
        product.variants = self.fetch_variants(id).await?;
        Ok(Some(product))
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, stock, is_active
            FROM products
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        let mut products = Vec::with_capacity(rows.len());
        for row in rows {
            let mut product = product_from_row(&row)?;
            product.variants = self.fetch_variants(product.id).await?;
            products.push(product);
        }
        Ok(products)
    }

    async fn available(&self, target: StockTarget) -> Result<i64, StoreError> {
        let row = match target {
            StockTarget::Product(id) => sqlx::query("SELECT stock FROM products WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("available_product", e))?,
            StockTarget::Variant(product_id, variant_id) => sqlx::query(
                "SELECT stock FROM product_variants WHERE id = $1 AND product_id = $2",
            )
            .bind(variant_id.as_uuid())
            .bind(product_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("available_variant", e))?,
        };

        let row = row.ok_or_else(|| StoreError::NotFound(format!("{target:?}")))?;
        row.try_get::<i64, _>("stock")
            .map_err(|e| StoreError::Storage(format!("failed to read stock: {e}")))
    }

    #[instrument(
        skip(self),
        fields(product_id = %target.product_id(), variant_id = ?target.variant_id(), delta),
        err
    )]
    async fn adjust(&self, target: StockTarget, delta: i64) -> Result<AdjustOutcome, StoreError> {
        match target {
            StockTarget::Product(product_id) => {
                // Single conditional statement: precondition and write in
                // one atomic step, refused entirely when variants exist.
                let row = sqlx::query(
                    r#"
                    UPDATE products
                    SET stock = stock + $2, is_active = stock + $2 > 0
                    WHERE id = $1
                      AND stock + $2 >= 0
                      AND NOT EXISTS (
                          SELECT 1 FROM product_variants WHERE product_id = $1
                      )
                    RETURNING stock
                    "#,
                )
                .bind(product_id.as_uuid())
                .bind(delta)
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("adjust_product", e))?;

                if let Some(row) = row {
                    let available: i64 = row
                        .try_get("stock")
                        .map_err(|e| StoreError::Storage(format!("failed to read stock: {e}")))?;
                    return Ok(AdjustOutcome::Adjusted { available });
                }

                // Nothing matched: missing row, variant-carrying product,
                // or insufficient stock. Disambiguate with one read.
                let probe = sqlx::query(
                    r#"
                    SELECT stock,
                           EXISTS (
                               SELECT 1 FROM product_variants WHERE product_id = $1
                           ) AS has_variants
                    FROM products
                    WHERE id = $1
                    "#,
                )
                .bind(product_id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("adjust_product_probe", e))?
                .ok_or_else(|| StoreError::NotFound(format!("product {product_id}")))?;

                let has_variants: bool = probe
                    .try_get("has_variants")
                    .map_err(|e| StoreError::Storage(format!("failed to read probe: {e}")))?;
                if has_variants {
                    return Err(StoreError::Constraint(format!(
                        "product {product_id} has variants; adjust a variant instead"
                    )));
                }
                let available: i64 = probe
                    .try_get("stock")
                    .map_err(|e| StoreError::Storage(format!("failed to read stock: {e}")))?;
                Ok(AdjustOutcome::Insufficient { available })
            }
            StockTarget::Variant(product_id, variant_id) => {
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| map_sqlx_error("begin_transaction", e))?;

                let row = sqlx::query(
                    r#"
                    UPDATE product_variants
                    SET stock = stock + $3
                    WHERE id = $1 AND product_id = $2 AND stock + $3 >= 0
                    RETURNING stock
                    "#,
                )
                .bind(variant_id.as_uuid())
                .bind(product_id.as_uuid())
                .bind(delta)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("adjust_variant", e))?;

                let Some(row) = row else {
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;

                    let available = sqlx::query(
                        "SELECT stock FROM product_variants WHERE id = $1 AND product_id = $2",
                    )
                    .bind(variant_id.as_uuid())
                    .bind(product_id.as_uuid())
                    .fetch_optional(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("adjust_variant_probe", e))?
                    .ok_or_else(|| StoreError::NotFound(format!("variant {variant_id}")))?
                    .try_get::<i64, _>("stock")
                    .map_err(|e| StoreError::Storage(format!("failed to read stock: {e}")))?;

                    return Ok(AdjustOutcome::Insufficient { available });
                };

                let available: i64 = row
                    .try_get("stock")
                    .map_err(|e| StoreError::Storage(format!("failed to read stock: {e}")))?;

                // Same unit of work: parent aggregate follows the variant.
                Self::rewrite_aggregate(&mut tx, product_id).await?;

                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;

                Ok(AdjustOutcome::Adjusted { available })
            }
        }
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn reconcile_aggregate(&self, id: ProductId) -> Result<ReconcileOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // FOR UPDATE pins the product row so the comparison and the rewrite
        // happen against one consistent snapshot.
        let row = sqlx::query(
            r#"
            SELECT p.stock,
                   p.is_active,
                   (SELECT COUNT(*) FROM product_variants WHERE product_id = $1) AS variant_count,
                   (SELECT COALESCE(SUM(stock), 0)::BIGINT FROM product_variants WHERE product_id = $1) AS variant_total
            FROM products p
            WHERE p.id = $1
            FOR UPDATE OF p
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reconcile_probe", e))?
        .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;

        let previous: i64 = row
            .try_get("stock")
            .map_err(|e| StoreError::Storage(format!("failed to read stock: {e}")))?;
        let was_active: bool = row
            .try_get("is_active")
            .map_err(|e| StoreError::Storage(format!("failed to read is_active: {e}")))?;
        let variant_count: i64 = row
            .try_get("variant_count")
            .map_err(|e| StoreError::Storage(format!("failed to read variant_count: {e}")))?;
        let variant_total: i64 = row
            .try_get("variant_total")
            .map_err(|e| StoreError::Storage(format!("failed to read variant_total: {e}")))?;

        let corrected = if variant_count > 0 { variant_total } else { previous };
        let should_be_active = corrected > 0;

        if corrected == previous && should_be_active == was_active {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(ReconcileOutcome::NoOp);
        }

        sqlx::query("UPDATE products SET stock = $2, is_active = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(corrected)
            .bind(should_be_active)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("reconcile_rewrite", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(ReconcileOutcome::Corrected {
            previous,
            corrected,
        })
    }

    async fn mismatched_products(&self) -> Result<Vec<ProductId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.id
            FROM products p
            JOIN product_variants v ON v.product_id = p.id
            GROUP BY p.id, p.stock
            HAVING p.stock <> COALESCE(SUM(v.stock), 0)
            ORDER BY p.id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mismatched_products", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<uuid::Uuid, _>("id")
                    .map(ProductId::from_uuid)
                    .map_err(|e| StoreError::Storage(format!("failed to read id: {e}")))
            })
            .collect()
    }
}

fn product_from_row(row: &sqlx::postgres::PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: ProductId::from_uuid(
            row.try_get("id")
                .map_err(|e| StoreError::Storage(format!("failed to read id: {e}")))?,
        ),
        name: row
            .try_get("name")
            .map_err(|e| StoreError::Storage(format!("failed to read name: {e}")))?,
        stock: row
            .try_get("stock")
            .map_err(|e| StoreError::Storage(format!("failed to read stock: {e}")))?,
        is_active: row
            .try_get("is_active")
            .map_err(|e| StoreError::Storage(format!("failed to read is_active: {e}")))?,
        variants: Vec::new(),
    })
}

fn variant_from_row(row: &sqlx::postgres::PgRow) -> Result<ProductVariant, StoreError> {
    Ok(ProductVariant {
        id: VariantId::from_uuid(
            row.try_get("id")
                .map_err(|e| StoreError::Storage(format!("failed to read id: {e}")))?,
        ),
        product_id: ProductId::from_uuid(
            row.try_get("product_id")
                .map_err(|e| StoreError::Storage(format!("failed to read product_id: {e}")))?,
        ),
        attributes: VariantAttributes {
            size: row
                .try_get("size")
                .map_err(|e| StoreError::Storage(format!("failed to read size: {e}")))?,
            color: row
                .try_get("color")
                .map_err(|e| StoreError::Storage(format!("failed to read color: {e}")))?,
        },
        stock: row
            .try_get("stock")
            .map_err(|e| StoreError::Storage(format!("failed to read stock: {e}")))?,
    })
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") | Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation (Postgres 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
