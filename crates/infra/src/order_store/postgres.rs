//! Postgres-backed order store.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE orders (
//!     id                  UUID PRIMARY KEY,
//!     payment_session_id  TEXT,
//!     status              TEXT NOT NULL,
//!     payment_status      TEXT NOT NULL,
//!     payment_method      TEXT,
//!     total               BIGINT NOT NULL CHECK (total >= 0),
//!     created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! -- The settlement crux. Applied after legacy duplicates are healed.
//! CREATE UNIQUE INDEX orders_payment_session_key
//!     ON orders (payment_session_id)
//!     WHERE payment_session_id IS NOT NULL;
//!
//! CREATE TABLE order_items (
//!     id          UUID PRIMARY KEY,
//!     order_id    UUID NOT NULL REFERENCES orders (id),
//!     product_id  UUID NOT NULL,
//!     variant_id  UUID,
//!     quantity    BIGINT NOT NULL CHECK (quantity > 0),
//!     unit_price  BIGINT NOT NULL CHECK (unit_price >= 0)
//! );
//! ```
//!
//! `insert_settled` does not check for an existing session before writing:
//! it inserts and lets the unique index arbitrate. A 23505 on that index is
//! the *expected* second-trigger outcome and maps to `DuplicateSession`;
//! everything the transaction wrote is rolled back, so no partial order is
//! ever visible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use stockline_core::{OrderId, OrderItemId, PaymentSessionId, ProductId, VariantId};
use stockline_orders::{Order, OrderDraft, OrderItem, OrderStatus, PaymentStatus};

use super::r#trait::{settled_order, InsertOutcome, OrderStore};
use crate::stock_store::postgres::{is_unique_violation, map_sqlx_error};
use crate::store::StoreError;

/// Postgres-backed order store. Cloneable; all clones share one pool.
#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, variant_id, quantity, unit_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_items", e))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn hydrate(&self, row: &sqlx::postgres::PgRow) -> Result<Order, StoreError> {
        let mut order = order_from_row(row)?;
        order.items = self.fetch_items(order.id).await?;
        Ok(order)
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self, draft), fields(session = %session, order_id = %order_id), err)]
    async fn insert_settled(
        &self,
        session: PaymentSessionId,
        draft: &OrderDraft,
        order_id: OrderId,
    ) -> Result<InsertOutcome, StoreError> {
        let order = settled_order(session, draft, order_id, Utc::now());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, payment_session_id, status, payment_status,
                                payment_method, total, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.payment_session_id.as_ref().map(|s| s.as_str()))
        .bind(status_to_str(order.status))
        .bind(payment_status_to_str(order.payment_status))
        .bind(order.payment_method.as_deref())
        .bind(order.total as i64)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            if is_unique_violation(&e) {
                return Ok(InsertOutcome::DuplicateSession);
            }
            return Err(map_sqlx_error("insert_order", e));
        }

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, variant_id,
                                         quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(item.variant_id.map(|v| *v.as_uuid()))
            .bind(item.quantity)
            .bind(item.unit_price as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_order_item", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(InsertOutcome::Inserted(order))
    }

    async fn find_by_session(
        &self,
        session: &PaymentSessionId,
    ) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, payment_session_id, status, payment_status,
                   payment_method, total, created_at
            FROM orders
            WHERE payment_session_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(session.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_session", e))?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, payment_session_id, status, payment_status,
                   payment_method, total, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_order", e))?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn delete_with_items(&self, id: OrderId) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order_items", e))?;

        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order", e))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("order {id}")));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn duplicate_session_groups(&self) -> Result<Vec<Vec<Order>>, StoreError> {
        let sessions = sqlx::query(
            r#"
            SELECT payment_session_id
            FROM orders
            WHERE payment_session_id IS NOT NULL
            GROUP BY payment_session_id
            HAVING COUNT(*) > 1
            ORDER BY payment_session_id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("duplicate_sessions", e))?;

        let mut groups = Vec::with_capacity(sessions.len());
        for row in sessions {
            let session: String = row
                .try_get("payment_session_id")
                .map_err(|e| StoreError::Storage(format!("failed to read session: {e}")))?;

            let rows = sqlx::query(
                r#"
                SELECT id, payment_session_id, status, payment_status,
                       payment_method, total, created_at
                FROM orders
                WHERE payment_session_id = $1
                ORDER BY created_at ASC, id ASC
                "#,
            )
            .bind(&session)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("duplicate_group", e))?;

            let mut group = Vec::with_capacity(rows.len());
            for row in rows {
                group.push(self.hydrate(&row).await?);
            }
            groups.push(group);
        }
        Ok(groups)
    }

    async fn merge_payment_method(&self, id: OrderId, method: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payment_method = $2
            WHERE id = $1 AND payment_method IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(method)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("merge_payment_method", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_unchecked(&self, order: Order) -> Result<(), StoreError> {
        // Only meaningful against a database that has not applied the
        // unique index yet (legacy backfill); with the index in place the
        // database itself refuses duplicates.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, payment_session_id, status, payment_status,
                                payment_method, total, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.payment_session_id.as_ref().map(|s| s.as_str()))
        .bind(status_to_str(order.status))
        .bind(payment_status_to_str(order.payment_status))
        .bind(order.payment_method.as_deref())
        .bind(order.total as i64)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_unchecked", e))?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, variant_id,
                                         quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(item.variant_id.map(|v| *v.as_uuid()))
            .bind(item.quantity)
            .bind(item.unit_price as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_unchecked_item", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn status_to_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Confirmed => "confirmed",
        OrderStatus::Shipped => "shipped",
        OrderStatus::Delivered => "delivered",
        OrderStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> Result<OrderStatus, StoreError> {
    match s {
        "confirmed" => Ok(OrderStatus::Confirmed),
        "shipped" => Ok(OrderStatus::Shipped),
        "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" => Ok(OrderStatus::Cancelled),
        other => Err(StoreError::Storage(format!("unknown order status '{other}'"))),
    }
}

fn payment_status_to_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Paid => "paid",
    }
}

fn payment_status_from_str(s: &str) -> Result<PaymentStatus, StoreError> {
    match s {
        "pending" => Ok(PaymentStatus::Pending),
        "paid" => Ok(PaymentStatus::Paid),
        other => Err(StoreError::Storage(format!(
            "unknown payment status '{other}'"
        ))),
    }
}

fn order_from_row(row: &sqlx::postgres::PgRow) -> Result<Order, StoreError> {
    let status: String = row
        .try_get("status")
        .map_err(|e| StoreError::Storage(format!("failed to read status: {e}")))?;
    let payment_status: String = row
        .try_get("payment_status")
        .map_err(|e| StoreError::Storage(format!("failed to read payment_status: {e}")))?;
    let session: Option<String> = row
        .try_get("payment_session_id")
        .map_err(|e| StoreError::Storage(format!("failed to read payment_session_id: {e}")))?;
    let total: i64 = row
        .try_get("total")
        .map_err(|e| StoreError::Storage(format!("failed to read total: {e}")))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| StoreError::Storage(format!("failed to read created_at: {e}")))?;

    let payment_session_id = match session {
        Some(raw) => Some(
            PaymentSessionId::new(raw)
                .map_err(|e| StoreError::Storage(format!("invalid stored session id: {e}")))?,
        ),
        None => None,
    };

    Ok(Order {
        id: OrderId::from_uuid(
            row.try_get("id")
                .map_err(|e| StoreError::Storage(format!("failed to read id: {e}")))?,
        ),
        payment_session_id,
        status: status_from_str(&status)?,
        payment_status: payment_status_from_str(&payment_status)?,
        payment_method: row
            .try_get("payment_method")
            .map_err(|e| StoreError::Storage(format!("failed to read payment_method: {e}")))?,
        total: total.max(0) as u64,
        created_at,
        items: Vec::new(),
    })
}

fn item_from_row(row: &sqlx::postgres::PgRow) -> Result<OrderItem, StoreError> {
    let variant: Option<uuid::Uuid> = row
        .try_get("variant_id")
        .map_err(|e| StoreError::Storage(format!("failed to read variant_id: {e}")))?;
    let unit_price: i64 = row
        .try_get("unit_price")
        .map_err(|e| StoreError::Storage(format!("failed to read unit_price: {e}")))?;

    Ok(OrderItem {
        id: OrderItemId::from_uuid(
            row.try_get("id")
                .map_err(|e| StoreError::Storage(format!("failed to read id: {e}")))?,
        ),
        order_id: OrderId::from_uuid(
            row.try_get("order_id")
                .map_err(|e| StoreError::Storage(format!("failed to read order_id: {e}")))?,
        ),
        product_id: ProductId::from_uuid(
            row.try_get("product_id")
                .map_err(|e| StoreError::Storage(format!("failed to read product_id: {e}")))?,
        ),
        variant_id: variant.map(VariantId::from_uuid),
        quantity: row
            .try_get("quantity")
            .map_err(|e| StoreError::Storage(format!("failed to read quantity: {e}")))?,
        unit_price: unit_price.max(0) as u64,
    })
}
