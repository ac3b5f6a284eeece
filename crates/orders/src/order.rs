use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{
    DomainError, DomainResult, OrderId, OrderItemId, PaymentSessionId, ProductId, VariantId,
};

/// Order lifecycle status.
///
/// Settlement only ever writes `Confirmed`; the later transitions belong to
/// order management, which lives outside this core. They are named here so
/// rows written by that system still deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

/// Payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

/// Order line item.
///
/// `unit_price` is a snapshot in the smallest currency unit (e.g. cents),
/// written once at settlement and immutable afterwards: later catalog price
/// changes must not reach past orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    pub unit_price: u64,
}

/// A settled order.
///
/// `payment_session_id` is the external idempotency key: unique when
/// present, enforced by the storage layer. Orders are deleted only by
/// reconciliation (duplicate healing), items first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub payment_session_id: Option<PaymentSessionId>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    /// Smallest currency unit (e.g. cents).
    pub total: u64,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

/// One line of a settlement payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    /// Price snapshot in the smallest currency unit.
    pub unit_price: u64,
}

/// The order payload carried by both settlement triggers.
///
/// The gateway notification and the client redirect each hold a copy; the
/// coordinator accepts either, so the payload must be self-contained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub items: Vec<DraftItem>,
    pub payment_method: Option<String>,
}

impl OrderDraft {
    pub fn new(items: Vec<DraftItem>) -> Self {
        Self {
            items,
            payment_method: None,
        }
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.items.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }
        for item in &self.items {
            if item.quantity <= 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
        }
        Ok(())
    }

    /// Order total in the smallest currency unit.
    pub fn total(&self) -> u64 {
        self.items
            .iter()
            .map(|i| i.unit_price.saturating_mul(i.quantity.max(0) as u64))
            .sum()
    }
}
