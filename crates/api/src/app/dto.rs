use axum::http::StatusCode;
use serde::Deserialize;

use stockline_catalog::Product;
use stockline_core::{CartLineId, ProductId, VariantId};
use stockline_orders::Order;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct VariantRequest {
    pub size: Option<String>,
    pub color: Option<String>,
    pub stock: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub variants: Vec<VariantRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub cart_line_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub cart_line_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct SettleItemRequest {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    /// Price snapshot in the smallest currency unit.
    pub unit_price: u64,
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub payment_session_id: String,
    pub payment_method: Option<String>,
    pub items: Vec<SettleItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ActiveCartLineRequest {
    pub cart_line_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub active_cart_lines: Vec<ActiveCartLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub variant_id: Option<String>,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_product_id(s: &str) -> Result<ProductId, axum::response::Response> {
    s.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
    })
}

pub fn parse_variant_id(s: &str) -> Result<VariantId, axum::response::Response> {
    s.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid variant id")
    })
}

pub fn parse_cart_line_id(s: &str) -> Result<CartLineId, axum::response::Response> {
    s.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid cart line id")
    })
}

pub fn parse_optional_variant_id(
    s: &Option<String>,
) -> Result<Option<VariantId>, axum::response::Response> {
    match s {
        Some(raw) => Ok(Some(parse_variant_id(raw)?)),
        None => Ok(None),
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn product_to_json(product: &Product) -> serde_json::Value {
    serde_json::json!({
        "id": product.id.to_string(),
        "name": product.name,
        "stock": product.stock,
        "is_active": product.is_active,
        "variants": product.variants.iter().map(|v| serde_json::json!({
            "id": v.id.to_string(),
            "size": v.attributes.size,
            "color": v.attributes.color,
            "stock": v.stock,
        })).collect::<Vec<_>>(),
    })
}

pub fn order_to_json(order: &Order) -> serde_json::Value {
    serde_json::json!({
        "id": order.id.to_string(),
        "payment_session_id": order.payment_session_id.as_ref().map(|s| s.to_string()),
        "status": order.status,
        "payment_status": order.payment_status,
        "payment_method": order.payment_method,
        "total": order.total,
        "created_at": order.created_at.to_rfc3339(),
        "items": order.items.iter().map(|i| serde_json::json!({
            "id": i.id.to_string(),
            "product_id": i.product_id.to_string(),
            "variant_id": i.variant_id.map(|v| v.to_string()),
            "quantity": i.quantity,
            "unit_price": i.unit_price,
        })).collect::<Vec<_>>(),
    })
}
