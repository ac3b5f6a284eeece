use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use stockline_infra::reservation::ReserveOutcome;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/reserve", post(reserve))
        .route("/release", post(release))
}

/// Hold units for a cart line. The cart must call this exactly once per
/// add transition; a rejection means the line must not be added.
pub async fn reserve(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ReserveRequest>,
) -> axum::response::Response {
    let line = match dto::parse_cart_line_id(&body.cart_line_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product_id = match dto::parse_product_id(&body.product_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let variant_id = match dto::parse_optional_variant_id(&body.variant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .reservations
        .reserve(line, product_id, variant_id, body.quantity)
        .await
    {
        Ok(ReserveOutcome::Reserved { available }) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "reserved",
                "available": available,
            })),
        )
            .into_response(),
        Ok(ReserveOutcome::Rejected {
            requested,
            available,
        }) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "insufficient_stock",
                "message": "insufficient stock, please adjust quantity",
                "requested": requested,
                "available": available,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Return units when a cart line is removed or its checkout is abandoned.
/// Exactly once per remove transition; the ledger cannot detect duplicates.
pub async fn release(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ReleaseRequest>,
) -> axum::response::Response {
    let line = match dto::parse_cart_line_id(&body.cart_line_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product_id = match dto::parse_product_id(&body.product_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let variant_id = match dto::parse_optional_variant_id(&body.variant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .reservations
        .release(line, product_id, variant_id, body.quantity)
        .await
    {
        Ok(available) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "released",
                "available": available,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
