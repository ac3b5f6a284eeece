use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tracing::info;

use stockline_core::PaymentSessionId;
use stockline_infra::settlement::SettleOutcome;
use stockline_orders::{DraftItem, OrderDraft};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/notify", post(notify))
        .route("/confirm", post(confirm))
}

/// Payment-provider notification trigger (at-least-once delivery).
/// Signature verification happens upstream of this core.
pub async fn notify(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SettleRequest>,
) -> axum::response::Response {
    settle(services, body, "gateway_notification").await
}

/// Client success-redirect trigger, racing the notification above.
pub async fn confirm(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SettleRequest>,
) -> axum::response::Response {
    settle(services, body, "client_redirect").await
}

/// Both triggers funnel into the one idempotent settlement entry point and
/// report the same confirmed shape either way: "already settled" is a
/// success, not an error.
async fn settle(
    services: Arc<AppServices>,
    body: dto::SettleRequest,
    trigger: &'static str,
) -> axum::response::Response {
    let session = match PaymentSessionId::new(body.payment_session_id) {
        Ok(s) => s,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
    };

    let mut items = Vec::with_capacity(body.items.len());
    for item in body.items {
        let product_id = match dto::parse_product_id(&item.product_id) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let variant_id = match dto::parse_optional_variant_id(&item.variant_id) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        items.push(DraftItem {
            product_id,
            variant_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
        });
    }

    let mut draft = OrderDraft::new(items);
    if let Some(method) = body.payment_method {
        draft = draft.with_payment_method(method);
    }

    match services.settlement.settle(session.clone(), &draft).await {
        Ok(SettleOutcome::Created(order)) => {
            info!(session = %session, trigger, order_id = %order.id, "settlement created order");
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "status": "confirmed",
                    "already_settled": false,
                    "order": dto::order_to_json(&order),
                })),
            )
                .into_response()
        }
        Ok(SettleOutcome::AlreadySettled(order)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "confirmed",
                "already_settled": true,
                "order": dto::order_to_json(&order),
            })),
        )
            .into_response(),
        Err(e) => errors::settlement_error_to_response(e),
    }
}
