use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stockline_infra::reconciliation::ActiveCartLine;
use stockline_infra::stock_store::StockStore;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/reconcile", post(reconcile))
        .route("/reconcile/mismatches", get(list_mismatches))
}

/// Run the full reconciliation job now and return its report.
///
/// The orphan scan is only as good as the active cart lines supplied; an
/// empty body runs the healing passes alone.
pub async fn reconcile(
    Extension(services): Extension<Arc<AppServices>>,
    body: Option<Json<dto::ReconcileRequest>>,
) -> axum::response::Response {
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let mut active_lines = Vec::with_capacity(request.active_cart_lines.len());
    for line in request.active_cart_lines {
        let cart_line = match dto::parse_cart_line_id(&line.cart_line_id) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let product_id = match dto::parse_product_id(&line.product_id) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let variant_id = match dto::parse_optional_variant_id(&line.variant_id) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        active_lines.push(ActiveCartLine {
            line: cart_line,
            product_id,
            variant_id,
            quantity: line.quantity,
        });
    }

    let report = if active_lines.is_empty() {
        services.reconciliation.heal().await
    } else {
        services.reconciliation.run(&active_lines).await
    };

    (StatusCode::OK, Json(report)).into_response()
}

/// Read-only listing of products whose stock disagrees with their variant
/// sum. Useful before deciding to run a healing pass.
pub async fn list_mismatches(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.stock_store.mismatched_products().await {
        Ok(ids) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "count": ids.len(),
                "product_ids": ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
