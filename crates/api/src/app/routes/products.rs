use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stockline_catalog::{Product, ProductVariant, VariantAttributes};
use stockline_core::{ProductId, VariantId};
use stockline_infra::stock_store::{StockStore, StockTarget};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product))
        .route("/:id", get(get_product))
        .route("/:id/availability", get(get_availability))
}

/// Seed a product (with optional variants). Ops surface: checkout UI logic
/// never mutates the catalog directly.
pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let product_id = ProductId::new();

    let product = match Product::new(product_id, body.name, body.stock) {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };

    let product = if body.variants.is_empty() {
        product
    } else {
        let variants: Result<Vec<ProductVariant>, _> = body
            .variants
            .into_iter()
            .map(|v| {
                ProductVariant::new(
                    VariantId::new(),
                    product_id,
                    VariantAttributes {
                        size: v.size,
                        color: v.color,
                    },
                    v.stock,
                )
            })
            .collect();

        let variants = match variants {
            Ok(v) => v,
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
            }
        };
        match product.with_variants(variants) {
            Ok(p) => p,
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
            }
        }
    };

    if let Err(e) = services.stock_store.insert_product(product.clone()).await {
        return errors::store_error_to_response(e);
    }

    (StatusCode::CREATED, Json(dto::product_to_json(&product))).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match dto::parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.stock_store.get_product(product_id).await {
        Ok(Some(product)) => (StatusCode::OK, Json(dto::product_to_json(&product))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_availability(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::AvailabilityQuery>,
) -> axum::response::Response {
    let product_id = match dto::parse_product_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let variant_id = match dto::parse_optional_variant_id(&query.variant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .ledger
        .available(StockTarget::of(product_id, variant_id))
        .await
    {
        Ok(available) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "product_id": product_id.to_string(),
                "variant_id": variant_id.map(|v| v.to_string()),
                "available": available,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
