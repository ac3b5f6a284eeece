use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockline_infra::{LedgerError, SettlementError, StoreError};

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::InsufficientStock {
            requested,
            available,
        } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "insufficient_stock",
                "message": "insufficient stock, please adjust quantity",
                "requested": requested,
                "available": available,
            })),
        )
            .into_response(),
        LedgerError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        LedgerError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", "unknown product or variant")
        }
        LedgerError::Store(e) => store_error_to_response(e),
    }
}

pub fn settlement_error_to_response(err: SettlementError) -> axum::response::Response {
    match err {
        SettlementError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        // Retryable: the idempotency constraint makes re-submission safe.
        SettlementError::Conflict(msg) => {
            json_error(StatusCode::CONFLICT, "settlement_conflict", msg)
        }
        SettlementError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Constraint(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "constraint_violation", msg)
        }
        StoreError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
