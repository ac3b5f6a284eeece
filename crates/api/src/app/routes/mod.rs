use axum::Router;

pub mod admin;
pub mod cart;
pub mod checkout;
pub mod products;
pub mod system;

/// Router for all service endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/products", products::router())
        .nest("/cart", cart::router())
        .nest("/checkout", checkout::router())
        .nest("/admin", admin::router())
}
