//! Black-box tests over the HTTP surface: the same router production
//! serves, bound to an ephemeral port, driven with a real client.

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;

use stockline_api::app::services::AppServices;
use stockline_infra::ledger::StockLedger;
use stockline_infra::order_store::InMemoryOrderStore;
use stockline_infra::reconciliation::ReconciliationJob;
use stockline_infra::reservation::ReservationService;
use stockline_infra::settlement::SettlementCoordinator;
use stockline_infra::stock_store::InMemoryStockStore;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Build the production router around in-memory stores (no env
    /// involved, so tests stay hermetic) and bind an ephemeral port.
    async fn spawn() -> Self {
        let stock_store: stockline_api::app::services::DynStockStore =
            Arc::new(InMemoryStockStore::new());
        let order_store: stockline_api::app::services::DynOrderStore =
            Arc::new(InMemoryOrderStore::new());

        let services = Arc::new(AppServices {
            ledger: StockLedger::new(stock_store.clone()),
            reservations: ReservationService::new(StockLedger::new(stock_store.clone())),
            settlement: SettlementCoordinator::new(order_store.clone()),
            reconciliation: ReconciliationJob::new(stock_store.clone(), order_store),
            stock_store,
        });

        let app = stockline_api::app::build_router(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn cart_line() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[tokio::test]
async fn health_endpoint_responds() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn full_checkout_flow_over_http() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Seed a product with two variants.
    let res = client
        .post(format!("{}/products", server.base_url))
        .json(&json!({
            "name": "Shirt",
            "variants": [
                { "size": "S", "stock": 3 },
                { "size": "M", "stock": 2 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let product: serde_json::Value = res.json().await.unwrap();
    let product_id = product["id"].as_str().unwrap().to_string();
    let small_id = product["variants"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(product["stock"], 3 + 2);
    assert_eq!(product["is_active"], true);

    // Availability of the small variant.
    let res = client
        .get(format!(
            "{}/products/{}/availability?variant_id={}",
            server.base_url, product_id, small_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["available"], 3);

    // Reserve two units of S.
    let res = client
        .post(format!("{}/cart/reserve", server.base_url))
        .json(&json!({
            "cart_line_id": cart_line(),
            "product_id": product_id,
            "variant_id": small_id,
            "quantity": 2
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "reserved");
    assert_eq!(body["available"], 1);

    // A second reservation of two more is rejected; only one unit is left.
    let res = client
        .post(format!("{}/cart/reserve", server.base_url))
        .json(&json!({
            "cart_line_id": cart_line(),
            "product_id": product_id,
            "variant_id": small_id,
            "quantity": 2
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_stock");
    assert_eq!(body["available"], 1);

    // Payment completes. Both triggers fire with the same payload.
    let settle_payload = json!({
        "payment_session_id": "sess_http_123",
        "payment_method": "card",
        "items": [
            {
                "product_id": product_id,
                "variant_id": small_id,
                "quantity": 2,
                "unit_price": 1999
            }
        ]
    });

    let res = client
        .post(format!("{}/checkout/notify", server.base_url))
        .json(&settle_payload)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let webhook: serde_json::Value = res.json().await.unwrap();
    assert_eq!(webhook["status"], "confirmed");
    assert_eq!(webhook["already_settled"], false);
    let order_id = webhook["order"]["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{}/checkout/confirm", server.base_url))
        .json(&settle_payload)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let redirect: serde_json::Value = res.json().await.unwrap();
    assert_eq!(redirect["status"], "confirmed");
    assert_eq!(redirect["already_settled"], true);
    assert_eq!(redirect["order"]["id"], order_id.as_str());
    assert_eq!(redirect["order"]["total"], 2 * 1999);

    // Settlement did not touch the ledger again.
    let res = client
        .get(format!("{}/products/{}", server.base_url, product_id))
        .send()
        .await
        .unwrap();
    let product: serde_json::Value = res.json().await.unwrap();
    assert_eq!(product["stock"], 3);
    assert_eq!(product["variants"][0]["stock"], 1);

    // Nothing for reconciliation to do.
    let res = client
        .post(format!("{}/admin/reconcile", server.base_url))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: serde_json::Value = res.json().await.unwrap();
    assert_eq!(report["duplicates"]["groups_found"], 0);
    assert_eq!(report["mismatches"]["mismatches_found"], 0);
}

#[tokio::test]
async fn release_returns_units_over_http() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/products", server.base_url))
        .json(&json!({ "name": "Mug", "stock": 5 }))
        .send()
        .await
        .unwrap();
    let product: serde_json::Value = res.json().await.unwrap();
    let product_id = product["id"].as_str().unwrap().to_string();

    let line = cart_line();
    let res = client
        .post(format!("{}/cart/reserve", server.base_url))
        .json(&json!({
            "cart_line_id": line,
            "product_id": product_id,
            "quantity": 5
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(format!("{}/cart/release", server.base_url))
        .json(&json!({
            "cart_line_id": line,
            "product_id": product_id,
            "quantity": 5
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["available"], 5);

    let res = client
        .get(format!("{}/products/{}", server.base_url, product_id))
        .send()
        .await
        .unwrap();
    let product: serde_json::Value = res.json().await.unwrap();
    assert_eq!(product["stock"], 5);
    assert_eq!(product["is_active"], true);
}

#[tokio::test]
async fn unknown_product_is_a_404_not_a_crash() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!(
            "{}/products/{}",
            server.base_url,
            uuid::Uuid::now_v7()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(format!("{}/cart/reserve", server.base_url))
        .json(&json!({
            "cart_line_id": cart_line(),
            "product_id": uuid::Uuid::now_v7().to_string(),
            "quantity": 1
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
