use std::sync::Arc;
use std::time::Duration;

use stockline_infra::jobs::{spawn_reconciliation_runner, RunnerConfig};

#[tokio::main]
async fn main() {
    stockline_observability::init();

    let services = Arc::new(
        stockline_api::app::services::build_services()
            .await
            .expect("failed to build services"),
    );

    let reconcile_secs: u64 = std::env::var("RECONCILE_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let _runner = if reconcile_secs > 0 {
        Some(spawn_reconciliation_runner(
            services.reconciliation.clone(),
            RunnerConfig::new(Duration::from_secs(reconcile_secs)),
        ))
    } else {
        tracing::info!(
            "scheduled reconciliation disabled; POST /admin/reconcile runs it on demand"
        );
        None
    };

    let app = stockline_api::app::build_router(services);

    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind}: {e}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
