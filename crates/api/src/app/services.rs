//! Service wiring: store backend selection plus the four services.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use stockline_infra::ledger::StockLedger;
use stockline_infra::order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use stockline_infra::reconciliation::ReconciliationJob;
use stockline_infra::reservation::ReservationService;
use stockline_infra::settlement::SettlementCoordinator;
use stockline_infra::stock_store::{InMemoryStockStore, PostgresStockStore, StockStore};

pub type DynStockStore = Arc<dyn StockStore>;
pub type DynOrderStore = Arc<dyn OrderStore>;

/// Everything the handlers need, behind one `Extension`.
pub struct AppServices {
    pub stock_store: DynStockStore,
    pub ledger: StockLedger<DynStockStore>,
    pub reservations: ReservationService<DynStockStore>,
    pub settlement: SettlementCoordinator<DynOrderStore>,
    pub reconciliation: ReconciliationJob<DynStockStore, DynOrderStore>,
}

/// Wire services against Postgres when `DATABASE_URL` is set, otherwise
/// against the in-memory stores (dev mode, not durable).
pub async fn build_services() -> anyhow::Result<AppServices> {
    let (stock_store, order_store): (DynStockStore, DynOrderStore) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(&url)
                    .await?;
                (
                    Arc::new(PostgresStockStore::new(pool.clone())),
                    Arc::new(PostgresOrderStore::new(pool)),
                )
            }
            Err(_) => {
                tracing::warn!("DATABASE_URL not set; using in-memory stores (not durable)");
                (
                    Arc::new(InMemoryStockStore::new()),
                    Arc::new(InMemoryOrderStore::new()),
                )
            }
        };

    Ok(AppServices {
        ledger: StockLedger::new(stock_store.clone()),
        reservations: ReservationService::new(StockLedger::new(stock_store.clone())),
        settlement: SettlementCoordinator::new(order_store.clone()),
        reconciliation: ReconciliationJob::new(stock_store.clone(), order_store),
        stock_store,
    })
}
