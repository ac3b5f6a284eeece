use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockline_catalog::Product;
use stockline_core::ProductId;
use stockline_infra::ledger::StockLedger;
use stockline_infra::stock_store::{InMemoryStockStore, StockStore, StockTarget};

/// Naive two-step baseline: read the count, compute in application code,
/// write it back. This is the lost-update-prone shape the ledger exists to
/// replace; benchmarked here so the conditional-update path has a floor to
/// compare against.
#[derive(Debug, Clone)]
struct NaiveReadWriteStore {
    inner: Arc<RwLock<HashMap<ProductId, i64>>>,
}

impl NaiveReadWriteStore {
    fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn create(&self, id: ProductId, stock: i64) {
        self.inner.write().unwrap().insert(id, stock);
    }

    fn adjust(&self, id: ProductId, delta: i64) -> Result<i64, ()> {
        // Step 1: read.
        let current = *self.inner.read().unwrap().get(&id).ok_or(())?;
        // Step 2: compute and write back. Another worker can interleave here.
        let next = current + delta;
        if next < 0 {
            return Err(());
        }
        self.inner.write().unwrap().insert(id, next);
        Ok(next)
    }
}

fn bench_adjust(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("tokio runtime");

    let mut group = c.benchmark_group("stock_adjust");

    for ops in [100u64, 1_000] {
        group.throughput(Throughput::Elements(ops));

        group.bench_with_input(BenchmarkId::new("ledger_conditional", ops), &ops, |b, &ops| {
            b.iter(|| {
                rt.block_on(async {
                    let store = Arc::new(InMemoryStockStore::new());
                    let product_id = ProductId::new();
                    store
                        .insert_product(
                            Product::new(product_id, "Bench", ops as i64).unwrap(),
                        )
                        .await
                        .unwrap();
                    let ledger = StockLedger::new(store);
                    let target = StockTarget::Product(product_id);

                    for _ in 0..ops {
                        black_box(ledger.adjust(target, -1).await.unwrap());
                    }
                    for _ in 0..ops {
                        black_box(ledger.adjust(target, 1).await.unwrap());
                    }
                })
            })
        });

        group.bench_with_input(BenchmarkId::new("naive_read_write", ops), &ops, |b, &ops| {
            b.iter(|| {
                let store = NaiveReadWriteStore::new();
                let product_id = ProductId::new();
                store.create(product_id, ops as i64);

                for _ in 0..ops {
                    black_box(store.adjust(product_id, -1).unwrap());
                }
                for _ in 0..ops {
                    black_box(store.adjust(product_id, 1).unwrap());
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_adjust);
criterion_main!(benches);
