use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use stockline_core::{OrderId, PaymentSessionId};
use stockline_orders::{Order, OrderDraft};

use super::r#trait::{settled_order, InsertOutcome, OrderStore};
use crate::store::StoreError;

#[derive(Debug, Default)]
struct OrderMap {
    orders: HashMap<OrderId, Order>,
    /// Uniqueness index over payment sessions. `insert_unchecked` can put
    /// duplicates into `orders` without touching this, mirroring a database
    /// whose unique index was added after the legacy rows.
    by_session: HashMap<PaymentSessionId, OrderId>,
}

/// In-memory order store.
///
/// Intended for tests/dev. `insert_settled` holds the single mutex for its
/// full duration, so the uniqueness check and the write are one critical
/// section, the same guarantee the Postgres backend gets from its unique
/// index.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    inner: Mutex<OrderMap>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, OrderMap>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    /// Orders for a session sorted the way reconciliation ranks survivors.
    fn session_orders(map: &OrderMap, session: &PaymentSessionId) -> Vec<Order> {
        let mut matching: Vec<Order> = map
            .orders
            .values()
            .filter(|o| o.payment_session_id.as_ref() == Some(session))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matching
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_settled(
        &self,
        session: PaymentSessionId,
        draft: &OrderDraft,
        order_id: OrderId,
    ) -> Result<InsertOutcome, StoreError> {
        let mut map = self.lock()?;

        if map.by_session.contains_key(&session)
            || !Self::session_orders(&map, &session).is_empty()
        {
            return Ok(InsertOutcome::DuplicateSession);
        }

        let order = settled_order(session.clone(), draft, order_id, Utc::now());
        map.by_session.insert(session, order_id);
        map.orders.insert(order_id, order.clone());
        Ok(InsertOutcome::Inserted(order))
    }

    async fn find_by_session(
        &self,
        session: &PaymentSessionId,
    ) -> Result<Option<Order>, StoreError> {
        let map = self.lock()?;
        Ok(Self::session_orders(&map, session).into_iter().next())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let map = self.lock()?;
        Ok(map.orders.get(&id).cloned())
    }

    async fn delete_with_items(&self, id: OrderId) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        let removed = map
            .orders
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;

        // Keep the session index pointing at a live order, if any remain.
        if let Some(session) = removed.payment_session_id {
            match Self::session_orders(&map, &session).into_iter().next() {
                Some(remaining) => {
                    map.by_session.insert(session, remaining.id);
                }
                None => {
                    map.by_session.remove(&session);
                }
            }
        }
        Ok(())
    }

    async fn duplicate_session_groups(&self) -> Result<Vec<Vec<Order>>, StoreError> {
        let map = self.lock()?;

        let mut sessions: Vec<PaymentSessionId> = map
            .orders
            .values()
            .filter_map(|o| o.payment_session_id.clone())
            .collect();
        sessions.sort();
        sessions.dedup();

        let mut groups = Vec::new();
        for session in sessions {
            let group = Self::session_orders(&map, &session);
            if group.len() > 1 {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    async fn merge_payment_method(&self, id: OrderId, method: &str) -> Result<bool, StoreError> {
        let mut map = self.lock()?;
        let order = map
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;

        if order.payment_method.is_some() {
            return Ok(false);
        }
        order.payment_method = Some(method.to_string());
        Ok(true)
    }

    async fn insert_unchecked(&self, order: Order) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        if let Some(session) = order.payment_session_id.clone() {
            map.by_session.entry(session).or_insert(order.id);
        }
        map.orders.insert(order.id, order);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockline_core::ProductId;
    use stockline_orders::DraftItem;

    fn draft() -> OrderDraft {
        OrderDraft::new(vec![DraftItem {
            product_id: ProductId::new(),
            variant_id: None,
            quantity: 2,
            unit_price: 1_000,
        }])
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn second_insert_for_same_session_is_duplicate() {
        let store = InMemoryOrderStore::new();
        let session = PaymentSessionId::new("sess_123").unwrap();

        let first = block_on(store.insert_settled(session.clone(), &draft(), OrderId::new()))
            .unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = block_on(store.insert_settled(session.clone(), &draft(), OrderId::new()))
            .unwrap();
        assert_eq!(second, InsertOutcome::DuplicateSession);

        let found = block_on(store.find_by_session(&session)).unwrap().unwrap();
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.total, 2_000);
    }

    #[test]
    fn insert_unchecked_stages_duplicates_for_reconciliation() {
        let store = InMemoryOrderStore::new();
        let session = PaymentSessionId::new("sess_dup").unwrap();

        let first = match block_on(store.insert_settled(
            session.clone(),
            &draft(),
            OrderId::new(),
        ))
        .unwrap()
        {
            InsertOutcome::Inserted(o) => o,
            other => panic!("expected insert, got {other:?}"),
        };

        let mut shadow = first.clone();
        shadow.id = OrderId::new();
        shadow.created_at = first.created_at + chrono::Duration::seconds(1);
        block_on(store.insert_unchecked(shadow)).unwrap();

        let groups = block_on(store.duplicate_session_groups()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][0].id, first.id, "earliest order ranks first");
    }

    #[test]
    fn delete_with_items_repairs_the_session_index() {
        let store = InMemoryOrderStore::new();
        let session = PaymentSessionId::new("sess_del").unwrap();

        let kept = match block_on(store.insert_settled(
            session.clone(),
            &draft(),
            OrderId::new(),
        ))
        .unwrap()
        {
            InsertOutcome::Inserted(o) => o,
            other => panic!("expected insert, got {other:?}"),
        };

        let mut dup = kept.clone();
        dup.id = OrderId::new();
        dup.created_at = kept.created_at + chrono::Duration::seconds(5);
        block_on(store.insert_unchecked(dup.clone())).unwrap();

        block_on(store.delete_with_items(dup.id)).unwrap();

        let found = block_on(store.find_by_session(&session)).unwrap().unwrap();
        assert_eq!(found.id, kept.id);
        assert!(block_on(store.duplicate_session_groups()).unwrap().is_empty());
    }

    #[test]
    fn merge_payment_method_only_fills_gaps() {
        let store = InMemoryOrderStore::new();
        let session = PaymentSessionId::new("sess_pm").unwrap();

        let order = match block_on(store.insert_settled(
            session,
            &draft(),
            OrderId::new(),
        ))
        .unwrap()
        {
            InsertOutcome::Inserted(o) => o,
            other => panic!("expected insert, got {other:?}"),
        };
        assert!(order.payment_method.is_none());

        assert!(block_on(store.merge_payment_method(order.id, "card")).unwrap());
        assert!(!block_on(store.merge_payment_method(order.id, "bank")).unwrap());

        let stored = block_on(store.get(order.id)).unwrap().unwrap();
        assert_eq!(stored.payment_method.as_deref(), Some("card"));
    }
}
