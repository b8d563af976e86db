use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::order::{NewOrder, Order, OrderStatus};

use super::{OrderPatch, OrderRepository, ReadyFilter};

// ============================================================================
// In-Memory Adapter
// ============================================================================
//
// Backs the test suites and local development. The mutex IS the store: every
// conditional operation performs its precondition check and its write inside
// one critical section, so the observable contract (CAS on lock/status,
// per-row bulk claim) matches the real adapters exactly.
//
// ============================================================================

#[derive(Default)]
pub struct MemoryOrderRepository {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.lock().await.get(&id).cloned())
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .await
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect())
    }

    async fn find_by_fulfillment_date(&self, date: NaiveDate) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .await
            .values()
            .filter(|o| o.fulfillment.selected_date == date)
            .cloned()
            .collect())
    }

    async fn find_by_created_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .await
            .values()
            .filter(|o| o.created_at >= from && o.created_at < to)
            .cloned()
            .collect())
    }

    async fn find_by_lock(&self, token: &str) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .await
            .values()
            .filter(|o| o.lock.as_deref() == Some(token))
            .cloned()
            .collect())
    }

    async fn create(&self, new: NewOrder) -> Result<Order> {
        let order = new.into_order(Uuid::new_v4(), Utc::now());
        self.orders.lock().await.insert(order.id, order.clone());
        Ok(order)
    }

    async fn bulk_create(&self, new: Vec<NewOrder>) -> Result<Vec<Order>> {
        let now = Utc::now();
        let mut guard = self.orders.lock().await;
        let mut created = Vec::with_capacity(new.len());
        for n in new {
            let order = n.into_order(Uuid::new_v4(), now);
            guard.insert(order.id, order.clone());
            created.push(order);
        }
        Ok(created)
    }

    async fn try_acquire_lock(&self, id: Uuid, token: &str) -> Result<Option<Order>> {
        let mut guard = self.orders.lock().await;
        match guard.get_mut(&id) {
            Some(order) if !order.is_locked() => {
                order.lock = Some(token.to_string());
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn acquire_lock(
        &self,
        id: Uuid,
        expected_status: OrderStatus,
        token: &str,
    ) -> Result<Option<Order>> {
        let mut guard = self.orders.lock().await;
        match guard.get_mut(&id) {
            Some(order) if !order.is_locked() && order.status == expected_status => {
                order.lock = Some(token.to_string());
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_with_lock(
        &self,
        id: Uuid,
        expected_lock: Option<&str>,
        patch: OrderPatch,
    ) -> Result<Option<Order>> {
        let mut guard = self.orders.lock().await;
        match guard.get_mut(&id) {
            Some(order) if order.lock.as_deref() == expected_lock => {
                patch.apply(order, Utc::now());
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_lock(&self, id: Uuid) -> Result<()> {
        let mut guard = self.orders.lock().await;
        if let Some(order) = guard.get_mut(&id) {
            order.lock = None;
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn lock_ready_orders(&self, filter: ReadyFilter, token: &str) -> Result<u64> {
        let mut guard = self.orders.lock().await;
        let mut claimed = 0u64;
        for order in guard.values_mut() {
            if order.lock.is_none()
                && order.status == filter.status
                && order.fulfillment.status == filter.fulfillment_status
                && order.fulfillment.selected_date == filter.selected_date
                && order.fulfillment.selected_time <= filter.max_selected_time
            {
                order.lock = Some(token.to_string());
                order.updated_at = Utc::now();
                claimed += 1;
            }
        }
        Ok(claimed)
    }

    async fn unlock_all(&self) -> Result<u64> {
        let mut guard = self.orders.lock().await;
        let mut cleared = 0u64;
        for order in guard.values_mut() {
            if order.lock.take().is_some() {
                order.updated_at = Utc::now();
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.orders.lock().await.remove(&id).is_some())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
