//! In-memory history storage
//!
//! Keeps history orders and deals per instance, ordered by time and unique by
//! id. Nothing is persisted.

use std::collections::HashMap;

use async_trait::async_trait;
use mirror_core::{Deal, InstanceIndex, Order, ResyncScope, Timestamp};
use mirror_ports::{HistoryStorage, ListenerResult, SynchronizationListener};
use parking_lot::Mutex;

#[derive(Default)]
struct InstanceHistory {
    orders: Vec<Order>,
    deals: Vec<Deal>,
    orders_synchronized: bool,
    deals_synchronized: bool,
}

impl InstanceHistory {
    fn add_order(&mut self, order: Order) {
        self.orders.retain(|o| o.id != order.id);
        let time = order.history_time();
        let position = self.orders.partition_point(|o| o.history_time() <= time);
        self.orders.insert(position, order);
    }

    fn add_deal(&mut self, deal: Deal) {
        self.deals.retain(|d| d.id != deal.id);
        let position = self.deals.partition_point(|d| d.time <= deal.time);
        self.deals.insert(position, deal);
    }
}

/// History storage held in process memory
#[derive(Default)]
pub struct InMemoryHistoryStorage {
    instances: Mutex<HashMap<InstanceIndex, InstanceHistory>>,
}

impl InMemoryHistoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// History orders of an instance, oldest first
    pub fn history_orders(&self, instance_index: InstanceIndex) -> Vec<Order> {
        self.instances
            .lock()
            .get(&instance_index)
            .map(|h| h.orders.clone())
            .unwrap_or_default()
    }

    /// Deals of an instance, oldest first
    pub fn deals(&self, instance_index: InstanceIndex) -> Vec<Deal> {
        self.instances
            .lock()
            .get(&instance_index)
            .map(|h| h.deals.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SynchronizationListener for InMemoryHistoryStorage {
    fn name(&self) -> &str {
        "InMemoryHistoryStorage"
    }

    async fn on_synchronization_started(
        &self,
        instance_index: InstanceIndex,
        _synchronization_id: Option<&str>,
        _scope: ResyncScope,
    ) -> ListenerResult {
        let mut instances = self.instances.lock();
        let history = instances.entry(instance_index).or_default();
        history.orders_synchronized = false;
        history.deals_synchronized = false;
        Ok(())
    }

    async fn on_history_order_added(
        &self,
        instance_index: InstanceIndex,
        order: &Order,
    ) -> ListenerResult {
        self.instances
            .lock()
            .entry(instance_index)
            .or_default()
            .add_order(order.clone());
        Ok(())
    }

    async fn on_deal_added(&self, instance_index: InstanceIndex, deal: &Deal) -> ListenerResult {
        self.instances
            .lock()
            .entry(instance_index)
            .or_default()
            .add_deal(deal.clone());
        Ok(())
    }

    async fn on_history_orders_synchronized(
        &self,
        instance_index: InstanceIndex,
        _synchronization_id: Option<&str>,
    ) -> ListenerResult {
        self.instances
            .lock()
            .entry(instance_index)
            .or_default()
            .orders_synchronized = true;
        Ok(())
    }

    async fn on_deals_synchronized(
        &self,
        instance_index: InstanceIndex,
        _synchronization_id: Option<&str>,
    ) -> ListenerResult {
        self.instances
            .lock()
            .entry(instance_index)
            .or_default()
            .deals_synchronized = true;
        Ok(())
    }
}

#[async_trait]
impl HistoryStorage for InMemoryHistoryStorage {
    async fn last_history_order_time(&self, instance_index: InstanceIndex) -> Option<Timestamp> {
        self.instances
            .lock()
            .get(&instance_index)
            .and_then(|h| h.orders.last())
            .and_then(Order::history_time)
    }

    async fn last_deal_time(&self, instance_index: InstanceIndex) -> Option<Timestamp> {
        self.instances
            .lock()
            .get(&instance_index)
            .and_then(|h| h.deals.last())
            .map(|d| d.time)
    }

    fn is_synchronized(&self, instance_index: InstanceIndex) -> bool {
        self.instances
            .lock()
            .get(&instance_index)
            .is_some_and(|h| h.orders_synchronized && h.deals_synchronized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mirror_core::{DealType, OrderType};
    use rust_decimal_macros::dec;

    fn at(minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn test_deals_kept_in_time_order_and_unique() {
        let storage = InMemoryHistoryStorage::new();

        storage.on_deal_added(0, &Deal::new("2", DealType::Buy, at(5))).await.unwrap();
        storage.on_deal_added(0, &Deal::new("1", DealType::Buy, at(1))).await.unwrap();
        storage.on_deal_added(0, &Deal::new("2", DealType::Buy, at(7))).await.unwrap();

        let ids: Vec<_> = storage.deals(0).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(storage.last_deal_time(0).await, Some(at(7)));
        assert_eq!(storage.last_deal_time(1).await, None);
    }

    #[tokio::test]
    async fn test_last_history_order_time_uses_done_time() {
        let storage = InMemoryHistoryStorage::new();

        let order = Order::new("o", OrderType::Buy, "EURUSD", dec!(1)).with_done_time(at(9));
        storage.on_history_order_added(0, &order).await.unwrap();

        assert_eq!(storage.last_history_order_time(0).await, Some(at(9)));
    }

    #[tokio::test]
    async fn test_synchronized_needs_both_streams() {
        let storage = InMemoryHistoryStorage::new();

        storage.on_deals_synchronized(0, None).await.unwrap();
        assert!(!storage.is_synchronized(0));

        storage.on_history_orders_synchronized(0, None).await.unwrap();
        assert!(storage.is_synchronized(0));

        storage.on_synchronization_started(0, None, ResyncScope::FULL).await.unwrap();
        assert!(!storage.is_synchronized(0));
    }
}
