//! Terminal State
//!
//! Listener that projects an account's synchronization events into per
//! instance state and exposes a combined read view. The combined view follows
//! the connected instance that started synchronizing most recently.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use mirror_core::{
    AccountInformation, InstanceIndex, Order, Position, PriceUpdate, ResyncScope, SymbolPrice,
    SymbolSpecification,
};
use mirror_ports::{ListenerResult, SynchronizationListener};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::TerminalStateConfig;
use crate::domain::InstanceState;

type Instances = Arc<Mutex<BTreeMap<InstanceIndex, InstanceState>>>;

/// In-memory projection of one account's remote terminal
pub struct TerminalState {
    account_id: String,
    config: TerminalStateConfig,
    instances: Instances,
    epochs: AtomicU64,
    /// Broker inactivity timers by instance
    status_timers: Mutex<HashMap<InstanceIndex, JoinHandle<()>>>,
}

impl TerminalState {
    pub fn new(account_id: impl Into<String>, config: TerminalStateConfig) -> Self {
        TerminalState {
            account_id: account_id.into(),
            config,
            instances: Arc::new(Mutex::new(BTreeMap::new())),
            epochs: AtomicU64::new(0),
            status_timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn update<R>(&self, instance_index: InstanceIndex, f: impl FnOnce(&mut InstanceState) -> R) -> R {
        let mut instances = self.instances.lock();
        let state = instances
            .entry(instance_index)
            .or_insert_with(|| InstanceState::new(instance_index));
        f(state)
    }

    fn read<R>(&self, f: impl FnOnce(&InstanceState) -> R) -> Option<R> {
        let instances = self.instances.lock();
        instances
            .values()
            .max_by_key(|s| (s.connected, s.synchronization_epoch))
            .map(f)
    }

    fn arm_status_timer(&self, instance_index: InstanceIndex) {
        let instances = Arc::clone(&self.instances);
        let timeout = self.config.broker_status_timeout;
        let account_id = self.account_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(state) = instances.lock().get_mut(&instance_index) {
                if state.connected_to_broker {
                    warn!(%account_id, instance_index, "No broker status received in time, marking disconnected from broker");
                }
                state.connected_to_broker = false;
            }
        });
        if let Some(previous) = self.status_timers.lock().insert(instance_index, timer) {
            previous.abort();
        }
    }

    fn clear_status_timer(&self, instance_index: InstanceIndex) {
        if let Some(timer) = self.status_timers.lock().remove(&instance_index) {
            timer.abort();
        }
    }

    /// True if any instance is connected to the terminal
    pub fn connected(&self) -> bool {
        self.instances.lock().values().any(|s| s.connected)
    }

    /// True if any instance reports a live broker connection
    pub fn connected_to_broker(&self) -> bool {
        self.instances.lock().values().any(|s| s.connected_to_broker)
    }

    pub fn account_information(&self) -> Option<AccountInformation> {
        self.read(|s| s.account_information.clone()).flatten()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.read(|s| s.positions.clone()).unwrap_or_default()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.read(|s| s.orders.clone()).unwrap_or_default()
    }

    pub fn specifications(&self) -> Vec<SymbolSpecification> {
        self.read(|s| s.specifications.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn specification(&self, symbol: &str) -> Option<SymbolSpecification> {
        self.read(|s| s.specifications.get(symbol).cloned()).flatten()
    }

    pub fn price(&self, symbol: &str) -> Option<SymbolPrice> {
        self.read(|s| s.prices.get(symbol).cloned()).flatten()
    }

    pub fn position(&self, position_id: &str) -> Option<Position> {
        self.read(|s| s.position(position_id).cloned()).flatten()
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.read(|s| s.order(order_id).cloned()).flatten()
    }

    pub fn positions_initialized(&self) -> bool {
        self.read(|s| s.positions_initialized).unwrap_or(false)
    }

    pub fn orders_initialized(&self) -> bool {
        self.read(|s| s.orders_initialized).unwrap_or(false)
    }

    /// True once the combined instance finished its deal synchronization
    pub fn is_synchronized(&self) -> bool {
        self.read(|s| s.synchronized).unwrap_or(false)
    }

    /// Snapshot of one instance's projection
    pub fn instance(&self, instance_index: InstanceIndex) -> Option<InstanceState> {
        self.instances.lock().get(&instance_index).cloned()
    }
}

impl Drop for TerminalState {
    fn drop(&mut self) {
        for (_, timer) in self.status_timers.lock().drain() {
            timer.abort();
        }
    }
}

#[async_trait]
impl SynchronizationListener for TerminalState {
    fn name(&self) -> &str {
        "TerminalState"
    }

    async fn on_connected(&self, instance_index: InstanceIndex, _replicas: u32) -> ListenerResult {
        self.update(instance_index, |s| s.connected = true);
        Ok(())
    }

    async fn on_disconnected(&self, instance_index: InstanceIndex) -> ListenerResult {
        self.clear_status_timer(instance_index);
        self.update(instance_index, InstanceState::on_disconnected);
        Ok(())
    }

    async fn on_broker_connection_status_changed(
        &self,
        instance_index: InstanceIndex,
        connected: bool,
    ) -> ListenerResult {
        self.update(instance_index, |s| s.connected_to_broker = connected);
        self.arm_status_timer(instance_index);
        Ok(())
    }

    async fn on_synchronization_started(
        &self,
        instance_index: InstanceIndex,
        synchronization_id: Option<&str>,
        scope: ResyncScope,
    ) -> ListenerResult {
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(account_id = %self.account_id, instance_index, ?synchronization_id, ?scope, "Resetting terminal state");
        self.update(instance_index, |s| s.reset(epoch, scope));
        Ok(())
    }

    async fn on_account_information_updated(
        &self,
        instance_index: InstanceIndex,
        account_information: &AccountInformation,
    ) -> ListenerResult {
        self.update(instance_index, |s| {
            s.account_information = Some(account_information.clone())
        });
        Ok(())
    }

    async fn on_positions_replaced(
        &self,
        instance_index: InstanceIndex,
        positions: &[Position],
    ) -> ListenerResult {
        self.update(instance_index, |s| s.replace_positions(positions));
        Ok(())
    }

    async fn on_position_updated(
        &self,
        instance_index: InstanceIndex,
        position: &Position,
    ) -> ListenerResult {
        self.update(instance_index, |s| s.upsert_position(position.clone()));
        Ok(())
    }

    async fn on_position_removed(
        &self,
        instance_index: InstanceIndex,
        position_id: &str,
    ) -> ListenerResult {
        self.update(instance_index, |s| s.remove_position(position_id));
        Ok(())
    }

    async fn on_pending_orders_replaced(
        &self,
        instance_index: InstanceIndex,
        orders: &[Order],
    ) -> ListenerResult {
        self.update(instance_index, |s| s.replace_orders(orders));
        Ok(())
    }

    async fn on_pending_order_updated(
        &self,
        instance_index: InstanceIndex,
        order: &Order,
    ) -> ListenerResult {
        self.update(instance_index, |s| s.upsert_order(order.clone()));
        Ok(())
    }

    async fn on_pending_order_completed(
        &self,
        instance_index: InstanceIndex,
        order_id: &str,
    ) -> ListenerResult {
        self.update(instance_index, |s| s.complete_order(order_id));
        Ok(())
    }

    async fn on_deals_synchronized(
        &self,
        instance_index: InstanceIndex,
        _synchronization_id: Option<&str>,
    ) -> ListenerResult {
        self.update(instance_index, |s| s.synchronized = true);
        Ok(())
    }

    async fn on_symbol_specifications_updated(
        &self,
        instance_index: InstanceIndex,
        specifications: &[SymbolSpecification],
        removed_symbols: &[String],
    ) -> ListenerResult {
        self.update(instance_index, |s| {
            s.update_specifications(specifications, removed_symbols)
        });
        Ok(())
    }

    async fn on_symbol_prices_updated(
        &self,
        instance_index: InstanceIndex,
        update: &PriceUpdate,
    ) -> ListenerResult {
        self.update(instance_index, |s| s.apply_prices(update));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::PositionType;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn state() -> TerminalState {
        TerminalState::new("acc", TerminalStateConfig::default())
    }

    #[tokio::test]
    async fn test_price_update_recomputes_profit() {
        let state = state();
        state
            .on_symbol_specifications_updated(0, &[SymbolSpecification::new("EURUSD", dec!(0.01))], &[])
            .await
            .unwrap();
        state
            .on_position_updated(
                0,
                &Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(2))
                    .with_current_tick_value(dec!(0.5)),
            )
            .await
            .unwrap();

        let update = PriceUpdate {
            prices: vec![SymbolPrice::new("EURUSD", dec!(10), dec!(11)).with_tick_values(dec!(0.5), dec!(0.5))],
            ..Default::default()
        };
        state.on_symbol_prices_updated(0, &update).await.unwrap();

        let position = state.position("1").unwrap();
        assert_eq!(position.profit, dec!(200));
        assert_eq!(position.current_price, dec!(10));
        assert_eq!(state.price("EURUSD").unwrap().ask, dec!(11));
    }

    #[tokio::test]
    async fn test_repeated_position_update_keeps_last() {
        let state = state();
        let position = Position::new("1", PositionType::Buy, "EURUSD", dec!(8), dec!(1));

        state
            .on_position_updated(0, &position.clone().with_profit(dec!(10)))
            .await
            .unwrap();
        state
            .on_position_updated(0, &position.with_profit(dec!(11)))
            .await
            .unwrap();

        let positions = state.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].profit, dec!(11));
    }

    #[tokio::test]
    async fn test_synchronization_start_wipes_state() {
        let state = state();
        state
            .on_account_information_updated(0, &AccountInformation::new(dec!(100), dec!(100)))
            .await
            .unwrap();
        state
            .on_positions_replaced(0, &[Position::new("1", PositionType::Sell, "EURUSD", dec!(8), dec!(1))])
            .await
            .unwrap();
        assert!(state.positions_initialized());

        state.on_synchronization_started(0, Some("sync"), ResyncScope::FULL).await.unwrap();

        assert!(state.account_information().is_none());
        assert!(state.positions().is_empty());
        assert!(!state.positions_initialized());
    }

    #[tokio::test]
    async fn test_combined_view_follows_latest_connected_instance() {
        let state = state();
        for instance in [0, 1] {
            state.on_connected(instance, 2).await.unwrap();
            state.on_synchronization_started(instance, None, ResyncScope::FULL).await.unwrap();
            state
                .on_account_information_updated(
                    instance,
                    &AccountInformation::new(dec!(100) + rust_decimal::Decimal::from(instance), dec!(0)),
                )
                .await
                .unwrap();
        }
        assert_eq!(state.account_information().unwrap().balance, dec!(101));

        state.on_disconnected(1).await.unwrap();
        assert_eq!(state.account_information().unwrap().balance, dec!(100));
        assert!(state.connected());
    }

    #[tokio::test]
    async fn test_deal_synchronization_marks_synchronized() {
        let state = state();
        state.on_synchronization_started(0, None, ResyncScope::FULL).await.unwrap();
        assert!(!state.is_synchronized());

        state.on_deals_synchronized(0, None).await.unwrap();
        assert!(state.is_synchronized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_status_expires_without_refresh() {
        let state = TerminalState::new(
            "acc",
            TerminalStateConfig {
                broker_status_timeout: Duration::from_secs(60),
            },
        );

        state.on_broker_connection_status_changed(0, true).await.unwrap();
        tokio::time::sleep(Duration::from_secs(50)).await;
        state.on_broker_connection_status_changed(0, true).await.unwrap();
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(state.connected_to_broker());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!state.connected_to_broker());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_broker_flag_and_timer() {
        let state = state();
        state.on_connected(0, 1).await.unwrap();
        state.on_broker_connection_status_changed(0, true).await.unwrap();

        state.on_disconnected(0).await.unwrap();

        assert!(!state.connected());
        assert!(!state.connected_to_broker());
        assert!(state.status_timers.lock().is_empty());
    }
}
