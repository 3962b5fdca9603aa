use async_trait::async_trait;
use mirror_core::{
    AccountInformation, Deal, InstanceIndex, Order, Position, PriceUpdate, ResyncScope,
    SymbolSpecification,
};

use crate::error::ListenerResult;

/// Receives ordered synchronization events for one account
///
/// Every handler defaults to a no-op so implementations only override what
/// they need. Handlers for one account are awaited one at a time, in packet
/// order.
#[async_trait]
pub trait SynchronizationListener: Send + Sync {
    /// Identifier used in logs
    fn name(&self) -> &str {
        "SynchronizationListener"
    }

    async fn on_connected(&self, instance_index: InstanceIndex, replicas: u32) -> ListenerResult {
        let _ = (instance_index, replicas);
        Ok(())
    }

    async fn on_disconnected(&self, instance_index: InstanceIndex) -> ListenerResult {
        let _ = instance_index;
        Ok(())
    }

    async fn on_broker_connection_status_changed(
        &self,
        instance_index: InstanceIndex,
        connected: bool,
    ) -> ListenerResult {
        let _ = (instance_index, connected);
        Ok(())
    }

    /// A resynchronization begins; the parts in `scope` are about to be
    /// resent and replaced
    async fn on_synchronization_started(
        &self,
        instance_index: InstanceIndex,
        synchronization_id: Option<&str>,
        scope: ResyncScope,
    ) -> ListenerResult {
        let _ = (instance_index, synchronization_id, scope);
        Ok(())
    }

    async fn on_account_information_updated(
        &self,
        instance_index: InstanceIndex,
        account_information: &AccountInformation,
    ) -> ListenerResult {
        let _ = (instance_index, account_information);
        Ok(())
    }

    async fn on_positions_replaced(
        &self,
        instance_index: InstanceIndex,
        positions: &[Position],
    ) -> ListenerResult {
        let _ = (instance_index, positions);
        Ok(())
    }

    async fn on_positions_synchronized(
        &self,
        instance_index: InstanceIndex,
        synchronization_id: Option<&str>,
    ) -> ListenerResult {
        let _ = (instance_index, synchronization_id);
        Ok(())
    }

    async fn on_position_updated(
        &self,
        instance_index: InstanceIndex,
        position: &Position,
    ) -> ListenerResult {
        let _ = (instance_index, position);
        Ok(())
    }

    async fn on_position_removed(
        &self,
        instance_index: InstanceIndex,
        position_id: &str,
    ) -> ListenerResult {
        let _ = (instance_index, position_id);
        Ok(())
    }

    async fn on_pending_orders_replaced(
        &self,
        instance_index: InstanceIndex,
        orders: &[Order],
    ) -> ListenerResult {
        let _ = (instance_index, orders);
        Ok(())
    }

    async fn on_pending_orders_synchronized(
        &self,
        instance_index: InstanceIndex,
        synchronization_id: Option<&str>,
    ) -> ListenerResult {
        let _ = (instance_index, synchronization_id);
        Ok(())
    }

    async fn on_pending_order_updated(
        &self,
        instance_index: InstanceIndex,
        order: &Order,
    ) -> ListenerResult {
        let _ = (instance_index, order);
        Ok(())
    }

    async fn on_pending_order_completed(
        &self,
        instance_index: InstanceIndex,
        order_id: &str,
    ) -> ListenerResult {
        let _ = (instance_index, order_id);
        Ok(())
    }

    async fn on_history_order_added(
        &self,
        instance_index: InstanceIndex,
        order: &Order,
    ) -> ListenerResult {
        let _ = (instance_index, order);
        Ok(())
    }

    async fn on_deal_added(&self, instance_index: InstanceIndex, deal: &Deal) -> ListenerResult {
        let _ = (instance_index, deal);
        Ok(())
    }

    async fn on_deals_synchronized(
        &self,
        instance_index: InstanceIndex,
        synchronization_id: Option<&str>,
    ) -> ListenerResult {
        let _ = (instance_index, synchronization_id);
        Ok(())
    }

    async fn on_history_orders_synchronized(
        &self,
        instance_index: InstanceIndex,
        synchronization_id: Option<&str>,
    ) -> ListenerResult {
        let _ = (instance_index, synchronization_id);
        Ok(())
    }

    async fn on_symbol_specifications_updated(
        &self,
        instance_index: InstanceIndex,
        specifications: &[SymbolSpecification],
        removed_symbols: &[String],
    ) -> ListenerResult {
        let _ = (instance_index, specifications, removed_symbols);
        Ok(())
    }

    async fn on_symbol_prices_updated(
        &self,
        instance_index: InstanceIndex,
        update: &PriceUpdate,
    ) -> ListenerResult {
        let _ = (instance_index, update);
        Ok(())
    }
}
