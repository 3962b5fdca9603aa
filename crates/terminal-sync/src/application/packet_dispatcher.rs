//! Packet Dispatcher
//!
//! Fans ordered packets out to the synchronization listeners registered for
//! their account. Each handler call is awaited before the next one starts, so
//! every listener observes the same event order. A failing or panicking
//! listener is logged and skipped.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use mirror_core::{AccountUpdate, PacketEvent, SyncPacket};
use mirror_ports::{ListenerResult, SynchronizationListener};
use parking_lot::RwLock;
use tracing::{debug, error, trace};

type Listener = Arc<dyn SynchronizationListener>;

/// Invoke one handler on every listener in turn, isolating failures
macro_rules! notify {
    ($self:ident, $listeners:expr, $packet:expr, $handler:literal, |$listener:ident| $call:expr) => {
        for $listener in $listeners.iter() {
            let outcome = AssertUnwindSafe($call).catch_unwind().await;
            $self.report($listener.as_ref(), $packet, $handler, outcome);
        }
    };
}

/// Routes packets to per-account listeners
#[derive(Default)]
pub struct PacketDispatcher {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    failures: AtomicU64,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, account_id: &str, listener: Listener) {
        debug!(account_id, listener = listener.name(), "Adding synchronization listener");
        self.listeners
            .write()
            .entry(account_id.to_string())
            .or_default()
            .push(listener);
    }

    /// Remove a listener by identity
    pub fn remove_listener(&self, account_id: &str, listener: &Listener) {
        let mut listeners = self.listeners.write();
        if let Some(registered) = listeners.get_mut(account_id) {
            registered.retain(|l| !Arc::ptr_eq(l, listener));
            if registered.is_empty() {
                listeners.remove(account_id);
            }
        }
    }

    pub fn remove_account(&self, account_id: &str) {
        self.listeners.write().remove(account_id);
    }

    pub fn listener_count(&self, account_id: &str) -> usize {
        self.listeners
            .read()
            .get(account_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Handler invocations that failed or panicked since creation
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Deliver one packet to every listener of its account
    pub async fn dispatch(&self, packet: &SyncPacket) {
        let listeners: Vec<Listener> = match self.listeners.read().get(&packet.account_id) {
            Some(listeners) => listeners.clone(),
            None => return,
        };
        let instance = packet.instance();
        let synchronization_id = packet.synchronization_id.as_deref();
        trace!(
            account_id = %packet.account_id,
            instance_index = instance,
            packet_type = packet.type_name(),
            listeners = listeners.len(),
            "Dispatching packet"
        );

        match &packet.event {
            PacketEvent::Authenticated { replicas, .. } => {
                let replicas = replicas.unwrap_or(1);
                notify!(self, listeners, packet, "on_connected", |l| l.on_connected(instance, replicas));
            }
            PacketEvent::Disconnected => {
                notify!(self, listeners, packet, "on_disconnected", |l| l.on_disconnected(instance));
            }
            PacketEvent::SynchronizationStarted(scope) => {
                notify!(self, listeners, packet, "on_synchronization_started", |l| l
                    .on_synchronization_started(instance, synchronization_id, *scope));
            }
            PacketEvent::AccountInformation(info) => {
                notify!(self, listeners, packet, "on_account_information_updated", |l| l
                    .on_account_information_updated(instance, info));
            }
            PacketEvent::Positions(positions) => {
                notify!(self, listeners, packet, "on_positions_replaced", |l| l
                    .on_positions_replaced(instance, positions));
                notify!(self, listeners, packet, "on_positions_synchronized", |l| l
                    .on_positions_synchronized(instance, synchronization_id));
            }
            PacketEvent::Orders(orders) => {
                notify!(self, listeners, packet, "on_pending_orders_replaced", |l| l
                    .on_pending_orders_replaced(instance, orders));
                notify!(self, listeners, packet, "on_pending_orders_synchronized", |l| l
                    .on_pending_orders_synchronized(instance, synchronization_id));
            }
            PacketEvent::Update(update) => {
                self.dispatch_update(&listeners, packet, update).await;
            }
            PacketEvent::HistoryOrders(orders) => {
                for order in orders {
                    notify!(self, listeners, packet, "on_history_order_added", |l| l
                        .on_history_order_added(instance, order));
                }
            }
            PacketEvent::Deals(deals) => {
                for deal in deals {
                    notify!(self, listeners, packet, "on_deal_added", |l| l.on_deal_added(instance, deal));
                }
            }
            PacketEvent::Specifications {
                specifications,
                removed_symbols,
            } => {
                notify!(self, listeners, packet, "on_symbol_specifications_updated", |l| l
                    .on_symbol_specifications_updated(instance, specifications, removed_symbols));
            }
            PacketEvent::Prices(update) => {
                notify!(self, listeners, packet, "on_symbol_prices_updated", |l| l
                    .on_symbol_prices_updated(instance, update));
            }
            PacketEvent::Status { connected } => {
                notify!(self, listeners, packet, "on_broker_connection_status_changed", |l| l
                    .on_broker_connection_status_changed(instance, *connected));
            }
            PacketEvent::DealSynchronizationFinished => {
                notify!(self, listeners, packet, "on_deals_synchronized", |l| l
                    .on_deals_synchronized(instance, synchronization_id));
            }
            PacketEvent::OrderSynchronizationFinished => {
                notify!(self, listeners, packet, "on_history_orders_synchronized", |l| l
                    .on_history_orders_synchronized(instance, synchronization_id));
            }
            PacketEvent::Unknown { packet_type, .. } => {
                debug!(account_id = %packet.account_id, %packet_type, "Ignoring packet of unknown type");
            }
        }
    }

    /// Unpack a composite update in its fixed sub-order
    async fn dispatch_update(&self, listeners: &[Listener], packet: &SyncPacket, update: &AccountUpdate) {
        let instance = packet.instance();

        if let Some(info) = &update.account_information {
            notify!(self, listeners, packet, "on_account_information_updated", |l| l
                .on_account_information_updated(instance, info));
        }
        for position in &update.updated_positions {
            notify!(self, listeners, packet, "on_position_updated", |l| l
                .on_position_updated(instance, position));
        }
        for position_id in &update.removed_position_ids {
            notify!(self, listeners, packet, "on_position_removed", |l| l
                .on_position_removed(instance, position_id));
        }
        for order in &update.updated_orders {
            notify!(self, listeners, packet, "on_pending_order_updated", |l| l
                .on_pending_order_updated(instance, order));
        }
        for order_id in &update.completed_order_ids {
            notify!(self, listeners, packet, "on_pending_order_completed", |l| l
                .on_pending_order_completed(instance, order_id));
        }
        for order in &update.history_orders {
            notify!(self, listeners, packet, "on_history_order_added", |l| l
                .on_history_order_added(instance, order));
        }
        for deal in &update.deals {
            notify!(self, listeners, packet, "on_deal_added", |l| l.on_deal_added(instance, deal));
        }
    }

    fn report(
        &self,
        listener: &dyn SynchronizationListener,
        packet: &SyncPacket,
        handler: &str,
        outcome: Result<ListenerResult, Box<dyn Any + Send>>,
    ) {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    account_id = %packet.account_id,
                    instance_index = packet.instance(),
                    listener = listener.name(),
                    handler,
                    error = %e,
                    "Synchronization listener failed"
                );
            }
            Err(panic) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    account_id = %packet.account_id,
                    instance_index = packet.instance(),
                    listener = listener.name(),
                    handler,
                    panic = %message,
                    "Synchronization listener panicked"
                );
            }
        }
    }
}
