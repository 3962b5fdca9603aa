use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::{AccountInformation, Deal, Order, Position, SymbolPrice, SymbolSpecification};
use crate::values::{InstanceIndex, ReplicaKey, Symbol};

/// Composite incremental update carried by an `update` packet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    #[serde(default)]
    pub account_information: Option<AccountInformation>,
    #[serde(default)]
    pub updated_positions: Vec<Position>,
    #[serde(default)]
    pub removed_position_ids: Vec<String>,
    #[serde(default)]
    pub updated_orders: Vec<Order>,
    #[serde(default)]
    pub completed_order_ids: Vec<String>,
    #[serde(default)]
    pub history_orders: Vec<Order>,
    #[serde(default)]
    pub deals: Vec<Deal>,
}

/// Batch of quotes with the account figures computed alongside them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    #[serde(default)]
    pub prices: Vec<SymbolPrice>,
    #[serde(default)]
    pub equity: Option<Decimal>,
    #[serde(default)]
    pub margin: Option<Decimal>,
    #[serde(default)]
    pub free_margin: Option<Decimal>,
    #[serde(default)]
    pub margin_level: Option<Decimal>,
}

/// Parts of the terminal a starting synchronization will resend. Parts the
/// server reports as unchanged are kept from the previous session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncScope {
    pub specifications: bool,
    pub positions: bool,
    pub orders: bool,
}

impl ResyncScope {
    pub const FULL: ResyncScope = ResyncScope {
        specifications: true,
        positions: true,
        orders: true,
    };
}

impl Default for ResyncScope {
    fn default() -> Self {
        ResyncScope::FULL
    }
}

/// Typed body of a synchronization packet, keyed by its `type` discriminant
#[derive(Debug, Clone, PartialEq)]
pub enum PacketEvent {
    /// Terminal stream is up for this instance
    Authenticated {
        session_id: Option<String>,
        replicas: Option<u32>,
    },
    /// Terminal stream went away for this instance
    Disconnected,
    /// A full resynchronization begins
    SynchronizationStarted(ResyncScope),
    AccountInformation(AccountInformation),
    /// Wholesale replacement of open positions
    Positions(Vec<Position>),
    /// Wholesale replacement of pending orders
    Orders(Vec<Order>),
    Update(AccountUpdate),
    HistoryOrders(Vec<Order>),
    Deals(Vec<Deal>),
    Specifications {
        specifications: Vec<SymbolSpecification>,
        removed_symbols: Vec<Symbol>,
    },
    Prices(PriceUpdate),
    /// Periodic broker connectivity report
    Status { connected: bool },
    DealSynchronizationFinished,
    OrderSynchronizationFinished,
    /// Unrecognised type, kept verbatim for forward compatibility
    Unknown { packet_type: String, payload: Value },
}

impl PacketEvent {
    /// Wire name of the packet type
    pub fn type_name(&self) -> &str {
        match self {
            PacketEvent::Authenticated { .. } => "authenticated",
            PacketEvent::Disconnected => "disconnected",
            PacketEvent::SynchronizationStarted(_) => "synchronizationStarted",
            PacketEvent::AccountInformation(_) => "accountInformation",
            PacketEvent::Positions(_) => "positions",
            PacketEvent::Orders(_) => "orders",
            PacketEvent::Update(_) => "update",
            PacketEvent::HistoryOrders(_) => "historyOrders",
            PacketEvent::Deals(_) => "deals",
            PacketEvent::Specifications { .. } => "specifications",
            PacketEvent::Prices(_) => "prices",
            PacketEvent::Status { .. } => "status",
            PacketEvent::DealSynchronizationFinished => "dealSynchronizationFinished",
            PacketEvent::OrderSynchronizationFinished => "orderSynchronizationFinished",
            PacketEvent::Unknown { packet_type, .. } => packet_type,
        }
    }
}

/// One packet of a terminal's synchronization stream
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPacket {
    pub account_id: String,
    pub instance_index: Option<InstanceIndex>,
    pub host: Option<String>,
    /// Packets without a sequence number bypass ordering
    pub sequence_number: Option<u64>,
    /// Server time (ms) of the synchronization session this packet belongs to
    pub sequence_timestamp: Option<i64>,
    pub synchronization_id: Option<String>,
    pub event: PacketEvent,
}

impl SyncPacket {
    /// Create an unsequenced packet for instance 0
    pub fn new(account_id: impl Into<String>, event: PacketEvent) -> Self {
        SyncPacket {
            account_id: account_id.into(),
            instance_index: None,
            host: None,
            sequence_number: None,
            sequence_timestamp: None,
            synchronization_id: None,
            event,
        }
    }

    pub fn with_instance_index(mut self, instance_index: InstanceIndex) -> Self {
        self.instance_index = Some(instance_index);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_sequence(mut self, sequence_number: u64, sequence_timestamp: i64) -> Self {
        self.sequence_number = Some(sequence_number);
        self.sequence_timestamp = Some(sequence_timestamp);
        self
    }

    pub fn with_synchronization_id(mut self, synchronization_id: impl Into<String>) -> Self {
        self.synchronization_id = Some(synchronization_id.into());
        self
    }

    pub fn replica_key(&self) -> ReplicaKey {
        ReplicaKey::from_optional(self.account_id.clone(), self.instance_index)
    }

    pub fn instance(&self) -> InstanceIndex {
        self.replica_key().instance_index
    }

    /// True for the packet opening a new synchronization session
    pub fn is_synchronization_start(&self) -> bool {
        matches!(self.event, PacketEvent::SynchronizationStarted(_))
    }

    pub fn type_name(&self) -> &str {
        self.event.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_key() {
        let packet = SyncPacket::new("acc", PacketEvent::Disconnected)
            .with_instance_index(1)
            .with_sequence(5, 1000);

        assert_eq!(packet.replica_key(), ReplicaKey::new("acc", 1));
        assert_eq!(packet.sequence_number, Some(5));
        assert_eq!(packet.type_name(), "disconnected");
    }

    #[test]
    fn test_unknown_type_name() {
        let event = PacketEvent::Unknown {
            packet_type: "downgradeSubscription".to_string(),
            payload: Value::Null,
        };
        assert_eq!(event.type_name(), "downgradeSubscription");
    }
}
