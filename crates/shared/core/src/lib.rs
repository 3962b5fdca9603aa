//! Mirror Core Domain
//!
//! Pure domain types for the terminal mirror.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod entities;
pub mod packets;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    AccountInformation, Deal, DealEntryType, DealType, Order, OrderState, OrderType, Position,
    PositionType, SymbolPrice, SymbolSpecification,
};
pub use packets::{
    AccountUpdate, PacketEvent, PriceUpdate, ResyncScope, SyncPacket, SynchronizeRequest,
};
pub use values::{DEFAULT_INSTANCE_INDEX, InstanceIndex, ReplicaKey, Symbol, Timestamp};
