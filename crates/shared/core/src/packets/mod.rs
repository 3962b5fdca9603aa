//! Streaming packets and outbound request envelopes

mod packet;
mod request;

pub use packet::{AccountUpdate, PacketEvent, PriceUpdate, ResyncScope, SyncPacket};
pub use request::SynchronizeRequest;
