use mirror_core::{ReplicaKey, SyncPacket, Timestamp};

/// A sequence gap that stayed open longer than the ordering timeout
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfOrderEvent {
    pub key: ReplicaKey,
    /// Next number the stream was waiting for, if a baseline was known
    pub expected_sequence_number: Option<u64>,
    /// Number of the packet stuck at the head of the wait list
    pub actual_sequence_number: u64,
    pub packet: SyncPacket,
    pub received_at: Timestamp,
}

/// Receives stuck-gap reports from the packet sequencer
pub trait OutOfOrderListener: Send + Sync {
    fn on_out_of_order_packet(&self, event: OutOfOrderEvent);
}
