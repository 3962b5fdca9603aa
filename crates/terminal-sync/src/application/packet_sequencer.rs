//! Packet Sequencer
//!
//! Restores strict sequence order of the synchronization stream per replica.
//! Packets that arrive ahead of a gap wait in a bounded, sequence-sorted list
//! until the gap fills. A periodic sweep reports gaps that stay open longer
//! than the ordering timeout, once per gap episode.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mirror_core::{ReplicaKey, SyncPacket, Timestamp};
use mirror_ports::{OutOfOrderEvent, OutOfOrderListener};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::config::SequencerConfig;
use super::sweep::SweepHandle;

struct WaitingPacket {
    sequence_number: u64,
    packet: SyncPacket,
    received_at: Instant,
    received_at_utc: Timestamp,
    /// Insertion order, used to pick the eviction victim
    arrival: u64,
}

#[derive(Default)]
struct ReplicaOrdering {
    /// Last sequence number delivered downstream
    last_sequence_number: Option<u64>,
    /// Timestamp of the current synchronization session
    session_start_timestamp: Option<i64>,
    /// Sorted by sequence number
    wait_list: Vec<WaitingPacket>,
    out_of_order_reported: bool,
}

impl ReplicaOrdering {
    /// Drop waiting packets that can no longer be delivered in order
    fn prune_obsolete(&mut self) {
        if let Some(last) = self.last_sequence_number {
            self.wait_list.retain(|w| w.sequence_number >= last);
        }
    }

    /// Pop the contiguous chain that follows the last delivered number
    fn drain_ready(&mut self) -> Vec<SyncPacket> {
        self.prune_obsolete();
        let mut ready = Vec::new();
        while let Some(last) = self.last_sequence_number {
            let Some(head) = self.wait_list.first() else {
                break;
            };
            if head.sequence_number == last {
                ready.push(self.wait_list.remove(0).packet);
            } else if last.checked_add(1) == Some(head.sequence_number) {
                self.last_sequence_number = Some(head.sequence_number);
                ready.push(self.wait_list.remove(0).packet);
            } else {
                break;
            }
        }
        ready
    }

    fn insert_waiting(&mut self, waiting: WaitingPacket, limit: usize) {
        let position = self
            .wait_list
            .partition_point(|w| w.sequence_number <= waiting.sequence_number);
        self.wait_list.insert(position, waiting);

        while self.wait_list.len() > limit {
            let oldest = self
                .wait_list
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| w.arrival)
                .map(|(index, _)| index);
            match oldest {
                Some(index) => {
                    let evicted = self.wait_list.remove(index);
                    debug!(
                        sequence_number = evicted.sequence_number,
                        "Wait list full, evicted oldest packet"
                    );
                }
                None => break,
            }
        }
    }
}

#[derive(Default)]
struct SequencerState {
    replicas: HashMap<ReplicaKey, ReplicaOrdering>,
    arrivals: u64,
}

/// Resequences numbered packets per replica key
pub struct PacketSequencer {
    config: SequencerConfig,
    state: Mutex<SequencerState>,
}

impl PacketSequencer {
    pub fn new(config: SequencerConfig) -> Self {
        PacketSequencer {
            config,
            state: Mutex::new(SequencerState::default()),
        }
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Accept one inbound packet and return every packet now ready for
    /// delivery, in order. The result may be empty.
    pub fn restore_order(&self, packet: SyncPacket) -> Vec<SyncPacket> {
        let Some(sequence_number) = packet.sequence_number else {
            return vec![packet];
        };

        let key = packet.replica_key();
        let mut state = self.state.lock();
        state.arrivals += 1;
        let arrival = state.arrivals;
        let replica = state.replicas.entry(key.clone()).or_default();

        let starts_new_session = packet.is_synchronization_start()
            && match (replica.session_start_timestamp, packet.sequence_timestamp) {
                (Some(start), Some(timestamp)) => timestamp > start,
                _ => true,
            };

        if starts_new_session {
            debug!(replica = %key, sequence_number, "Synchronization session started");
            replica.out_of_order_reported = false;
            replica.last_sequence_number = Some(sequence_number);
            if let Some(timestamp) = packet.sequence_timestamp {
                replica.session_start_timestamp = Some(timestamp);
                replica
                    .wait_list
                    .retain(|w| w.packet.sequence_timestamp.is_none_or(|t| t >= timestamp));
            }
            let mut ready = vec![packet];
            ready.extend(replica.drain_ready());
            return ready;
        }

        let from_previous_session = matches!(
            (replica.session_start_timestamp, packet.sequence_timestamp),
            (Some(start), Some(timestamp)) if timestamp < start
        );
        if from_previous_session {
            trace!(replica = %key, sequence_number, "Dropping packet from previous session");
            return Vec::new();
        }

        match replica.last_sequence_number {
            Some(last) if sequence_number == last => vec![packet],
            Some(last) if last.checked_add(1) == Some(sequence_number) => {
                replica.last_sequence_number = Some(sequence_number);
                let mut ready = vec![packet];
                ready.extend(replica.drain_ready());
                ready
            }
            _ => {
                trace!(replica = %key, sequence_number, "Buffering out-of-order packet");
                replica.insert_waiting(
                    WaitingPacket {
                        sequence_number,
                        packet,
                        received_at: Instant::now(),
                        received_at_utc: Utc::now(),
                        arrival,
                    },
                    self.config.wait_list_size_limit,
                );
                Vec::new()
            }
        }
    }

    /// Collect gaps whose head packet waited longer than the ordering
    /// timeout and that were not reported yet
    pub fn sweep(&self) -> Vec<OutOfOrderEvent> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut events = Vec::new();

        for (key, replica) in state.replicas.iter_mut() {
            replica.prune_obsolete();
            if replica.out_of_order_reported {
                continue;
            }
            let Some(head) = replica.wait_list.first() else {
                continue;
            };
            if now.duration_since(head.received_at) > self.config.ordering_timeout {
                replica.out_of_order_reported = true;
                events.push(OutOfOrderEvent {
                    key: key.clone(),
                    expected_sequence_number: replica
                        .last_sequence_number
                        .and_then(|last| last.checked_add(1)),
                    actual_sequence_number: head.sequence_number,
                    packet: head.packet.clone(),
                    received_at: head.received_at_utc,
                });
            }
        }

        events
    }

    /// Start the periodic stuck-gap sweep
    pub fn start(self: &Arc<Self>, listener: Arc<dyn OutOfOrderListener>) -> SweepHandle {
        let sequencer = Arc::clone(self);
        SweepHandle::spawn(self.config.sweep_interval, move || {
            for event in sequencer.sweep() {
                warn!(
                    replica = %event.key,
                    expected = ?event.expected_sequence_number,
                    actual = event.actual_sequence_number,
                    "Packet sequence gap did not close within ordering timeout"
                );
                listener.on_out_of_order_packet(event);
            }
        })
    }

    /// Forget ordering state for every replica of an account
    pub fn remove_account(&self, account_id: &str) {
        self.state
            .lock()
            .replicas
            .retain(|key, _| key.account_id != account_id);
    }

    /// Last sequence number delivered for a replica
    pub fn last_sequence_number(&self, key: &ReplicaKey) -> Option<u64> {
        self.state
            .lock()
            .replicas
            .get(key)
            .and_then(|r| r.last_sequence_number)
    }

    /// Number of packets waiting for a gap to fill
    pub fn waiting_count(&self, key: &ReplicaKey) -> usize {
        self.state
            .lock()
            .replicas
            .get(key)
            .map(|r| r.wait_list.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::{PacketEvent, ResyncScope};
    use std::time::Duration;

    fn start_packet(sequence_number: u64, timestamp: i64) -> SyncPacket {
        SyncPacket::new(
            "acc",
            PacketEvent::SynchronizationStarted(ResyncScope::FULL),
        )
        .with_sequence(sequence_number, timestamp)
        .with_synchronization_id("sync-1")
    }

    fn data_packet(sequence_number: u64, timestamp: i64) -> SyncPacket {
        SyncPacket::new("acc", PacketEvent::Prices(Default::default()))
            .with_sequence(sequence_number, timestamp)
    }

    fn numbers(packets: &[SyncPacket]) -> Vec<u64> {
        packets.iter().filter_map(|p| p.sequence_number).collect()
    }

    fn sequencer() -> PacketSequencer {
        PacketSequencer::new(SequencerConfig::default())
    }

    #[test]
    fn test_unsequenced_packets_pass_through() {
        let sequencer = sequencer();
        let packet = SyncPacket::new("acc", PacketEvent::Disconnected);

        let ready = sequencer.restore_order(packet.clone());
        assert_eq!(ready, vec![packet]);
    }

    #[test]
    fn test_start_arriving_after_its_successor() {
        let sequencer = sequencer();

        assert!(sequencer.restore_order(data_packet(14, 100)).is_empty());
        assert_eq!(numbers(&sequencer.restore_order(start_packet(13, 100))), vec![13, 14]);
        assert!(sequencer.restore_order(data_packet(16, 100)).is_empty());
        assert_eq!(numbers(&sequencer.restore_order(data_packet(15, 100))), vec![15, 16]);
    }

    #[test]
    fn test_duplicate_of_last_delivered_passes_without_state_change() {
        let sequencer = sequencer();
        let key = ReplicaKey::new("acc", 0);

        sequencer.restore_order(start_packet(1, 100));
        sequencer.restore_order(data_packet(2, 100));
        assert_eq!(sequencer.last_sequence_number(&key), Some(2));

        let ready = sequencer.restore_order(data_packet(2, 100));
        assert_eq!(numbers(&ready), vec![2]);
        assert_eq!(sequencer.last_sequence_number(&key), Some(2));
        assert_eq!(sequencer.waiting_count(&key), 0);
    }

    #[test]
    fn test_packets_before_any_baseline_are_buffered() {
        let sequencer = sequencer();
        let key = ReplicaKey::new("acc", 0);

        assert!(sequencer.restore_order(data_packet(5, 100)).is_empty());
        assert_eq!(sequencer.waiting_count(&key), 1);
        assert_eq!(sequencer.last_sequence_number(&key), None);
    }

    #[test]
    fn test_previous_session_packets_are_dropped() {
        let sequencer = sequencer();
        let key = ReplicaKey::new("acc", 0);

        sequencer.restore_order(start_packet(10, 200));
        assert!(sequencer.restore_order(data_packet(11, 150)).is_empty());
        assert_eq!(sequencer.waiting_count(&key), 0);
        assert_eq!(sequencer.last_sequence_number(&key), Some(10));
    }

    #[test]
    fn test_new_session_discards_stale_buffered_packets() {
        let sequencer = sequencer();
        let key = ReplicaKey::new("acc", 0);

        sequencer.restore_order(start_packet(1, 100));
        assert!(sequencer.restore_order(data_packet(5, 100)).is_empty());
        assert!(sequencer.restore_order(data_packet(3, 200)).is_empty());
        assert_eq!(sequencer.waiting_count(&key), 2);

        let ready = sequencer.restore_order(start_packet(2, 200));
        assert_eq!(numbers(&ready), vec![2, 3]);
        assert_eq!(sequencer.waiting_count(&key), 0);
    }

    #[test]
    fn test_older_start_packet_does_not_reset_session() {
        let sequencer = sequencer();
        let key = ReplicaKey::new("acc", 0);

        sequencer.restore_order(start_packet(10, 200));
        assert!(sequencer.restore_order(start_packet(3, 100)).is_empty());
        assert_eq!(sequencer.last_sequence_number(&key), Some(10));
    }

    #[test]
    fn test_replicas_are_ordered_independently() {
        let sequencer = sequencer();

        sequencer.restore_order(start_packet(1, 100));
        sequencer.restore_order(start_packet(50, 100).with_instance_index(1));

        let ready = sequencer.restore_order(data_packet(51, 100).with_instance_index(1));
        assert_eq!(numbers(&ready), vec![51]);
        assert!(sequencer.restore_order(data_packet(3, 100)).is_empty());
    }

    #[test]
    fn test_wait_list_evicts_oldest_insertion() {
        let sequencer =
            PacketSequencer::new(SequencerConfig::default().with_wait_list_size_limit(3));
        let key = ReplicaKey::new("acc", 0);

        sequencer.restore_order(start_packet(1, 100));
        for n in [9, 5, 7, 3] {
            assert!(sequencer.restore_order(data_packet(n, 100)).is_empty());
        }
        assert_eq!(sequencer.waiting_count(&key), 3);

        // 9 arrived first and was evicted; 2 releases 3 only
        assert_eq!(numbers(&sequencer.restore_order(data_packet(2, 100))), vec![2, 3]);
        assert_eq!(numbers(&sequencer.restore_order(data_packet(4, 100))), vec![4, 5]);
        assert_eq!(numbers(&sequencer.restore_order(data_packet(6, 100))), vec![6, 7]);
        assert!(sequencer.restore_order(data_packet(9, 100)).is_empty());
    }

    #[test]
    fn test_output_is_gap_free_for_shuffled_input() {
        let sequencer = sequencer();
        let mut delivered = Vec::new();

        let arrival_order = [7, 3, 2, 1, 9, 4, 8, 6, 5, 10, 4];
        delivered.extend(numbers(&sequencer.restore_order(start_packet(0, 100))));
        for n in arrival_order {
            delivered.extend(numbers(&sequencer.restore_order(data_packet(n, 100))));
        }

        // trailing duplicate of an older number never surfaces
        assert_eq!(delivered, (0..=10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reports_stuck_gap_once() {
        let sequencer = PacketSequencer::new(
            SequencerConfig::default().with_ordering_timeout(Duration::from_secs(10)),
        );

        sequencer.restore_order(start_packet(1, 100));
        sequencer.restore_order(data_packet(3, 100));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(sequencer.sweep().is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        let events = sequencer.sweep();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, ReplicaKey::new("acc", 0));
        assert_eq!(events[0].expected_sequence_number, Some(2));
        assert_eq!(events[0].actual_sequence_number, 3);

        assert!(sequencer.sweep().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_rearms_gap_report() {
        let sequencer = PacketSequencer::new(
            SequencerConfig::default().with_ordering_timeout(Duration::from_secs(10)),
        );

        sequencer.restore_order(start_packet(1, 100));
        sequencer.restore_order(data_packet(3, 100));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(sequencer.sweep().len(), 1);

        sequencer.restore_order(start_packet(20, 200));
        sequencer.restore_order(data_packet(22, 200));
        tokio::time::advance(Duration::from_secs(11)).await;

        let events = sequencer.sweep();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].expected_sequence_number, Some(21));
        assert_eq!(events[0].actual_sequence_number, 22);
    }

    struct RecordingListener {
        events: Mutex<Vec<OutOfOrderEvent>>,
    }

    impl OutOfOrderListener for RecordingListener {
        fn on_out_of_order_packet(&self, event: OutOfOrderEvent) {
            self.events.lock().push(event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_notifies_listener() {
        let sequencer = Arc::new(PacketSequencer::new(
            SequencerConfig::default().with_ordering_timeout(Duration::from_secs(2)),
        ));
        let listener = Arc::new(RecordingListener {
            events: Mutex::new(Vec::new()),
        });

        let _sweep = sequencer.start(listener.clone());
        sequencer.restore_order(start_packet(1, 100));
        sequencer.restore_order(data_packet(4, 100));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(listener.events.lock().len(), 1);
    }

    #[test]
    fn test_session_starting_at_highest_number_has_no_successor() {
        let sequencer = sequencer();
        let key = ReplicaKey::new("acc", 0);

        assert!(sequencer.restore_order(data_packet(u64::MAX, 100)).is_empty());
        assert_eq!(
            numbers(&sequencer.restore_order(start_packet(u64::MAX, 100))),
            vec![u64::MAX, u64::MAX]
        );
        assert_eq!(numbers(&sequencer.restore_order(data_packet(u64::MAX, 100))), vec![u64::MAX]);
        assert!(sequencer.restore_order(data_packet(0, 100)).is_empty());
        assert_eq!(sequencer.last_sequence_number(&key), Some(u64::MAX));
        assert!(sequencer.sweep().is_empty());
    }

    #[test]
    fn test_remove_account_clears_state() {
        let sequencer = sequencer();
        let key = ReplicaKey::new("acc", 0);

        sequencer.restore_order(start_packet(1, 100));
        sequencer.restore_order(data_packet(3, 100));
        sequencer.remove_account("acc");

        assert_eq!(sequencer.last_sequence_number(&key), None);
        assert_eq!(sequencer.waiting_count(&key), 0);
    }
}
