//! Streaming Client
//!
//! Connection-level control plane. One client owns the sequencer, throttler,
//! subscription manager and dispatcher for a single transport connection and
//! drives them from the inbound packet stream:
//!
//! ```text
//!   handle_packet ──► renew slot ──► PacketSequencer ──► per-replica worker
//!                                        │                      │
//!                                  stuck gap report        dispatch to listeners
//!                                        │                      │
//!                                        ▼                      ▼
//!                               SubscriptionManager ◄── authenticated / disconnected
//!                                                        status / sync finished
//! ```
//!
//! Packets of one replica are handled strictly in order by that replica's
//! worker task; different replicas run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use mirror_core::{
    InstanceIndex, PacketEvent, ReplicaKey, SyncPacket, SynchronizeRequest,
};
use mirror_ports::{
    HistoryStorage, OutOfOrderEvent, OutOfOrderListener, Reservoir, SubscribeSender,
    SynchronizationListener, SynchronizeSender,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::config::ClientConfig;
use super::packet_dispatcher::PacketDispatcher;
use super::packet_sequencer::PacketSequencer;
use super::subscription_manager::SubscriptionManager;
use super::sweep::SweepHandle;
use super::synchronization_throttler::{
    SlotBudget, SubscribedAccounts, SyncOutcome, SynchronizationThrottler,
};
use super::terminal_state::TerminalState;
use crate::error::ClientError;

/// Work delivered to a replica's worker task
enum WorkItem {
    Packet { packet: SyncPacket, received_at: Instant },
    StatusTimeout,
    Flush(oneshot::Sender<()>),
}

struct AccountEntry {
    replicas: u32,
    terminal_state: Arc<TerminalState>,
    history: Arc<dyn HistoryStorage>,
}

struct ClientInner {
    config: ClientConfig,
    sequencer: Arc<PacketSequencer>,
    throttler: Arc<SynchronizationThrottler>,
    subscriptions: Arc<SubscriptionManager>,
    dispatcher: PacketDispatcher,
    accounts: Arc<DashMap<String, AccountEntry>>,
    workers: Mutex<HashMap<ReplicaKey, mpsc::UnboundedSender<WorkItem>>>,
    status_timers: Mutex<HashMap<ReplicaKey, JoinHandle<()>>>,
    sweeps: Mutex<Vec<SweepHandle>>,
    latency: RwLock<Option<Arc<dyn Reservoir>>>,
}

/// Synchronization client for one transport connection
pub struct StreamingClient {
    inner: Arc<ClientInner>,
}

impl StreamingClient {
    pub fn new(
        config: ClientConfig,
        synchronize_sender: Arc<dyn SynchronizeSender>,
        subscribe_sender: Arc<dyn SubscribeSender>,
    ) -> Self {
        Self::build(config, synchronize_sender, subscribe_sender, None)
    }

    /// Create a client whose admissions also count against a budget shared
    /// with other connections
    pub fn with_slot_budget(
        config: ClientConfig,
        synchronize_sender: Arc<dyn SynchronizeSender>,
        subscribe_sender: Arc<dyn SubscribeSender>,
        budget: Arc<SlotBudget>,
    ) -> Self {
        Self::build(config, synchronize_sender, subscribe_sender, Some(budget))
    }

    fn build(
        config: ClientConfig,
        synchronize_sender: Arc<dyn SynchronizeSender>,
        subscribe_sender: Arc<dyn SubscribeSender>,
        budget: Option<Arc<SlotBudget>>,
    ) -> Self {
        let accounts: Arc<DashMap<String, AccountEntry>> = Arc::new(DashMap::new());

        let counted = Arc::clone(&accounts);
        let subscribed: SubscribedAccounts = Arc::new(move || counted.len());
        let mut throttler =
            SynchronizationThrottler::new(config.throttler.clone(), synchronize_sender, subscribed);
        if let Some(budget) = budget {
            throttler = throttler.with_budget(budget);
        }

        let inner = ClientInner {
            sequencer: Arc::new(PacketSequencer::new(config.sequencer.clone())),
            throttler: Arc::new(throttler),
            subscriptions: Arc::new(SubscriptionManager::new(
                config.subscription.clone(),
                subscribe_sender,
            )),
            dispatcher: PacketDispatcher::new(),
            accounts,
            workers: Mutex::new(HashMap::new()),
            status_timers: Mutex::new(HashMap::new()),
            sweeps: Mutex::new(Vec::new()),
            latency: RwLock::new(None),
            config,
        };

        StreamingClient {
            inner: Arc::new(inner),
        }
    }

    /// Record per-packet processing latency (milliseconds) into a reservoir
    pub fn set_latency_reservoir(&self, reservoir: Arc<dyn Reservoir>) {
        *self.inner.latency.write() = Some(reservoir);
    }

    /// Start the ordering and admission sweeps
    pub fn start(&self) {
        let gap_listener: Arc<dyn OutOfOrderListener> = Arc::new(GapResubscriber {
            inner: Arc::downgrade(&self.inner),
        });
        let mut sweeps = self.inner.sweeps.lock();
        if !sweeps.is_empty() {
            return;
        }
        sweeps.push(self.inner.sequencer.start(gap_listener));
        sweeps.push(self.inner.throttler.start());
        info!("Streaming client started");
    }

    /// Stop sweeps, timers and workers. Registered accounts are kept.
    pub fn stop(&self) {
        for sweep in self.inner.sweeps.lock().drain(..) {
            sweep.stop();
        }
        for (_, timer) in self.inner.status_timers.lock().drain() {
            timer.abort();
        }
        self.inner.workers.lock().clear();
        self.inner.subscriptions.cancel_all();
        info!("Streaming client stopped");
    }

    /// Register an account, project it into a terminal state and subscribe
    /// every replica
    pub fn add_account<H>(
        &self,
        account_id: &str,
        replicas: u32,
        history: Arc<H>,
    ) -> Arc<TerminalState>
    where
        H: HistoryStorage + 'static,
    {
        if let Some(existing) = self.inner.accounts.get(account_id) {
            return Arc::clone(&existing.terminal_state);
        }

        let terminal_state = Arc::new(TerminalState::new(
            account_id,
            self.inner.config.terminal_state.clone(),
        ));
        self.inner
            .dispatcher
            .add_listener(account_id, terminal_state.clone());
        self.inner.dispatcher.add_listener(account_id, history.clone());

        let replicas = replicas.max(1);
        self.inner.accounts.insert(
            account_id.to_string(),
            AccountEntry {
                replicas,
                terminal_state: Arc::clone(&terminal_state),
                history,
            },
        );
        info!(account_id, replicas, "Account added");

        for instance_index in 0..replicas {
            self.inner
                .subscriptions
                .subscribe(ReplicaKey::new(account_id, instance_index));
        }
        terminal_state
    }

    /// Forget an account: stop its loops, drop its ordering state, listeners
    /// and slots
    pub fn remove_account(&self, account_id: &str) -> Result<(), ClientError> {
        let (_, entry) = self
            .inner
            .accounts
            .remove(account_id)
            .ok_or_else(|| ClientError::UnknownAccount(account_id.to_string()))?;

        self.inner.subscriptions.cancel_account(account_id);
        self.inner.sequencer.remove_account(account_id);
        self.inner.dispatcher.remove_account(account_id);
        for instance_index in 0..entry.replicas {
            self.inner
                .throttler
                .remove_id_by_parameters(account_id, instance_index, None);
        }
        self.inner
            .workers
            .lock()
            .retain(|key, _| key.account_id != account_id);
        self.inner.status_timers.lock().retain(|key, timer| {
            let keep = key.account_id != account_id;
            if !keep {
                timer.abort();
            }
            keep
        });
        info!(account_id, "Account removed");
        Ok(())
    }

    pub fn add_synchronization_listener(
        &self,
        account_id: &str,
        listener: Arc<dyn SynchronizationListener>,
    ) {
        self.inner.dispatcher.add_listener(account_id, listener);
    }

    pub fn remove_synchronization_listener(
        &self,
        account_id: &str,
        listener: &Arc<dyn SynchronizationListener>,
    ) {
        self.inner.dispatcher.remove_listener(account_id, listener);
    }

    pub fn terminal_state(&self, account_id: &str) -> Option<Arc<TerminalState>> {
        self.inner
            .accounts
            .get(account_id)
            .map(|entry| Arc::clone(&entry.terminal_state))
    }

    pub fn history_storage(&self, account_id: &str) -> Option<Arc<dyn HistoryStorage>> {
        self.inner
            .accounts
            .get(account_id)
            .map(|entry| Arc::clone(&entry.history))
    }

    pub fn account_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.accounts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn sequencer(&self) -> &Arc<PacketSequencer> {
        &self.inner.sequencer
    }

    pub fn throttler(&self) -> &Arc<SynchronizationThrottler> {
        &self.inner.throttler
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.inner.subscriptions
    }

    /// Feed one inbound packet. Ordered output is queued to the replica's
    /// worker; this never waits on listeners.
    pub fn handle_packet(&self, packet: SyncPacket) {
        let received_at = Instant::now();
        if let Some(synchronization_id) = packet.synchronization_id.as_deref() {
            self.inner
                .throttler
                .update_synchronization_id(synchronization_id);
        }

        for ordered in self.inner.sequencer.restore_order(packet) {
            let key = ordered.replica_key();
            self.inner.route(
                key,
                WorkItem::Packet {
                    packet: ordered,
                    received_at,
                },
            );
        }
    }

    /// Wait until every packet queued so far has been dispatched
    pub async fn flush(&self) {
        let workers: Vec<mpsc::UnboundedSender<WorkItem>> =
            self.inner.workers.lock().values().cloned().collect();
        let mut pending = Vec::with_capacity(workers.len());
        for worker in workers {
            let (done, wait) = oneshot::channel();
            if worker.send(WorkItem::Flush(done)).is_ok() {
                pending.push(wait);
            }
        }
        for wait in pending {
            let _ = wait.await;
        }
    }

    /// Request a full synchronization of one replica through the throttler
    pub async fn synchronize(
        &self,
        account_id: &str,
        instance_index: InstanceIndex,
    ) -> Result<SyncOutcome, ClientError> {
        if !self.inner.accounts.contains_key(account_id) {
            return Err(ClientError::UnknownAccount(account_id.to_string()));
        }
        self.inner
            .synchronize(ReplicaKey::new(account_id, instance_index), None)
            .await
    }

    /// The transport dropped: fail queued admissions and stop every loop.
    /// Terminal state is left as last known.
    pub fn on_transport_disconnected(&self) {
        warn!("Transport disconnected");
        self.inner.throttler.on_disconnect();
        self.inner.subscriptions.cancel_all();
        for (_, timer) in self.inner.status_timers.lock().drain() {
            timer.abort();
        }
    }

    /// The transport is back: restart subscribe loops for every replica
    pub fn on_transport_reconnected(&self) {
        self.inner.subscriptions.on_reconnected();
        let keys: Vec<ReplicaKey> = self
            .inner
            .accounts
            .iter()
            .flat_map(|entry| {
                let account_id = entry.key().clone();
                (0..entry.replicas).map(move |i| ReplicaKey::new(account_id.clone(), i))
            })
            .collect();
        info!(replicas = keys.len(), "Transport reconnected, resubscribing");
        for key in keys {
            self.inner.subscriptions.subscribe(key);
        }
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ClientInner {
    /// Queue work for the replica's worker, spawning it on first use
    fn route(self: &Arc<Self>, key: ReplicaKey, item: WorkItem) {
        let mut workers = self.workers.lock();
        let item = match workers.get(&key) {
            Some(sender) => match sender.send(item) {
                Ok(()) => return,
                Err(mpsc::error::SendError(item)) => item,
            },
            None => item,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(item);
        workers.insert(key.clone(), sender);
        debug!(replica = %key, "Starting replica worker");
        tokio::spawn(run_worker(Arc::downgrade(self), key, receiver));
    }

    async fn process(self: &Arc<Self>, key: ReplicaKey, item: WorkItem) {
        match item {
            WorkItem::Packet {
                packet,
                received_at,
            } => {
                self.process_packet(key, packet).await;
                if let Some(reservoir) = self.latency.read().as_ref() {
                    reservoir.push(received_at.elapsed().as_secs_f64() * 1000.0);
                }
            }
            WorkItem::StatusTimeout => self.process_status_timeout(key).await,
            WorkItem::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    async fn process_packet(self: &Arc<Self>, key: ReplicaKey, packet: SyncPacket) {
        trace!(replica = %key, packet_type = packet.type_name(), sequence_number = ?packet.sequence_number, "Processing packet");

        if matches!(packet.event, PacketEvent::Authenticated { .. }) {
            self.subscriptions.cancel_subscribe(&key);
        }

        self.dispatcher.dispatch(&packet).await;

        match &packet.event {
            PacketEvent::Authenticated { .. } => {
                info!(replica = %key, host = ?packet.host, "Terminal authenticated, synchronizing");
                let inner = Arc::clone(self);
                let host = packet.host.clone();
                tokio::spawn(async move {
                    let replica = key.clone();
                    match inner.synchronize(key, host).await {
                        Ok(outcome) => debug!(%replica, ?outcome, "Synchronization scheduled"),
                        Err(e) => warn!(%replica, error = %e, "Synchronization failed"),
                    }
                });
            }
            PacketEvent::DealSynchronizationFinished => {
                if let Some(synchronization_id) = packet.synchronization_id.as_deref() {
                    self.throttler.remove_synchronization_id(synchronization_id);
                }
            }
            PacketEvent::Disconnected => {
                self.clear_status_timer(&key);
                self.throttler.remove_id_by_parameters(
                    &key.account_id,
                    key.instance_index,
                    packet.host.as_deref(),
                );
                if self.accounts.contains_key(&key.account_id) {
                    self.subscriptions.on_disconnected(key);
                }
            }
            PacketEvent::Status { .. } => self.arm_status_timer(key),
            _ => {}
        }
    }

    async fn process_status_timeout(self: &Arc<Self>, key: ReplicaKey) {
        warn!(replica = %key, "No status packet within timeout, treating replica as disconnected");
        self.status_timers.lock().remove(&key);

        let disconnected = SyncPacket::new(key.account_id.clone(), PacketEvent::Disconnected)
            .with_instance_index(key.instance_index);
        self.dispatcher.dispatch(&disconnected).await;
        self.throttler
            .remove_id_by_parameters(&key.account_id, key.instance_index, None);
        if self.accounts.contains_key(&key.account_id) {
            self.subscriptions.on_timeout(key);
        }
    }

    fn arm_status_timer(self: &Arc<Self>, key: ReplicaKey) {
        let timeout = self.config.status_timeout;
        let weak = Arc::downgrade(self);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.route(timer_key, WorkItem::StatusTimeout);
            }
        });
        if let Some(previous) = self.status_timers.lock().insert(key, timer) {
            previous.abort();
        }
    }

    fn clear_status_timer(&self, key: &ReplicaKey) {
        if let Some(timer) = self.status_timers.lock().remove(key) {
            timer.abort();
        }
    }

    async fn synchronize(
        &self,
        key: ReplicaKey,
        host: Option<String>,
    ) -> Result<SyncOutcome, ClientError> {
        let history = self
            .accounts
            .get(&key.account_id)
            .map(|entry| Arc::clone(&entry.history));

        let mut request = SynchronizeRequest::new(key.account_id.clone())
            .with_instance_index(key.instance_index);
        if let Some(history) = history {
            request = request
                .with_starting_history_order_time(
                    history.last_history_order_time(key.instance_index).await,
                )
                .with_starting_deal_time(history.last_deal_time(key.instance_index).await);
        }
        if let Some(host) = host {
            request = request.with_host(host);
        }

        Ok(self.throttler.schedule_synchronize(request).await?)
    }
}

async fn run_worker(
    inner: Weak<ClientInner>,
    key: ReplicaKey,
    mut receiver: mpsc::UnboundedReceiver<WorkItem>,
) {
    while let Some(item) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.process(key.clone(), item).await;
    }
    trace!(replica = %key, "Replica worker stopped");
}

/// Resubscribes replicas whose packet stream is stuck on a gap
struct GapResubscriber {
    inner: Weak<ClientInner>,
}

impl OutOfOrderListener for GapResubscriber {
    fn on_out_of_order_packet(&self, event: OutOfOrderEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        warn!(
            replica = %event.key,
            expected = ?event.expected_sequence_number,
            actual = event.actual_sequence_number,
            "Packet stream stuck on a gap, resubscribing"
        );
        if inner.accounts.contains_key(&event.key.account_id) {
            inner.subscriptions.resubscribe(event.key);
        }
    }
}
