//! Synchronization Throttler
//!
//! Bounds the number of full-state synchronizations running at once over a
//! connection. Requests beyond the limit wait in a FIFO queue until a slot
//! frees, the request is superseded, or the queue timeout elapses. Slots are
//! kept alive by packets carrying their synchronization id and expire when
//! those stop arriving. A request the transport fails to deliver goes back to
//! the queue and is retried until its queue timeout runs out.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mirror_core::{InstanceIndex, SynchronizeRequest};
use mirror_ports::SynchronizeSender;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::ThrottlerConfig;
use super::sweep::SweepHandle;
use crate::error::SynchronizationError;

/// Number of subscribed accounts served by one synchronization slot
const ACCOUNTS_PER_SLOT: usize = 10;

/// Source of the number of accounts subscribed over the connection
pub type SubscribedAccounts = Arc<dyn Fn() -> usize + Send + Sync>;

/// Successful result of a scheduled synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The request was forwarded to the server
    Sent,
    /// A newer request for the same replica or a disconnect released it
    Cancelled,
}

/// Process-wide cap on active synchronizations shared by connections.
///
/// Every slot a throttler holds is reserved here first, so the total never
/// exceeds `global_max` however many connections admit concurrently.
#[derive(Debug)]
pub struct SlotBudget {
    global_max: usize,
    reserved: AtomicUsize,
}

impl SlotBudget {
    pub fn new(global_max: usize) -> Self {
        SlotBudget {
            global_max,
            reserved: AtomicUsize::new(0),
        }
    }

    pub fn global_max(&self) -> usize {
        self.global_max
    }

    /// Slots reserved across every connection
    pub fn total_active(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.global_max.saturating_sub(self.total_active())
    }

    fn try_reserve(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |reserved| {
                (reserved < self.global_max).then_some(reserved + 1)
            })
            .is_ok()
    }

    fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let _ = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |reserved| {
                Some(reserved.saturating_sub(count))
            });
    }
}

struct Slot {
    account_id: String,
    instance_index: InstanceIndex,
    host: Option<String>,
    last_renewed: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueResolution {
    Admitted,
    Cancelled,
    TimedOut,
}

struct QueuedSynchronization {
    synchronization_id: String,
    account_id: String,
    instance_index: InstanceIndex,
    host: Option<String>,
    queued_at: Instant,
    resolve: oneshot::Sender<QueueResolution>,
}

#[derive(Default)]
struct ThrottlerState {
    /// Active slots by synchronization id
    slots: HashMap<String, Slot>,
    queue: VecDeque<QueuedSynchronization>,
}

impl ThrottlerState {
    fn synchronizing_accounts(&self) -> BTreeSet<&str> {
        self.slots.values().map(|s| s.account_id.as_str()).collect()
    }

    fn enqueue(
        &mut self,
        request: &SynchronizeRequest,
        queued_at: Instant,
    ) -> oneshot::Receiver<QueueResolution> {
        let (resolve, waiting) = oneshot::channel();
        self.queue.push_back(QueuedSynchronization {
            synchronization_id: request.synchronization_id().to_string(),
            account_id: request.account_id.clone(),
            instance_index: request.instance_index,
            host: request.host.clone(),
            queued_at,
            resolve,
        });
        waiting
    }

    /// Release every slot and queued entry for the replica, returning the
    /// number of slots freed
    fn release_replica(&mut self, account_id: &str, instance_index: InstanceIndex) -> usize {
        let before = self.slots.len();
        self.slots.retain(|id, slot| {
            let matches = slot.account_id == account_id && slot.instance_index == instance_index;
            if matches {
                debug!(synchronization_id = %id, account_id, instance_index, "Superseding active synchronization");
            }
            !matches
        });
        let freed = before - self.slots.len();

        let mut kept = VecDeque::with_capacity(self.queue.len());
        for entry in self.queue.drain(..) {
            if entry.account_id == account_id && entry.instance_index == instance_index {
                debug!(
                    synchronization_id = %entry.synchronization_id,
                    account_id, instance_index, "Superseding queued synchronization"
                );
                let _ = entry.resolve.send(QueueResolution::Cancelled);
            } else {
                kept.push_back(entry);
            }
        }
        self.queue = kept;
        freed
    }
}

/// Admission controller for synchronize requests of one connection
pub struct SynchronizationThrottler {
    config: ThrottlerConfig,
    sender: Arc<dyn SynchronizeSender>,
    subscribed_accounts: SubscribedAccounts,
    budget: Option<Arc<SlotBudget>>,
    state: Mutex<ThrottlerState>,
}

impl SynchronizationThrottler {
    pub fn new(
        config: ThrottlerConfig,
        sender: Arc<dyn SynchronizeSender>,
        subscribed_accounts: SubscribedAccounts,
    ) -> Self {
        SynchronizationThrottler {
            config,
            sender,
            subscribed_accounts,
            budget: None,
            state: Mutex::new(ThrottlerState::default()),
        }
    }

    /// Share a process-wide budget with other connections
    pub fn with_budget(mut self, budget: Arc<SlotBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn config(&self) -> &ThrottlerConfig {
        &self.config
    }

    /// Current limit on concurrent synchronizations over this connection
    pub fn max_concurrent_synchronizations(&self) -> usize {
        let local = self.local_limit();
        match &self.budget {
            Some(budget) => {
                let own = self.state.lock().slots.len();
                local.min(own + budget.available())
            }
            None => local,
        }
    }

    fn local_limit(&self) -> usize {
        let by_accounts = (self.subscribed_accounts)()
            .div_ceil(ACCOUNTS_PER_SLOT)
            .max(1);
        self.config.max_concurrent_synchronizations.min(by_accounts)
    }

    /// Take one unit of capacity for a new slot. Must be called under the
    /// state lock right before the slot is inserted.
    fn try_reserve(&self, state: &ThrottlerState) -> bool {
        if state.slots.len() >= self.local_limit() {
            return false;
        }
        self.budget.as_ref().is_none_or(|budget| budget.try_reserve())
    }

    fn release(&self, count: usize) {
        if let Some(budget) = &self.budget {
            budget.release(count);
        }
    }

    /// True when a new synchronization could start right now
    pub fn is_synchronization_available(&self) -> bool {
        let state = self.state.lock();
        state.slots.len() < self.local_limit()
            && self.budget.as_ref().is_none_or(|budget| budget.available() > 0)
    }

    /// Reserve a slot for the request and send it, waiting in the queue when
    /// the limit is reached
    pub async fn schedule_synchronize(
        &self,
        request: SynchronizeRequest,
    ) -> Result<SyncOutcome, SynchronizationError> {
        let synchronization_id = request.synchronization_id().to_string();
        let account_id = request.account_id.clone();
        let instance_index = request.instance_index;
        let requested_at = Instant::now();

        let mut waiting = {
            let mut state = self.state.lock();
            let superseded = state.release_replica(&account_id, instance_index);
            self.release(superseded);

            if self.try_reserve(&state) {
                state.slots.insert(
                    synchronization_id.clone(),
                    Slot {
                        account_id: account_id.clone(),
                        instance_index,
                        host: request.host.clone(),
                        last_renewed: Instant::now(),
                    },
                );
                None
            } else {
                let waiting = state.enqueue(&request, requested_at);
                debug!(
                    %synchronization_id, %account_id, instance_index,
                    queue_len = state.queue.len(),
                    "Synchronization limit reached, queueing request"
                );
                Some(waiting)
            }
        };

        loop {
            if let Some(admission) = waiting.take() {
                match admission.await {
                    Ok(QueueResolution::Admitted) => {}
                    Ok(QueueResolution::Cancelled) | Err(_) => return Ok(SyncOutcome::Cancelled),
                    Ok(QueueResolution::TimedOut) => {
                        return Err(SynchronizationError::QueueTimeout {
                            account_id,
                            instance_index,
                        });
                    }
                }
            }

            match self.sender.send_synchronize(&request).await {
                Ok(()) => {
                    info!(%synchronization_id, %account_id, instance_index, "Synchronization request sent");
                    self.update_synchronization_id(&synchronization_id);
                    return Ok(SyncOutcome::Sent);
                }
                Err(e) => {
                    warn!(%synchronization_id, %account_id, instance_index, error = %e, "Synchronization request failed, requeueing");
                    match self.requeue(&request, requested_at) {
                        Some(admission) => waiting = Some(admission),
                        None => return Ok(SyncOutcome::Cancelled),
                    }
                }
            }
        }
    }

    /// Give up the slot of a failed send and wait at the back of the queue.
    /// None when the slot was already released by a newer request or a
    /// disconnect.
    fn requeue(
        &self,
        request: &SynchronizeRequest,
        queued_at: Instant,
    ) -> Option<oneshot::Receiver<QueueResolution>> {
        let mut state = self.state.lock();
        state.slots.remove(request.synchronization_id())?;
        self.release(1);
        self.advance_queue(&mut state);
        Some(state.enqueue(request, queued_at))
    }

    /// Renew the slot so it does not expire
    pub fn update_synchronization_id(&self, synchronization_id: &str) {
        if let Some(slot) = self.state.lock().slots.get_mut(synchronization_id) {
            slot.last_renewed = Instant::now();
        }
    }

    /// Release the slot of a finished synchronization
    pub fn remove_synchronization_id(&self, synchronization_id: &str) {
        let mut state = self.state.lock();
        if state.slots.remove(synchronization_id).is_some() {
            debug!(%synchronization_id, "Synchronization slot released");
            self.release(1);
        }
        self.advance_queue(&mut state);
    }

    /// Release slots held by a replica, optionally only those on one host
    pub fn remove_id_by_parameters(
        &self,
        account_id: &str,
        instance_index: InstanceIndex,
        host: Option<&str>,
    ) {
        let mut state = self.state.lock();
        let before = state.slots.len();
        state.slots.retain(|_, slot| {
            !(slot.account_id == account_id
                && slot.instance_index == instance_index
                && host.is_none_or(|h| slot.host.as_deref() == Some(h)))
        });
        let freed = before - state.slots.len();
        self.release(freed);
        self.advance_queue(&mut state);
    }

    /// Transport went away: cancel every queued request and drop all slots
    pub fn on_disconnect(&self) {
        let mut state = self.state.lock();
        let cancelled = state.queue.len();
        for entry in state.queue.drain(..) {
            let _ = entry.resolve.send(QueueResolution::Cancelled);
        }
        let freed = state.slots.len();
        state.slots.clear();
        self.release(freed);
        if cancelled > 0 {
            info!(cancelled, "Cancelled queued synchronizations on disconnect");
        }
    }

    /// Expire unrenewed slots, time out old queue entries and refill
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();

        let synchronization_timeout = self.config.synchronization_timeout;
        let before = state.slots.len();
        state.slots.retain(|id, slot| {
            let alive = now.duration_since(slot.last_renewed) <= synchronization_timeout;
            if !alive {
                debug!(synchronization_id = %id, account_id = %slot.account_id, "Synchronization slot expired");
            }
            alive
        });
        let expired = before - state.slots.len();
        self.release(expired);

        let queue_timeout = self.config.queue_timeout;
        let mut kept = VecDeque::with_capacity(state.queue.len());
        for entry in state.queue.drain(..) {
            if now.duration_since(entry.queued_at) > queue_timeout {
                warn!(
                    synchronization_id = %entry.synchronization_id,
                    account_id = %entry.account_id,
                    instance_index = entry.instance_index,
                    "Queued synchronization timed out"
                );
                let _ = entry.resolve.send(QueueResolution::TimedOut);
            } else {
                kept.push_back(entry);
            }
        }
        state.queue = kept;

        self.advance_queue(&mut state);
    }

    /// Start the periodic expiry sweep
    pub fn start(self: &Arc<Self>) -> SweepHandle {
        let throttler = Arc::clone(self);
        SweepHandle::spawn(self.config.sweep_interval, move || throttler.sweep())
    }

    fn advance_queue(&self, state: &mut ThrottlerState) {
        while let Some(next) = state.queue.front() {
            if next.resolve.is_closed() {
                state.queue.pop_front();
                continue;
            }
            if !self.try_reserve(state) {
                break;
            }
            let Some(entry) = state.queue.pop_front() else {
                self.release(1);
                break;
            };
            state.slots.insert(
                entry.synchronization_id.clone(),
                Slot {
                    account_id: entry.account_id.clone(),
                    instance_index: entry.instance_index,
                    host: entry.host.clone(),
                    last_renewed: Instant::now(),
                },
            );
            if entry.resolve.send(QueueResolution::Admitted).is_err() {
                state.slots.remove(&entry.synchronization_id);
                self.release(1);
            }
        }
    }

    pub fn active_synchronization_ids(&self) -> Vec<String> {
        self.state.lock().slots.keys().cloned().collect()
    }

    /// Accounts holding at least one slot, sorted
    pub fn synchronizing_accounts(&self) -> Vec<String> {
        self.state
            .lock()
            .synchronizing_accounts()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }
}
