//! Subscription Manager
//!
//! Runs one cancellable retry loop per replica that keeps sending subscribe
//! requests until the replica authenticates and the loop is cancelled.
//! Failures back off exponentially; rate-limit replies carrying a retry time
//! are honoured.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use mirror_core::{InstanceIndex, ReplicaKey};
use mirror_ports::{SubscribeError, SubscribeSender};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::config::SubscriptionConfig;

struct SubscriptionState {
    cancel: watch::Sender<bool>,
    generation: u64,
    disconnected_retry_mode: bool,
}

/// Handle the retry loop uses to observe cancellation
struct LoopTicket {
    key: ReplicaKey,
    generation: u64,
    cancelled: watch::Receiver<bool>,
}

impl LoopTicket {
    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Sleep unless cancelled first; returns false on cancellation
    async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let sender_gone = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.cancelled.changed() => changed.is_err(),
        };
        !sender_gone && !self.is_cancelled()
    }
}

/// Supervises subscribe retry loops for every replica of a connection
pub struct SubscriptionManager {
    config: SubscriptionConfig,
    sender: Arc<dyn SubscribeSender>,
    subscriptions: Mutex<HashMap<ReplicaKey, SubscriptionState>>,
    generations: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(config: SubscriptionConfig, sender: Arc<dyn SubscribeSender>) -> Self {
        SubscriptionManager {
            config,
            sender,
            subscriptions: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Start a retry loop for the replica unless one is already running
    pub fn subscribe(self: &Arc<Self>, key: ReplicaKey) {
        let ticket = {
            let mut subscriptions = self.subscriptions.lock();
            if subscriptions.contains_key(&key) {
                return;
            }
            self.insert_loop(&mut subscriptions, key, false)
        };
        self.spawn_loop(ticket, None);
    }

    /// Stop the replica's retry loop at its next checkpoint
    pub fn cancel_subscribe(&self, key: &ReplicaKey) {
        if let Some(state) = self.subscriptions.lock().remove(key) {
            debug!(replica = %key, "Cancelling subscribe loop");
            let _ = state.cancel.send(true);
        }
    }

    /// Stop every retry loop of an account
    pub fn cancel_account(&self, account_id: &str) {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|key, state| {
            if key.account_id == account_id {
                let _ = state.cancel.send(true);
                false
            } else {
                true
            }
        });
    }

    /// The replica's status stream went silent: restart its retry loop
    pub fn on_timeout(self: &Arc<Self>, key: ReplicaKey) {
        info!(replica = %key, "Status timeout, resubscribing");
        self.resubscribe(key);
    }

    /// Restart the replica's retry loop, replacing any loop already running
    pub fn resubscribe(self: &Arc<Self>, key: ReplicaKey) {
        let ticket = self.register(key, false);
        self.spawn_loop(ticket, None);
    }

    /// The terminal reported a disconnect: resubscribe after a random delay
    pub fn on_disconnected(self: &Arc<Self>, key: ReplicaKey) {
        let delay = self.disconnect_jitter();
        debug!(replica = %key, delay_ms = delay.as_millis() as u64, "Resubscribing after disconnect");
        let ticket = self.register(key, true);
        self.spawn_loop(ticket, Some(delay));
    }

    /// The transport reconnected: every loop is stale and is cancelled
    pub fn on_reconnected(&self) {
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Cancelled subscribe loops after reconnect");
        }
    }

    /// Cancel every running loop, returning how many were stopped
    pub fn cancel_all(&self) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        let cancelled = subscriptions.len();
        for (_, state) in subscriptions.drain() {
            let _ = state.cancel.send(true);
        }
        cancelled
    }

    /// True while a retry loop is running for the account, optionally
    /// restricted to one instance
    pub fn is_account_subscribing(
        &self,
        account_id: &str,
        instance_index: Option<InstanceIndex>,
    ) -> bool {
        self.subscriptions.lock().keys().any(|key| {
            key.account_id == account_id && instance_index.is_none_or(|i| key.instance_index == i)
        })
    }

    /// True when the replica's loop was started by a terminal disconnect
    pub fn is_disconnected_retry_mode(&self, key: &ReplicaKey) -> bool {
        self.subscriptions
            .lock()
            .get(key)
            .map(|s| s.disconnected_retry_mode)
            .unwrap_or(false)
    }

    fn disconnect_jitter(&self) -> Duration {
        let min = self.config.disconnect_jitter_min;
        let max = self.config.disconnect_jitter_max;
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    /// Register a loop for the replica, cancelling any loop it replaces
    fn register(&self, key: ReplicaKey, disconnected_retry_mode: bool) -> LoopTicket {
        let mut subscriptions = self.subscriptions.lock();
        self.insert_loop(&mut subscriptions, key, disconnected_retry_mode)
    }

    fn insert_loop(
        &self,
        subscriptions: &mut HashMap<ReplicaKey, SubscriptionState>,
        key: ReplicaKey,
        disconnected_retry_mode: bool,
    ) -> LoopTicket {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let (cancel, cancelled) = watch::channel(false);
        let previous = subscriptions.insert(
            key.clone(),
            SubscriptionState {
                cancel,
                generation,
                disconnected_retry_mode,
            },
        );
        if let Some(previous) = previous {
            let _ = previous.cancel.send(true);
        }
        LoopTicket {
            key,
            generation,
            cancelled,
        }
    }

    fn spawn_loop(self: &Arc<Self>, ticket: LoopTicket, initial_delay: Option<Duration>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_loop(ticket, initial_delay).await;
        });
    }

    async fn run_loop(&self, mut ticket: LoopTicket, initial_delay: Option<Duration>) {
        if let Some(delay) = initial_delay {
            if !ticket.sleep(delay).await {
                self.finish(&ticket);
                return;
            }
        }

        let mut interval = self.config.initial_retry_interval;
        loop {
            if ticket.is_cancelled() {
                break;
            }

            match self.sender.send_subscribe(&ticket.key).await {
                Ok(()) => {
                    debug!(replica = %ticket.key, "Subscribe acknowledged");
                    interval = self.config.initial_retry_interval;
                }
                Err(SubscribeError::TooManyRequests {
                    limit_type,
                    recommended_retry_time,
                }) => {
                    warn!(replica = %ticket.key, %limit_type, retry_at = ?recommended_retry_time, "Subscribe rate limited");
                    if let Some(retry_at) = recommended_retry_time {
                        let wait = (retry_at - Utc::now())
                            .to_std()
                            .unwrap_or(Duration::ZERO)
                            .saturating_sub(interval);
                        if !wait.is_zero() && !ticket.sleep(wait).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    debug!(replica = %ticket.key, error = %e, retry_in_ms = interval.as_millis() as u64, "Subscribe attempt failed");
                }
            }

            if !ticket.sleep(interval).await {
                break;
            }
            interval = (interval * 2).min(self.config.max_retry_interval);
        }

        self.finish(&ticket);
    }

    /// Drop the loop's state unless a newer loop replaced it
    fn finish(&self, ticket: &LoopTicket) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions
            .get(&ticket.key)
            .is_some_and(|s| s.generation == ticket.generation)
        {
            subscriptions.remove(&ticket.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    #[derive(Default)]
    struct ScriptedSender {
        replies: Mutex<VecDeque<Result<(), SubscribeError>>>,
        attempts: Mutex<Vec<(ReplicaKey, Instant)>>,
    }

    impl ScriptedSender {
        fn with_replies(replies: Vec<Result<(), SubscribeError>>) -> Self {
            ScriptedSender {
                replies: Mutex::new(replies.into()),
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().len()
        }

        fn offsets(&self, origin: Instant) -> Vec<u64> {
            self.attempts
                .lock()
                .iter()
                .map(|(_, at)| at.duration_since(origin).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl SubscribeSender for ScriptedSender {
        async fn send_subscribe(&self, key: &ReplicaKey) -> Result<(), SubscribeError> {
            self.attempts.lock().push((key.clone(), Instant::now()));
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(SubscribeError::Timeout))
        }
    }

    fn manager(sender: Arc<ScriptedSender>) -> Arc<SubscriptionManager> {
        Arc::new(SubscriptionManager::new(SubscriptionConfig::default(), sender))
    }

    fn key() -> ReplicaKey {
        ReplicaKey::new("acc", 0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retries_after_initial_backoff() {
        let sender = Arc::new(ScriptedSender::default());
        let manager = manager(sender.clone());

        manager.subscribe(key());
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(sender.attempt_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sender.attempt_count(), 2);
        assert!(manager.is_account_subscribing("acc", Some(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_up_to_cap() {
        let sender = Arc::new(ScriptedSender::default());
        let manager = Arc::new(SubscriptionManager::new(
            SubscriptionConfig::default().with_max_retry_interval(Duration::from_secs(10)),
            sender.clone(),
        ));
        let origin = Instant::now();

        manager.subscribe(key());
        tokio::time::sleep(Duration::from_secs(40)).await;

        assert_eq!(sender.offsets(origin), vec![0, 3, 9, 19, 29, 39]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_halts_attempts() {
        let sender = Arc::new(ScriptedSender::default());
        let manager = manager(sender.clone());

        manager.subscribe(key());
        tokio::time::sleep(Duration::from_secs(1)).await;
        manager.cancel_subscribe(&key());
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(sender.attempt_count(), 1);
        assert!(!manager.is_account_subscribing("acc", None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_backoff() {
        let sender = Arc::new(ScriptedSender::with_replies(vec![
            Err(SubscribeError::Timeout),
            Err(SubscribeError::Timeout),
            Ok(()),
        ]));
        let manager = manager(sender.clone());
        let origin = Instant::now();

        manager.subscribe(key());
        tokio::time::sleep(Duration::from_secs(13)).await;

        // failures wait 3s then 6s, the success waits the initial 3s again
        assert_eq!(sender.offsets(origin), vec![0, 3, 9, 12]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_delays_retry() {
        let retry_at = Utc::now() + ChronoDuration::seconds(60);
        let sender = Arc::new(ScriptedSender::with_replies(vec![Err(
            SubscribeError::TooManyRequests {
                limit_type: "LIMIT_ACCOUNT_SUBSCRIPTIONS_PER_USER".to_string(),
                recommended_retry_time: Some(retry_at),
            },
        )]));
        let manager = manager(sender.clone());

        manager.subscribe(key());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sender.attempt_count(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(sender.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_is_idempotent_while_running() {
        let sender = Arc::new(ScriptedSender::default());
        let manager = manager(sender.clone());

        manager.subscribe(key());
        manager.subscribe(key());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sender.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_timeout_restarts_loop() {
        let sender = Arc::new(ScriptedSender::default());
        let manager = manager(sender.clone());

        manager.subscribe(key());
        tokio::time::sleep(Duration::from_secs(1)).await;
        manager.on_timeout(key());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sender.attempt_count(), 2);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(sender.attempt_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_waits_for_jitter() {
        let sender = Arc::new(ScriptedSender::default());
        let manager = Arc::new(SubscriptionManager::new(
            SubscriptionConfig::default()
                .with_disconnect_jitter(Duration::from_secs(1), Duration::from_secs(2)),
            sender.clone(),
        ));

        manager.on_disconnected(key());
        assert!(manager.is_disconnected_retry_mode(&key()));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(sender.attempt_count(), 0);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(sender.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cancels_every_loop() {
        let sender = Arc::new(ScriptedSender::default());
        let manager = manager(sender.clone());

        manager.subscribe(ReplicaKey::new("a", 0));
        manager.subscribe(ReplicaKey::new("a", 1));
        manager.subscribe(ReplicaKey::new("b", 0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sender.attempt_count(), 3);

        manager.on_reconnected();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(sender.attempt_count(), 3);
        assert!(!manager.is_account_subscribing("a", None));
        assert!(!manager.is_account_subscribing("b", None));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribes_start_one_loop() {
        let sender = Arc::new(ScriptedSender::default());
        let manager = manager(sender.clone());

        let callers = 8;
        let barrier = Arc::new(tokio::sync::Barrier::new(callers));
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager.subscribe(key());
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.is_ok());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(manager.generations.load(Ordering::Relaxed), 1);
        assert_eq!(sender.attempt_count(), 1);
        manager.cancel_all();
    }
}
