use std::time::Duration;

/// Configuration for the packet sequencer
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// How long a gap may stay open before it is reported
    pub ordering_timeout: Duration,
    /// Maximum packets buffered per replica while waiting for a gap to fill
    pub wait_list_size_limit: usize,
    /// Period of the stuck-gap sweep
    pub sweep_interval: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        SequencerConfig {
            ordering_timeout: Duration::from_secs(60),
            wait_list_size_limit: 100,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl SequencerConfig {
    pub fn with_ordering_timeout(mut self, timeout: Duration) -> Self {
        self.ordering_timeout = timeout;
        self
    }

    pub fn with_wait_list_size_limit(mut self, limit: usize) -> Self {
        self.wait_list_size_limit = limit;
        self
    }
}

/// Configuration for the synchronization throttler
#[derive(Debug, Clone)]
pub struct ThrottlerConfig {
    /// Upper bound on concurrent synchronizations for one connection
    pub max_concurrent_synchronizations: usize,
    /// Queued requests older than this fail with a timeout
    pub queue_timeout: Duration,
    /// Slots not renewed within this window are considered finished
    pub synchronization_timeout: Duration,
    /// Period of the expiry sweep
    pub sweep_interval: Duration,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        ThrottlerConfig {
            max_concurrent_synchronizations: 15,
            queue_timeout: Duration::from_secs(300),
            synchronization_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl ThrottlerConfig {
    pub fn with_max_concurrent_synchronizations(mut self, max: usize) -> Self {
        self.max_concurrent_synchronizations = max;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn with_synchronization_timeout(mut self, timeout: Duration) -> Self {
        self.synchronization_timeout = timeout;
        self
    }
}

/// Configuration for the subscription retry loops
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub initial_retry_interval: Duration,
    pub max_retry_interval: Duration,
    /// Random delay range applied before resubscribing after a disconnect
    pub disconnect_jitter_min: Duration,
    pub disconnect_jitter_max: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        SubscriptionConfig {
            initial_retry_interval: Duration::from_secs(3),
            max_retry_interval: Duration::from_secs(300),
            disconnect_jitter_min: Duration::from_secs(1),
            disconnect_jitter_max: Duration::from_secs(5),
        }
    }
}

impl SubscriptionConfig {
    pub fn with_initial_retry_interval(mut self, interval: Duration) -> Self {
        self.initial_retry_interval = interval;
        self
    }

    pub fn with_max_retry_interval(mut self, interval: Duration) -> Self {
        self.max_retry_interval = interval;
        self
    }

    pub fn with_disconnect_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.disconnect_jitter_min = min;
        self.disconnect_jitter_max = max;
        self
    }
}

/// Configuration for the terminal state projection
#[derive(Debug, Clone)]
pub struct TerminalStateConfig {
    /// Without a fresh broker status report within this window the terminal
    /// is considered disconnected from the broker
    pub broker_status_timeout: Duration,
}

impl Default for TerminalStateConfig {
    fn default() -> Self {
        TerminalStateConfig {
            broker_status_timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration for a streaming client (one transport connection)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub sequencer: SequencerConfig,
    pub throttler: ThrottlerConfig,
    pub subscription: SubscriptionConfig,
    pub terminal_state: TerminalStateConfig,
    /// Silence on a replica's status stream after which it is resubscribed
    pub status_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            sequencer: SequencerConfig::default(),
            throttler: ThrottlerConfig::default(),
            subscription: SubscriptionConfig::default(),
            terminal_state: TerminalStateConfig::default(),
            status_timeout: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }
}
