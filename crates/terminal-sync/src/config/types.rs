use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::config::{
    ClientConfig, SequencerConfig, SubscriptionConfig, TerminalStateConfig, ThrottlerConfig,
};

/// Root configuration for the mirror client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfigFile {
    #[serde(default)]
    pub connection: ConnectionConfigJson,
    #[serde(default)]
    pub packet_ordering: PacketOrderingConfigJson,
    #[serde(default)]
    pub synchronization_throttler: SynchronizationThrottlerConfigJson,
    #[serde(default)]
    pub subscription: SubscriptionConfigJson,
    #[serde(default)]
    pub terminal_state: TerminalStateConfigJson,
}

impl MirrorConfigFile {
    /// Convert to the runtime client configuration
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            sequencer: self.packet_ordering.to_sequencer_config(),
            throttler: self.synchronization_throttler.to_throttler_config(),
            subscription: self.subscription.to_subscription_config(),
            terminal_state: self.terminal_state.to_terminal_state_config(),
            status_timeout: Duration::from_secs(self.connection.status_timeout_secs),
        }
    }
}

/// Transport endpoint and the accounts to mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfigJson {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Silence on the status stream after which a replica is resubscribed
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl Default for ConnectionConfigJson {
    fn default() -> Self {
        ConnectionConfigJson {
            url: default_url(),
            request_timeout_secs: default_request_timeout(),
            status_timeout_secs: default_status_timeout(),
            accounts: Vec::new(),
        }
    }
}

impl ConnectionConfigJson {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// One mirrored account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account_id: String,
    /// Number of terminal replicas (instances 0..replicas)
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketOrderingConfigJson {
    #[serde(default = "default_ordering_timeout")]
    pub ordering_timeout_secs: u64,
    #[serde(default = "default_wait_list_size_limit")]
    pub wait_list_size_limit: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl Default for PacketOrderingConfigJson {
    fn default() -> Self {
        PacketOrderingConfigJson {
            ordering_timeout_secs: default_ordering_timeout(),
            wait_list_size_limit: default_wait_list_size_limit(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl PacketOrderingConfigJson {
    pub fn to_sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            ordering_timeout: Duration::from_secs(self.ordering_timeout_secs),
            wait_list_size_limit: self.wait_list_size_limit,
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchronizationThrottlerConfigJson {
    #[serde(default = "default_max_concurrent_synchronizations")]
    pub max_concurrent_synchronizations: usize,
    /// Cap on active synchronizations summed over every connection
    #[serde(default = "default_max_concurrent_synchronizations")]
    pub global_max_concurrent_synchronizations: usize,
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout_secs: u64,
    #[serde(default = "default_synchronization_timeout")]
    pub synchronization_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl Default for SynchronizationThrottlerConfigJson {
    fn default() -> Self {
        SynchronizationThrottlerConfigJson {
            max_concurrent_synchronizations: default_max_concurrent_synchronizations(),
            global_max_concurrent_synchronizations: default_max_concurrent_synchronizations(),
            queue_timeout_secs: default_queue_timeout(),
            synchronization_timeout_secs: default_synchronization_timeout(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl SynchronizationThrottlerConfigJson {
    pub fn to_throttler_config(&self) -> ThrottlerConfig {
        ThrottlerConfig {
            max_concurrent_synchronizations: self.max_concurrent_synchronizations,
            queue_timeout: Duration::from_secs(self.queue_timeout_secs),
            synchronization_timeout: Duration::from_secs(self.synchronization_timeout_secs),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfigJson {
    #[serde(default = "default_initial_retry_interval")]
    pub initial_retry_interval_secs: u64,
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval_secs: u64,
    #[serde(default = "default_jitter_min")]
    pub disconnect_jitter_min_secs: u64,
    #[serde(default = "default_jitter_max")]
    pub disconnect_jitter_max_secs: u64,
}

impl Default for SubscriptionConfigJson {
    fn default() -> Self {
        SubscriptionConfigJson {
            initial_retry_interval_secs: default_initial_retry_interval(),
            max_retry_interval_secs: default_max_retry_interval(),
            disconnect_jitter_min_secs: default_jitter_min(),
            disconnect_jitter_max_secs: default_jitter_max(),
        }
    }
}

impl SubscriptionConfigJson {
    pub fn to_subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            initial_retry_interval: Duration::from_secs(self.initial_retry_interval_secs),
            max_retry_interval: Duration::from_secs(self.max_retry_interval_secs),
            disconnect_jitter_min: Duration::from_secs(self.disconnect_jitter_min_secs),
            disconnect_jitter_max: Duration::from_secs(self.disconnect_jitter_max_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalStateConfigJson {
    #[serde(default = "default_broker_status_timeout")]
    pub broker_status_timeout_secs: u64,
}

impl Default for TerminalStateConfigJson {
    fn default() -> Self {
        TerminalStateConfigJson {
            broker_status_timeout_secs: default_broker_status_timeout(),
        }
    }
}

impl TerminalStateConfigJson {
    pub fn to_terminal_state_config(&self) -> TerminalStateConfig {
        TerminalStateConfig {
            broker_status_timeout: Duration::from_secs(self.broker_status_timeout_secs),
        }
    }
}

// Default value functions for serde
fn default_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_status_timeout() -> u64 {
    60
}

fn default_replicas() -> u32 {
    1
}

fn default_ordering_timeout() -> u64 {
    60
}

fn default_wait_list_size_limit() -> usize {
    100
}

fn default_sweep_interval() -> u64 {
    1000
}

fn default_max_concurrent_synchronizations() -> usize {
    15
}

fn default_queue_timeout() -> u64 {
    300
}

fn default_synchronization_timeout() -> u64 {
    10
}

fn default_initial_retry_interval() -> u64 {
    3
}

fn default_max_retry_interval() -> u64 {
    300
}

fn default_jitter_min() -> u64 {
    1
}

fn default_jitter_max() -> u64 {
    5
}

fn default_broker_status_timeout() -> u64 {
    60
}
