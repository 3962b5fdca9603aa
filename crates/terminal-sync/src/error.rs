use mirror_core::InstanceIndex;
use mirror_ports::TransportError;
use thiserror::Error;

/// Failure of a scheduled synchronization
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynchronizationError {
    /// The request was not admitted and sent before the queue timeout elapsed
    #[error("synchronization of {account_id}:{instance_index} timed out in queue")]
    QueueTimeout {
        account_id: String,
        instance_index: InstanceIndex,
    },
}

/// Failure to turn a raw frame into a synchronization packet
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("packet is not a JSON object")]
    NotAnObject,

    #[error("packet has no accountId")]
    MissingAccountId,

    #[error("invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
}

/// Errors returned by the streaming client's public operations
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error(transparent)]
    Synchronization(#[from] SynchronizationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}
