use mirror_core::Timestamp;
use thiserror::Error;

/// Errors raised by the transport carrying outbound requests
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("channel closed")]
    ChannelClosed,

    #[error("not connected")]
    NotConnected,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("API error {code}: {message}")]
    Api { code: String, message: String },
}

/// Errors returned by a subscribe round trip
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscribeError {
    /// Server-side rate limit, optionally with the time it suggests retrying at
    #[error("too many requests ({limit_type})")]
    TooManyRequests {
        limit_type: String,
        recommended_retry_time: Option<Timestamp>,
    },

    #[error("subscribe request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SubscribeError {
    pub fn recommended_retry_time(&self) -> Option<Timestamp> {
        match self {
            SubscribeError::TooManyRequests {
                recommended_retry_time,
                ..
            } => *recommended_retry_time,
            _ => None,
        }
    }
}

/// Failure reported by a synchronization listener
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("listener failed: {0}")]
    Handler(String),

    #[error("listener storage failed: {0}")]
    Storage(String),
}

pub type ListenerResult = std::result::Result<(), ListenerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_recommended_retry_time() {
        let retry_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = SubscribeError::TooManyRequests {
            limit_type: "LIMIT_ACCOUNT_SUBSCRIPTIONS_PER_USER".to_string(),
            recommended_retry_time: Some(retry_at),
        };
        assert_eq!(err.recommended_retry_time(), Some(retry_at));
        assert_eq!(SubscribeError::Timeout.recommended_retry_time(), None);
    }
}
