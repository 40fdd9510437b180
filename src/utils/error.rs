//! The `error` module defines the error types used within `tethermq`.
//!
//! Errors are layered: [`BrokerError`] describes a failure reported by the
//! broker transport, [`Unavailable`] describes why the supervisor could not
//! hand out a channel, and [`MqError`] is what the publisher and consumer
//! return to callers. Callers inspect the variant, never the message text.

use thiserror::Error;

/// A failure reported by a broker connection or channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
}

/// Why the supervisor has no channel to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unavailable {
    #[error("publisher is closed")]
    Closed,

    #[error("channel is not available")]
    NotEstablished,
}

#[derive(Debug, Error)]
pub enum MqError {
    #[error("failed to serialize message body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to get channel: {0}")]
    NoChannel(#[from] Unavailable),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("consumer channel closed")]
    ConsumerChannelClosed,

    #[error("consume loop cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MqError {
    /// True for failures caused by a temporarily missing link: the publisher
    /// is between connections, or a publish raced a connection drop.
    /// Retrying later may succeed. A closed publisher is never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MqError::NoChannel(Unavailable::NotEstablished)
                | MqError::Broker(BrokerError::ChannelClosed | BrokerError::ConnectionClosed(_))
        )
    }
}

/// Error type returned by business handlers plugged into a consumer.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, MqError>;
