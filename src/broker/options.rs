use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
}

/// Flags for `queue.declare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
}

impl QueueOptions {
    /// Survives broker restarts, outlives its consumers, shareable across connections.
    pub const DURABLE: QueueOptions = QueueOptions {
        durable: true,
        auto_delete: false,
        exclusive: false,
    };
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::DURABLE
    }
}

/// Result of a successful `queue.declare`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: usize,
    pub consumer_count: usize,
}
