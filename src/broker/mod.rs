//! The `broker` module defines the seam between the client and an AMQP-like
//! broker, plus an embedded in-memory broker implementing it.
//!
//! The client never speaks a wire protocol itself. It drives a [`Connection`]
//! and the [`Channel`]s multiplexed over it, and learns about server-side
//! teardown through [`Connection::closed`].

pub mod memory;
pub mod message;
pub mod options;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::utils::BrokerError;

pub use message::{CONTENT_TYPE_JSON, Delivery, DeliveryMode, Envelope, FieldTable, FieldValue};
pub use options::{ExchangeKind, QueueInfo, QueueOptions};

/// Ordered stream of deliveries for one consumer. Ends when the channel that
/// created it is torn down.
pub type Deliveries = UnboundedReceiver<Delivery>;

/// A logical session with the broker.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Channel: Channel;

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;

    /// Resolves once the connection is closed. `Some` carries the cause of a
    /// server-initiated or abnormal close, `None` means a graceful close.
    async fn closed(&self) -> Option<BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

/// A lightweight session multiplexed over a [`Connection`].
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Maximum unacknowledged deliveries per consumer; `0` means unlimited.
    async fn qos(&self, prefetch_count: u16) -> Result<(), BrokerError>;

    async fn exchange_declare(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError>;

    async fn queue_declare(&self, name: &str, options: QueueOptions) -> Result<QueueInfo, BrokerError>;

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError>;

    /// Fire-and-forget publish; no publisher confirm is awaited.
    async fn publish(&self, exchange: &str, routing_key: &str, envelope: Envelope) -> Result<(), BrokerError>;

    /// Start a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Deliveries, BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

/// Factory for fresh connections, supplied by the owning process so broker
/// address and credentials stay outside the client.
pub type DialFn<C> = Arc<dyn Fn() -> BoxFuture<'static, Result<C, BrokerError>> + Send + Sync>;

/// Wrap an async closure into a [`DialFn`].
pub fn dial_fn<C, F, Fut>(dial: F) -> DialFn<C>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, BrokerError>> + Send + 'static,
{
    Arc::new(move || dial().boxed())
}

#[cfg(test)]
mod tests;
