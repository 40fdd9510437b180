use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::engine::{ChannelId, ConnectionId, ConnectionStatus, Engine};
use crate::broker::{Channel, Connection, Deliveries, Envelope, ExchangeKind, QueueInfo, QueueOptions};
use crate::utils::BrokerError;

/// A connection to a [`MemoryBroker`](super::MemoryBroker).
#[derive(Clone)]
pub struct MemoryConnection {
    id: ConnectionId,
    engine: Arc<Mutex<Engine>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl MemoryConnection {
    pub(super) fn new(
        id: ConnectionId,
        engine: Arc<Mutex<Engine>>,
        status: Arc<watch::Sender<ConnectionStatus>>,
    ) -> Self {
        Self { id, engine, status }
    }
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn open_channel(&self) -> Result<MemoryChannel, BrokerError> {
        let id = self.engine.lock().open_channel(self.id)?;
        Ok(MemoryChannel {
            id,
            engine: self.engine.clone(),
        })
    }

    async fn closed(&self) -> Option<BrokerError> {
        let mut status = self.status.subscribe();
        match status.wait_for(ConnectionStatus::is_closed).await {
            Ok(current) => current.cause(),
            Err(_) => None,
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.engine.lock().close_connection(self.id, None)
    }

    fn is_open(&self) -> bool {
        !self.status.borrow().is_closed()
    }
}

/// A channel on a [`MemoryConnection`].
pub struct MemoryChannel {
    id: ChannelId,
    engine: Arc<Mutex<Engine>>,
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel").field("id", &self.id).finish()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        self.engine.lock().qos(self.id, prefetch_count)
    }

    async fn exchange_declare(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.engine.lock().exchange_declare(self.id, name, kind)
    }

    async fn queue_declare(&self, name: &str, options: QueueOptions) -> Result<QueueInfo, BrokerError> {
        self.engine.lock().queue_declare(self.id, name, options)
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.engine
            .lock()
            .queue_bind(self.id, queue, exchange, routing_key)
    }

    async fn publish(&self, exchange: &str, routing_key: &str, envelope: Envelope) -> Result<(), BrokerError> {
        self.engine
            .lock()
            .publish(self.id, exchange, routing_key, envelope)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Deliveries, BrokerError> {
        self.engine.lock().consume(self.id, queue, consumer_tag)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.engine.lock().ack(self.id, delivery_tag)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.engine.lock().nack(self.id, delivery_tag, requeue)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.engine.lock().close_channel(self.id)
    }

    fn is_open(&self) -> bool {
        self.engine.lock().is_channel_open(self.id)
    }
}
