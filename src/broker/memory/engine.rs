//! Broker engine
//!
//! In-memory AMQP-style broker state responsible for:
//! - tracking connections, their channels, and close notifications
//! - routing published envelopes through exchanges into queues
//! - dispatching queued messages to consumers within their prefetch window
//! - holding unacknowledged deliveries until they are acked or nacked
//!
//! The API here is synchronous and designed to be held behind a lock by
//! `MemoryBroker`. Nothing in it awaits, so the lock is never held across a
//! suspension point.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::queue::{ConsumerSlot, Queue, StoredMessage};
use crate::broker::{Deliveries, Delivery, Envelope, ExchangeKind, QueueInfo, QueueOptions};
use crate::utils::BrokerError;

pub(crate) type ConnectionId = u64;
pub(crate) type ChannelId = u64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConnectionStatus {
    Open,
    Closed(Option<BrokerError>),
}

impl ConnectionStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionStatus::Closed(_))
    }

    pub fn cause(&self) -> Option<BrokerError> {
        match self {
            ConnectionStatus::Open => None,
            ConnectionStatus::Closed(cause) => cause.clone(),
        }
    }
}

/// Counters exposed for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub nacked: u64,
}

struct ConnectionEntry {
    status: Arc<watch::Sender<ConnectionStatus>>,
    channels: HashSet<ChannelId>,
}

struct ChannelEntry {
    connection: ConnectionId,
    prefetch: u16,
    /// (queue, consumer tag) pairs started on this channel.
    consumers: Vec<(String, String)>,
}

struct Binding {
    queue: String,
    routing_key: String,
}

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

impl Exchange {
    /// Queues the message goes to, each at most once.
    fn route(&self, routing_key: &str) -> Vec<String> {
        let targets: BTreeSet<&str> = self
            .bindings
            .iter()
            .filter(|b| self.kind == ExchangeKind::Fanout || b.routing_key == routing_key)
            .map(|b| b.queue.as_str())
            .collect();
        targets.into_iter().map(str::to_string).collect()
    }
}

struct Unacked {
    queue: String,
    channel: ChannelId,
    consumer_tag: String,
    message: StoredMessage,
}

#[derive(Default)]
pub(crate) struct Engine {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channels: HashMap<ChannelId, ChannelEntry>,
    unacked: HashMap<u64, Unacked>,
    next_id: u64,
    next_tag: u64,
    refused_dials: usize,
    offline: bool,
    stats: Stats,
}

impl Engine {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn channel_mut(&mut self, channel: ChannelId) -> Result<&mut ChannelEntry, BrokerError> {
        self.channels
            .get_mut(&channel)
            .ok_or(BrokerError::ChannelClosed)
    }

    pub fn connect(
        &mut self,
    ) -> Result<(ConnectionId, Arc<watch::Sender<ConnectionStatus>>), BrokerError> {
        if self.offline {
            return Err(BrokerError::ConnectionRefused("broker is offline".to_string()));
        }
        if self.refused_dials > 0 {
            self.refused_dials -= 1;
            return Err(BrokerError::ConnectionRefused("dial refused".to_string()));
        }

        let id = self.allocate_id();
        let status = Arc::new(watch::Sender::new(ConnectionStatus::Open));
        self.connections.insert(
            id,
            ConnectionEntry {
                status: status.clone(),
                channels: HashSet::new(),
            },
        );
        Ok((id, status))
    }

    pub fn refuse_dials(&mut self, count: usize) {
        self.refused_dials = count;
    }

    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn open_channel(&mut self, connection: ConnectionId) -> Result<ChannelId, BrokerError> {
        if !self.connections.contains_key(&connection) {
            return Err(BrokerError::ConnectionClosed("connection is closed".to_string()));
        }
        let id = self.allocate_id();
        if let Some(entry) = self.connections.get_mut(&connection) {
            entry.channels.insert(id);
        }
        self.channels.insert(
            id,
            ChannelEntry {
                connection,
                prefetch: 0,
                consumers: Vec::new(),
            },
        );
        Ok(id)
    }

    pub fn qos(&mut self, channel: ChannelId, prefetch: u16) -> Result<(), BrokerError> {
        self.channel_mut(channel)?.prefetch = prefetch;
        Ok(())
    }

    pub fn exchange_declare(
        &mut self,
        channel: ChannelId,
        name: &str,
        kind: ExchangeKind,
    ) -> Result<(), BrokerError> {
        self.channel_mut(channel)?;
        if name.is_empty() {
            return Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be declared".to_string(),
            ));
        }

        match self.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(BrokerError::PreconditionFailed(
                format!("exchange '{name}' already declared with a different type"),
            )),
            Some(_) => Ok(()),
            None => {
                self.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    pub fn queue_declare(
        &mut self,
        channel: ChannelId,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError> {
        let owner = self.channel_mut(channel)?.connection;
        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4())
        } else {
            name.to_string()
        };

        if let Some(existing) = self.queues.get(&name) {
            if !existing.accessible_by(owner) {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue '{name}' is locked by another connection"
                )));
            }
            if existing.options.durable != options.durable {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue '{name}' already declared with a different durability"
                )));
            }
            return Ok(existing.info());
        }

        let queue = Queue::new(&name, options, options.exclusive.then_some(owner));
        let info = queue.info();
        self.queues.insert(name, queue);
        Ok(info)
    }

    pub fn queue_bind(
        &mut self,
        channel: ChannelId,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel_mut(channel)?;
        if !self.queues.contains_key(queue) {
            return Err(BrokerError::NotFound(format!("no queue '{queue}'")));
        }
        let target = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::NotFound(format!("no exchange '{exchange}'")))?;

        let exists = target
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.routing_key == routing_key);
        if !exists {
            target.bindings.push(Binding {
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    /// Routes the envelope and dispatches it. Unroutable messages are dropped.
    pub fn publish(
        &mut self,
        channel: ChannelId,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), BrokerError> {
        self.channel_mut(channel)?;

        // The default exchange routes straight to the queue named by the key.
        let targets = if exchange.is_empty() {
            if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            }
        } else {
            self.exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::NotFound(format!("no exchange '{exchange}'")))?
                .route(routing_key)
        };

        self.stats.published += 1;
        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.ready.push_back(StoredMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    envelope: envelope.clone(),
                    redelivered: false,
                });
            }
            self.pump(&name);
        }
        Ok(())
    }

    pub fn consume(
        &mut self,
        channel: ChannelId,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Deliveries, BrokerError> {
        let entry = self.channel_mut(channel)?;
        let prefetch = entry.prefetch;
        let owner = entry.connection;

        let target = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("no queue '{queue}'")))?;
        if !target.accessible_by(owner) {
            return Err(BrokerError::PreconditionFailed(format!(
                "queue '{queue}' is locked by another connection"
            )));
        }
        if target.consumers.iter().any(|c| c.tag == consumer_tag) {
            return Err(BrokerError::PreconditionFailed(format!(
                "consumer tag '{consumer_tag}' already in use"
            )));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        target.subscribe(ConsumerSlot {
            tag: consumer_tag.to_string(),
            channel,
            prefetch,
            in_flight: 0,
            sender,
        });
        if let Some(entry) = self.channels.get_mut(&channel) {
            entry
                .consumers
                .push((queue.to_string(), consumer_tag.to_string()));
        }

        self.pump(queue);
        Ok(receiver)
    }

    pub fn ack(&mut self, channel: ChannelId, delivery_tag: u64) -> Result<(), BrokerError> {
        let entry = self.take_unacked(channel, delivery_tag)?;
        self.stats.acked += 1;
        if let Some(queue) = self.queues.get_mut(&entry.queue) {
            queue.release(&entry.consumer_tag);
        }
        self.pump(&entry.queue);
        Ok(())
    }

    pub fn nack(
        &mut self,
        channel: ChannelId,
        delivery_tag: u64,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let entry = self.take_unacked(channel, delivery_tag)?;
        self.stats.nacked += 1;
        if let Some(queue) = self.queues.get_mut(&entry.queue) {
            queue.release(&entry.consumer_tag);
            if requeue {
                queue.requeue(entry.message);
            }
        }
        self.pump(&entry.queue);
        Ok(())
    }

    fn take_unacked(&mut self, channel: ChannelId, delivery_tag: u64) -> Result<Unacked, BrokerError> {
        self.channel_mut(channel)?;
        let owned = self
            .unacked
            .get(&delivery_tag)
            .is_some_and(|u| u.channel == channel);
        if !owned {
            return Err(BrokerError::UnknownDeliveryTag(delivery_tag));
        }
        self.unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))
    }

    /// Cancels the channel's consumers and requeues its unacked deliveries in
    /// their original order.
    pub fn close_channel(&mut self, channel: ChannelId) -> Result<(), BrokerError> {
        let entry = self
            .channels
            .remove(&channel)
            .ok_or(BrokerError::ChannelClosed)?;
        if let Some(connection) = self.connections.get_mut(&entry.connection) {
            connection.channels.remove(&channel);
        }

        let mut touched = Vec::new();
        for (queue, tag) in entry.consumers {
            if let Some(q) = self.queues.get_mut(&queue) {
                q.cancel(&tag);
            }
            touched.push(queue);
        }

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.channel == channel)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();
        for tag in tags.into_iter().rev() {
            if let Some(unacked) = self.unacked.remove(&tag) {
                if let Some(q) = self.queues.get_mut(&unacked.queue) {
                    q.requeue(unacked.message);
                }
                touched.push(unacked.queue);
            }
        }

        touched.sort();
        touched.dedup();
        for queue in &touched {
            let abandoned = self.queues.get(queue).is_some_and(Queue::is_abandoned);
            if abandoned {
                self.delete_queue(queue);
            } else {
                self.pump(queue);
            }
        }
        Ok(())
    }

    /// Closes every channel on the connection, then fires its close notification.
    pub fn close_connection(
        &mut self,
        connection: ConnectionId,
        cause: Option<BrokerError>,
    ) -> Result<(), BrokerError> {
        let entry = self
            .connections
            .remove(&connection)
            .ok_or_else(|| BrokerError::ConnectionClosed("connection is closed".to_string()))?;

        for channel in entry.channels {
            let _ = self.close_channel(channel);
        }

        let owned: Vec<String> = self
            .queues
            .values()
            .filter(|q| q.exclusive_owner == Some(connection))
            .map(|q| q.name.clone())
            .collect();
        for queue in owned {
            self.delete_queue(&queue);
        }

        entry.status.send_replace(ConnectionStatus::Closed(cause));
        Ok(())
    }

    /// Server-initiated close of every open connection.
    pub fn drop_connections(&mut self, reason: &str) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            let cause = BrokerError::ConnectionClosed(format!("CONNECTION_FORCED - {reason}"));
            let _ = self.close_connection(id, Some(cause));
        }
    }

    fn delete_queue(&mut self, name: &str) {
        self.queues.remove(name);
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|b| b.queue != name);
        }
    }

    /// Hands ready messages to consumers until the queue is empty or every
    /// consumer is at its prefetch limit.
    fn pump(&mut self, queue_name: &str) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };

        while !queue.ready.is_empty() {
            let Some(index) = queue.next_consumer() else {
                break;
            };
            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            let Some(consumer) = queue.consumers.get_mut(index) else {
                queue.ready.push_front(message);
                break;
            };

            let delivery_tag = self.next_tag + 1;
            let delivery = Delivery {
                delivery_tag,
                redelivered: message.redelivered,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                envelope: message.envelope.clone(),
            };

            if consumer.sender.send(delivery).is_err() {
                // Receiver dropped without the channel being closed.
                queue.ready.push_front(message);
                queue.consumers.remove(index);
                continue;
            }

            self.next_tag = delivery_tag;
            consumer.in_flight += 1;
            self.stats.delivered += 1;
            self.unacked.insert(
                delivery_tag,
                Unacked {
                    queue: queue_name.to_string(),
                    channel: consumer.channel,
                    consumer_tag: consumer.tag.clone(),
                    message,
                },
            );
        }
    }

    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.ready.len())
    }

    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.consumers.len())
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.unacked.values().filter(|u| u.queue == queue).count()
    }

    pub fn is_channel_open(&self, channel: ChannelId) -> bool {
        self.channels.contains_key(&channel)
    }

    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }
}
