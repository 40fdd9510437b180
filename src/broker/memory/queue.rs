use std::collections::VecDeque;

use tokio::sync::mpsc::UnboundedSender;

use super::engine::{ChannelId, ConnectionId};
use crate::broker::{Delivery, Envelope, QueueInfo, QueueOptions};

/// A message sitting in a queue, waiting to be delivered or redelivered.
#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub exchange: String,
    pub routing_key: String,
    pub envelope: Envelope,
    pub redelivered: bool,
}

/// A consumer attached to a queue through one channel.
#[derive(Debug)]
pub(crate) struct ConsumerSlot {
    pub tag: String,
    pub channel: ChannelId,
    /// Taken from the channel's qos at consume time; `0` is unlimited.
    pub prefetch: u16,
    pub in_flight: usize,
    pub sender: UnboundedSender<Delivery>,
}

impl ConsumerSlot {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight < usize::from(self.prefetch)
    }
}

/// Represents a queue in the in-memory broker.
///
/// Holds ready messages in FIFO order and the consumers they are dispatched
/// to, round-robin among those with prefetch capacity left.
#[derive(Debug)]
pub(crate) struct Queue {
    pub name: String,
    pub options: QueueOptions,
    pub exclusive_owner: Option<ConnectionId>,
    pub ready: VecDeque<StoredMessage>,
    pub consumers: Vec<ConsumerSlot>,
    cursor: usize,
    had_consumers: bool,
}

impl Queue {
    pub fn new(name: &str, options: QueueOptions, exclusive_owner: Option<ConnectionId>) -> Self {
        Self {
            name: name.to_string(),
            options,
            exclusive_owner,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            cursor: 0,
            had_consumers: false,
        }
    }

    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            name: self.name.clone(),
            message_count: self.ready.len(),
            consumer_count: self.consumers.len(),
        }
    }

    /// Whether `connection` may use this queue.
    pub fn accessible_by(&self, connection: ConnectionId) -> bool {
        self.exclusive_owner.is_none_or(|owner| owner == connection)
    }

    pub fn subscribe(&mut self, slot: ConsumerSlot) {
        self.had_consumers = true;
        self.consumers.push(slot);
    }

    /// Removes the consumer, dropping its sender so the delivery stream ends.
    pub fn cancel(&mut self, tag: &str) {
        self.consumers.retain(|c| c.tag != tag);
    }

    /// Frees one prefetch slot for the consumer after an ack or nack.
    pub fn release(&mut self, tag: &str) {
        if let Some(consumer) = self.consumers.iter_mut().find(|c| c.tag == tag) {
            consumer.in_flight = consumer.in_flight.saturating_sub(1);
        }
    }

    /// Puts a message back at the head of the queue.
    pub fn requeue(&mut self, mut message: StoredMessage) {
        message.redelivered = true;
        self.ready.push_front(message);
    }

    /// Index of the next consumer able to take a delivery.
    pub fn next_consumer(&mut self) -> Option<usize> {
        let count = self.consumers.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            if self.consumers.get(index).is_some_and(ConsumerSlot::has_capacity) {
                self.cursor = (index + 1) % count;
                return Some(index);
            }
        }
        None
    }

    /// Auto-delete queues go away once their last consumer is cancelled.
    pub fn is_abandoned(&self) -> bool {
        self.options.auto_delete && self.had_consumers && self.consumers.is_empty()
    }
}
