//! An embedded, in-process broker with AMQP 0-9-1 semantics.
//!
//! `MemoryBroker` backs the demo binary and the test suite. It supports the
//! default, direct and fanout exchanges, durable/exclusive/auto-delete
//! queues, per-consumer prefetch, manual ack/nack with requeue, and
//! server-initiated connection closes. Fault injection hooks make dial
//! failures and broker outages reproducible.

mod connection;
mod engine;
mod queue;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::broker::{DialFn, dial_fn};
use crate::utils::BrokerError;

pub use connection::{MemoryChannel, MemoryConnection};
pub use engine::Stats;

use engine::Engine;

/// Handle to a shared in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    engine: Arc<Mutex<Engine>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new connection, honoring any injected dial failures.
    pub fn connect(&self) -> Result<MemoryConnection, BrokerError> {
        let (id, status) = self.engine.lock().connect()?;
        Ok(MemoryConnection::new(id, self.engine.clone(), status))
    }

    /// A [`DialFn`] that opens connections on this broker.
    pub fn dialer(&self) -> DialFn<MemoryConnection> {
        let broker = self.clone();
        dial_fn(move || {
            let broker = broker.clone();
            async move { broker.connect() }
        })
    }

    /// The next `count` dial attempts fail with `ConnectionRefused`.
    pub fn refuse_next_dials(&self, count: usize) {
        self.engine.lock().refuse_dials(count);
    }

    /// While offline every dial attempt is refused.
    pub fn set_offline(&self, offline: bool) {
        self.engine.lock().set_offline(offline);
    }

    /// Closes every open connection as the server would on a forced shutdown.
    pub fn drop_connections(&self) {
        self.engine.lock().drop_connections("closed by broker");
    }

    /// Number of ready (not yet delivered) messages, if the queue exists.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.engine.lock().queue_depth(queue)
    }

    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.engine.lock().consumer_count(queue)
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.engine.lock().unacked_count(queue)
    }

    pub fn open_connections(&self) -> usize {
        self.engine.lock().open_connections()
    }

    pub fn stats(&self) -> Stats {
        self.engine.lock().stats()
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("open_connections", &self.open_connections())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests;
