use crate::broker::{Channel, ExchangeKind, QueueOptions};
use crate::config::BrokerSettings;
use crate::utils::BrokerError;

/// Exchange, queue and binding a producer/consumer pair agree on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub kind: ExchangeKind,
    pub queue: String,
    pub routing_key: String,
}

impl Topology {
    /// Declares the exchange and a durable queue, then binds them. Safe to
    /// repeat with the same settings.
    pub async fn declare<Ch: Channel>(&self, channel: &Ch) -> Result<(), BrokerError> {
        channel.exchange_declare(&self.exchange, self.kind).await?;
        channel.queue_declare(&self.queue, QueueOptions::DURABLE).await?;
        channel
            .queue_bind(&self.queue, &self.exchange, &self.routing_key)
            .await
    }
}

impl From<&BrokerSettings> for Topology {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            exchange: settings.exchange.clone(),
            kind: settings.exchange_kind,
            queue: settings.queue.clone(),
            routing_key: settings.routing_key.clone(),
        }
    }
}
