use serde::Serialize;
use tracing::{Instrument, Span, field, info_span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::backoff::BackoffPolicy;
use super::supervisor::Supervisor;
use crate::broker::{Channel, Connection, DialFn, Envelope, FieldTable};
use crate::telemetry::{self, MESSAGING_SYSTEM};
use crate::utils::Result;

/// Publishes JSON messages over a supervised connection.
///
/// Publishing never waits for a reconnect: while the link is down,
/// [`Publisher::publish_json`] fails with [`crate::MqError::NoChannel`].
pub struct Publisher<C: Connection> {
    supervisor: Supervisor<C>,
}

impl<C: Connection> Publisher<C> {
    /// Takes ownership of `connection` for publishing; `dial` is used for
    /// every reconnect after it drops.
    pub async fn start(connection: C, dial: DialFn<C>, backoff: BackoffPolicy) -> Result<Self> {
        let supervisor = Supervisor::start(connection, dial, backoff).await?;
        Ok(Self { supervisor })
    }

    pub fn supervisor(&self) -> &Supervisor<C> {
        &self.supervisor
    }

    /// Serializes `body` and publishes it as a persistent `application/json`
    /// message carrying the current trace context in its headers.
    pub async fn publish_json<T>(&self, exchange: &str, routing_key: &str, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)?;

        let span = info_span!(
            "rabbitmq.publish",
            otel.kind = "producer",
            messaging.system = MESSAGING_SYSTEM,
            messaging.destination = exchange,
            messaging.destination_kind = "exchange",
            messaging.rabbitmq.routing_key = routing_key,
            messaging.message.body.size = field::Empty,
            otel.status_code = field::Empty,
            otel.status_message = field::Empty,
        );

        let result = self
            .send(&span, exchange, routing_key, payload)
            .instrument(span.clone())
            .await;

        if let Err(err) = &result {
            telemetry::record_error(&span, err);
        }
        result
    }

    async fn send(&self, span: &Span, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        let mut headers = FieldTable::new();
        telemetry::inject_context(&span.context(), &mut headers);

        let size = payload.len() as u64;
        let envelope = Envelope::json(payload, headers);

        let channel = self.supervisor.channel()?;
        channel.publish(exchange, routing_key, envelope).await?;

        span.record("messaging.message.body.size", size);
        Ok(())
    }

    /// Stops reconnecting and closes the publish channel. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.supervisor.close().await?;
        Ok(())
    }
}
