use std::future::Future;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, field, info, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use crate::broker::{Channel, Connection, Delivery, QueueOptions};
use crate::telemetry::{self, MESSAGING_SYSTEM};
use crate::utils::{HandlerError, MqError, Result};

/// Prefetch applied when the caller passes `0`.
pub const DEFAULT_PREFETCH: u16 = 10;

/// The queue a consumer is attached to, as declared on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub name: String,
    pub durable: bool,
    pub prefetch: u16,
}

/// Outcome of one delivery.
enum Disposition {
    Ack,
    /// Handler failed; the broker should redeliver.
    Requeue(HandlerError),
    /// Payload can never be processed; drop it.
    Reject(HandlerError),
}

/// Manual-ack consumer on a durable queue.
///
/// The consumer owns its channel and does not reconnect. When the channel
/// goes away [`Consumer::handle`] returns [`MqError::ConsumerChannelClosed`]
/// and the caller builds a new consumer.
pub struct Consumer<Ch: Channel> {
    channel: Ch,
    queue: QueueBinding,
}

impl<Ch: Channel> Consumer<Ch> {
    /// Opens a channel on `connection`, applies `prefetch` (0 selects
    /// [`DEFAULT_PREFETCH`]) and declares `queue` as durable.
    pub async fn new<C>(connection: &C, queue: &str, prefetch: u16) -> Result<Self>
    where
        C: Connection<Channel = Ch>,
    {
        let prefetch = if prefetch == 0 { DEFAULT_PREFETCH } else { prefetch };
        let channel = connection.open_channel().await?;

        let declared = async {
            channel.qos(prefetch).await?;
            channel.queue_declare(queue, QueueOptions::DURABLE).await
        }
        .await;

        match declared {
            Ok(info) => Ok(Self {
                channel,
                queue: QueueBinding {
                    name: info.name,
                    durable: true,
                    prefetch,
                },
            }),
            Err(err) => {
                let _ = channel.close().await;
                Err(err.into())
            }
        }
    }

    pub fn queue(&self) -> &QueueBinding {
        &self.queue
    }

    pub fn prefetch(&self) -> u16 {
        self.queue.prefetch
    }

    /// Consumes until `cancel` fires or the channel closes, passing each raw
    /// body to `handler`. `Ok` acks the delivery, `Err` nacks it with requeue.
    ///
    /// Deliveries are handled one at a time in arrival order. The returned
    /// error is [`MqError::Cancelled`] or [`MqError::ConsumerChannelClosed`].
    pub async fn handle<F, Fut, E>(&self, cancel: &CancellationToken, mut handler: F) -> Result<()>
    where
        F: FnMut(Vec<u8>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<HandlerError>,
    {
        self.run(cancel, |body| {
            let outcome = handler(body);
            async move {
                match outcome.await {
                    Ok(()) => Disposition::Ack,
                    Err(err) => Disposition::Requeue(err.into()),
                }
            }
        })
        .await
    }

    /// Like [`Consumer::handle`], decoding each body as JSON first. Bodies
    /// that fail to decode are rejected without requeue.
    pub async fn handle_json<T, F, Fut, E>(&self, cancel: &CancellationToken, mut handler: F) -> Result<()>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<HandlerError>,
    {
        self.run(cancel, |body| {
            let outcome = serde_json::from_slice::<T>(&body).map(&mut handler);
            async move {
                match outcome {
                    Err(err) => Disposition::Reject(Box::new(err)),
                    Ok(pending) => match pending.await {
                        Ok(()) => Disposition::Ack,
                        Err(err) => Disposition::Requeue(err.into()),
                    },
                }
            }
        })
        .await
    }

    async fn run<D, Fut>(&self, cancel: &CancellationToken, mut dispatch: D) -> Result<()>
    where
        D: FnMut(Vec<u8>) -> Fut,
        Fut: Future<Output = Disposition>,
    {
        let tag = format!("tethermq-{}", Uuid::new_v4());
        let mut deliveries = self.channel.consume(&self.queue.name, &tag).await?;
        info!(queue = %self.queue.name, consumer_tag = %tag, prefetch = self.queue.prefetch, "consuming");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MqError::Cancelled),
                next = deliveries.recv() => match next {
                    Some(delivery) => delivery,
                    None => return Err(MqError::ConsumerChannelClosed),
                },
            };
            self.process(delivery, &mut dispatch).await;
        }
    }

    async fn process<D, Fut>(&self, delivery: Delivery, dispatch: &mut D)
    where
        D: FnMut(Vec<u8>) -> Fut,
        Fut: Future<Output = Disposition>,
    {
        let Delivery {
            delivery_tag,
            redelivered,
            envelope,
            ..
        } = delivery;

        let span = info_span!(
            "rabbitmq.consume",
            otel.kind = "consumer",
            messaging.system = MESSAGING_SYSTEM,
            messaging.destination = %self.queue.name,
            messaging.destination_kind = "queue",
            messaging.operation = "receive",
            messaging.message.body.size = envelope.body.len() as u64,
            messaging.rabbitmq.redelivered = redelivered,
            otel.status_code = field::Empty,
            otel.status_message = field::Empty,
        );
        if !envelope.headers.is_empty() {
            let _ = span.set_parent(telemetry::extract_context(&envelope.headers));
        }

        let disposition = dispatch(envelope.body).instrument(span.clone()).await;

        match disposition {
            Disposition::Ack => {
                if let Err(err) = self.channel.ack(delivery_tag).await {
                    span.in_scope(|| warn!(delivery_tag, error = %err, "failed to ack delivery"));
                }
            }
            Disposition::Requeue(err) => {
                telemetry::record_error(&span, &err);
                span.in_scope(|| error!(queue = %self.queue.name, error = %err, "consume error"));
                self.nack(&span, delivery_tag, true).await;
            }
            Disposition::Reject(err) => {
                telemetry::record_error(&span, &err);
                span.in_scope(|| error!(queue = %self.queue.name, error = %err, "discarding undecodable message"));
                self.nack(&span, delivery_tag, false).await;
            }
        }
    }

    async fn nack(&self, span: &Span, delivery_tag: u64, requeue: bool) {
        if let Err(err) = self.channel.nack(delivery_tag, requeue).await {
            span.in_scope(|| warn!(delivery_tag, requeue, error = %err, "failed to nack delivery"));
        }
    }

    /// Closes the consumer's channel. Unacked deliveries return to the queue.
    pub async fn close(&self) -> Result<()> {
        self.channel.close().await?;
        Ok(())
    }
}
