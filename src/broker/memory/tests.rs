use super::MemoryBroker;
use crate::broker::{Channel, Connection, Envelope, ExchangeKind, FieldTable, QueueOptions};
use crate::utils::BrokerError;

fn envelope(body: &str) -> Envelope {
    Envelope::json(body.as_bytes().to_vec(), FieldTable::new())
}

#[tokio::test]
async fn test_default_exchange_routes_by_queue_name() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();
    ch.queue_declare("jobs", QueueOptions::DURABLE).await.unwrap();

    ch.publish("", "jobs", envelope("1")).await.unwrap();
    ch.publish("", "missing", envelope("2")).await.unwrap();

    assert_eq!(broker.queue_depth("jobs"), Some(1));
    assert_eq!(broker.queue_depth("missing"), None);
    assert_eq!(broker.stats().published, 2);
}

#[tokio::test]
async fn test_direct_and_fanout_routing() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();

    ch.exchange_declare("orders", ExchangeKind::Direct).await.unwrap();
    ch.exchange_declare("events", ExchangeKind::Fanout).await.unwrap();
    for q in ["created", "shipped", "audit"] {
        ch.queue_declare(q, QueueOptions::DURABLE).await.unwrap();
    }
    ch.queue_bind("created", "orders", "order.created").await.unwrap();
    ch.queue_bind("shipped", "orders", "order.shipped").await.unwrap();
    ch.queue_bind("created", "events", "").await.unwrap();
    ch.queue_bind("audit", "events", "").await.unwrap();

    ch.publish("orders", "order.created", envelope("a")).await.unwrap();
    ch.publish("events", "anything", envelope("b")).await.unwrap();

    assert_eq!(broker.queue_depth("created"), Some(2));
    assert_eq!(broker.queue_depth("shipped"), Some(0));
    assert_eq!(broker.queue_depth("audit"), Some(1));
}

#[tokio::test]
async fn test_fanout_delivers_one_copy_per_queue() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();

    ch.exchange_declare("fan", ExchangeKind::Fanout).await.unwrap();
    ch.queue_declare("a", QueueOptions::DURABLE).await.unwrap();
    ch.queue_declare("b", QueueOptions::DURABLE).await.unwrap();
    ch.queue_bind("a", "fan", "k1").await.unwrap();
    ch.queue_bind("b", "fan", "").await.unwrap();
    ch.queue_bind("a", "fan", "k2").await.unwrap();

    ch.publish("fan", "whatever", envelope("x")).await.unwrap();

    assert_eq!(broker.queue_depth("a"), Some(1));
    assert_eq!(broker.queue_depth("b"), Some(1));
}

#[tokio::test]
async fn test_publish_to_unknown_exchange_fails() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();

    let err = ch.publish("nope", "key", envelope("x")).await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound(_)));
}

#[tokio::test]
async fn test_redeclare_with_different_flags_fails() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();

    ch.exchange_declare("orders", ExchangeKind::Direct).await.unwrap();
    let err = ch.exchange_declare("orders", ExchangeKind::Fanout).await.unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));

    ch.queue_declare("jobs", QueueOptions::DURABLE).await.unwrap();
    let transient = QueueOptions {
        durable: false,
        ..QueueOptions::DURABLE
    };
    let err = ch.queue_declare("jobs", transient).await.unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_server_named_queue() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();

    let info = ch.queue_declare("", QueueOptions::DURABLE).await.unwrap();
    assert!(info.name.starts_with("amq.gen-"));
    assert_eq!(broker.queue_depth(&info.name), Some(0));
}

#[tokio::test]
async fn test_prefetch_limits_in_flight_deliveries() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();
    ch.queue_declare("jobs", QueueOptions::DURABLE).await.unwrap();
    ch.qos(2).await.unwrap();

    for i in 0..5 {
        ch.publish("", "jobs", envelope(&i.to_string())).await.unwrap();
    }
    let mut deliveries = ch.consume("jobs", "c1").await.unwrap();

    let first = deliveries.recv().await.unwrap();
    let second = deliveries.recv().await.unwrap();
    assert!(deliveries.try_recv().is_err());
    assert_eq!(broker.unacked_count("jobs"), 2);
    assert_eq!(broker.queue_depth("jobs"), Some(3));

    ch.ack(first.delivery_tag).await.unwrap();
    let third = deliveries.recv().await.unwrap();
    assert_eq!(third.envelope.body, b"2");

    ch.ack(second.delivery_tag).await.unwrap();
    ch.ack(third.delivery_tag).await.unwrap();
    assert_eq!(broker.unacked_count("jobs"), 2);
    assert_eq!(broker.queue_depth("jobs"), Some(0));
}

#[tokio::test]
async fn test_nack_requeue_redelivers_at_head() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();
    ch.queue_declare("jobs", QueueOptions::DURABLE).await.unwrap();
    ch.qos(1).await.unwrap();

    ch.publish("", "jobs", envelope("first")).await.unwrap();
    ch.publish("", "jobs", envelope("second")).await.unwrap();
    let mut deliveries = ch.consume("jobs", "c1").await.unwrap();

    let d = deliveries.recv().await.unwrap();
    assert!(!d.redelivered);
    ch.nack(d.delivery_tag, true).await.unwrap();

    let again = deliveries.recv().await.unwrap();
    assert_eq!(again.envelope.body, b"first");
    assert!(again.redelivered);
    assert_ne!(again.delivery_tag, d.delivery_tag);

    ch.nack(again.delivery_tag, false).await.unwrap();
    let next = deliveries.recv().await.unwrap();
    assert_eq!(next.envelope.body, b"second");

    let stats = broker.stats();
    assert_eq!(stats.nacked, 2);
    assert_eq!(stats.delivered, 3);
}

#[tokio::test]
async fn test_ack_is_scoped_to_channel_and_single_use() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();
    let other = conn.open_channel().await.unwrap();
    ch.queue_declare("jobs", QueueOptions::DURABLE).await.unwrap();

    ch.publish("", "jobs", envelope("x")).await.unwrap();
    let mut deliveries = ch.consume("jobs", "c1").await.unwrap();
    let d = deliveries.recv().await.unwrap();

    assert_eq!(
        other.ack(d.delivery_tag).await,
        Err(BrokerError::UnknownDeliveryTag(d.delivery_tag))
    );
    ch.ack(d.delivery_tag).await.unwrap();
    assert_eq!(
        ch.ack(d.delivery_tag).await,
        Err(BrokerError::UnknownDeliveryTag(d.delivery_tag))
    );
}

#[tokio::test]
async fn test_channel_close_ends_stream_and_requeues_unacked() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();
    ch.queue_declare("jobs", QueueOptions::DURABLE).await.unwrap();

    ch.publish("", "jobs", envelope("a")).await.unwrap();
    ch.publish("", "jobs", envelope("b")).await.unwrap();
    let mut deliveries = ch.consume("jobs", "c1").await.unwrap();
    deliveries.recv().await.unwrap();
    deliveries.recv().await.unwrap();
    assert_eq!(broker.queue_depth("jobs"), Some(0));

    ch.close().await.unwrap();
    assert!(!ch.is_open());
    assert!(deliveries.recv().await.is_none());
    assert_eq!(broker.queue_depth("jobs"), Some(2));
    assert_eq!(broker.unacked_count("jobs"), 0);
    assert_eq!(ch.close().await, Err(BrokerError::ChannelClosed));

    let ch2 = conn.open_channel().await.unwrap();
    let mut deliveries = ch2.consume("jobs", "c2").await.unwrap();
    let first = deliveries.recv().await.unwrap();
    assert_eq!(first.envelope.body, b"a");
    assert!(first.redelivered);
}

#[tokio::test]
async fn test_round_robin_between_consumers() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch1 = conn.open_channel().await.unwrap();
    let ch2 = conn.open_channel().await.unwrap();
    ch1.queue_declare("jobs", QueueOptions::DURABLE).await.unwrap();

    let mut a = ch1.consume("jobs", "a").await.unwrap();
    let mut b = ch2.consume("jobs", "b").await.unwrap();
    for i in 0..4 {
        ch1.publish("", "jobs", envelope(&i.to_string())).await.unwrap();
    }

    assert_eq!(a.recv().await.unwrap().envelope.body, b"0");
    assert_eq!(b.recv().await.unwrap().envelope.body, b"1");
    assert_eq!(a.recv().await.unwrap().envelope.body, b"2");
    assert_eq!(b.recv().await.unwrap().envelope.body, b"3");
}

#[tokio::test]
async fn test_exclusive_and_auto_delete_queues() {
    let broker = MemoryBroker::new();
    let owner = broker.connect().unwrap();
    let stranger = broker.connect().unwrap();
    let ch = owner.open_channel().await.unwrap();
    let other = stranger.open_channel().await.unwrap();

    let exclusive = QueueOptions {
        exclusive: true,
        ..QueueOptions::DURABLE
    };
    ch.queue_declare("private", exclusive).await.unwrap();
    let err = other.consume("private", "x").await.unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));

    let auto_delete = QueueOptions {
        auto_delete: true,
        ..QueueOptions::DURABLE
    };
    ch.queue_declare("temp", auto_delete).await.unwrap();
    let consumer_channel = owner.open_channel().await.unwrap();
    let _deliveries = consumer_channel.consume("temp", "t").await.unwrap();
    assert_eq!(broker.consumer_count("temp"), Some(1));
    consumer_channel.close().await.unwrap();
    assert_eq!(broker.queue_depth("temp"), None);

    owner.close().await.unwrap();
    assert_eq!(broker.queue_depth("private"), None);
}

#[tokio::test]
async fn test_dial_failures_and_offline() {
    let broker = MemoryBroker::new();
    broker.refuse_next_dials(2);
    assert!(matches!(
        broker.connect(),
        Err(BrokerError::ConnectionRefused(_))
    ));
    assert!(broker.connect().is_err());
    assert!(broker.connect().is_ok());

    broker.set_offline(true);
    assert!(broker.connect().is_err());
    broker.set_offline(false);

    let dial = broker.dialer();
    let conn = dial().await.unwrap();
    assert!(conn.is_open());
}

#[tokio::test]
async fn test_forced_close_notifies_with_cause() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();
    let ch = conn.open_channel().await.unwrap();
    let watcher = conn.clone();
    let notified = tokio::spawn(async move { watcher.closed().await });

    tokio::task::yield_now().await;
    broker.drop_connections();

    let cause = notified.await.unwrap();
    assert!(matches!(cause, Some(BrokerError::ConnectionClosed(_))));
    assert!(!conn.is_open());
    assert!(!ch.is_open());
    assert_eq!(broker.open_connections(), 0);
    assert!(conn.open_channel().await.is_err());
}

#[tokio::test]
async fn test_graceful_close_notifies_without_cause() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().unwrap();

    conn.close().await.unwrap();
    assert_eq!(conn.closed().await, None);
    assert!(conn.close().await.is_err());
}
