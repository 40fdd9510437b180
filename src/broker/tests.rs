use super::memory::MemoryBroker;
use super::{CONTENT_TYPE_JSON, DeliveryMode, Envelope, FieldTable, FieldValue, dial_fn};
use crate::utils::BrokerError;

#[test]
fn test_field_value_display() {
    assert_eq!(FieldValue::from("abc").to_string(), "abc");
    assert_eq!(FieldValue::from(42i64).to_string(), "42");
    assert_eq!(FieldValue::from(true).to_string(), "true");
    assert_eq!(FieldValue::Float(1.5).to_string(), "1.5");
    assert_eq!(FieldValue::Bytes(b"raw".to_vec()).to_string(), "raw");
}

#[test]
fn test_json_envelope_defaults() {
    let mut headers = FieldTable::new();
    headers.insert("traceparent".to_string(), FieldValue::from("x"));
    let envelope = Envelope::json(b"{}".to_vec(), headers.clone());

    assert_eq!(envelope.content_type.as_deref(), Some(CONTENT_TYPE_JSON));
    assert_eq!(envelope.delivery_mode, DeliveryMode::Persistent);
    assert!(envelope.timestamp.is_some());
    assert!(envelope.message_id.is_some());
    assert_eq!(envelope.headers, headers);
}

#[tokio::test]
async fn test_dial_fn_wraps_async_closure() {
    let broker = MemoryBroker::new();
    let for_dial = broker.clone();
    let dial = dial_fn(move || {
        let broker = for_dial.clone();
        async move { broker.connect() }
    });

    assert!(dial().await.is_ok());
    broker.set_offline(true);
    assert!(matches!(
        dial().await,
        Err(BrokerError::ConnectionRefused(_))
    ));
}
