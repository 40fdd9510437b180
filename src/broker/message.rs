//! Message definitions for the broker seam
//!
//! `Envelope` is what a publisher hands to a channel and what a consumer gets
//! back inside a `Delivery`. Fields mirror the AMQP basic properties the
//! client relies on:
//! - `content_type`: MIME type of `body` (`application/json` for JSON publishes)
//! - `delivery_mode`: whether the broker should keep the message across restarts
//! - `timestamp`: send time, set by the publisher
//! - `message_id`: opaque unique id generated by the publisher
//! - `headers`: string-keyed scalar values; carries trace context

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Header table attached to every envelope.
pub type FieldTable = BTreeMap<String, FieldValue>;

/// A scalar header value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => f.write_str(s),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_owned())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Transient,
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    pub content_type: Option<String>,
    pub delivery_mode: DeliveryMode,
    pub timestamp: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub headers: FieldTable,
    pub body: Vec<u8>,
}

impl Envelope {
    /// Build a persistent JSON envelope stamped with the current time.
    pub fn json(body: Vec<u8>, headers: FieldTable) -> Self {
        Self {
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            delivery_mode: DeliveryMode::Persistent,
            timestamp: Some(Utc::now()),
            message_id: Some(uuid::Uuid::new_v4().to_string()),
            headers,
            body,
        }
    }
}

/// An inbound envelope plus what is needed to acknowledge it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub envelope: Envelope,
}
