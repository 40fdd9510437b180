use serde::{Deserialize, Serialize};

use crate::broker::ExchangeKind;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    pub app: AppSettings,
    pub broker: BrokerSettings,
    pub reconnect: ReconnectSettings,
}

/// Process identity and console verbosity.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppSettings {
    /// Reported as the OpenTelemetry service name.
    pub name: String,
    pub log_level: String,
}

/// Exchange, queue and consumer parameters.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    pub queue: String,
    pub routing_key: String,
    /// `0` selects the consumer default.
    pub prefetch: u16,
}

/// Backoff bounds for the publisher's reconnect loop, in milliseconds.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ReconnectSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub app: Option<PartialAppSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub reconnect: Option<PartialReconnectSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialAppSettings {
    pub name: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub exchange: Option<String>,
    pub exchange_kind: Option<ExchangeKind>,
    pub queue: Option<String>,
    pub routing_key: Option<String>,
    pub prefetch: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialReconnectSettings {
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app: AppSettings {
                name: "tethermq".to_string(),
                log_level: "info".to_string(),
            },
            broker: BrokerSettings {
                exchange: "tasks".to_string(),
                exchange_kind: ExchangeKind::Direct,
                queue: "tasks.work".to_string(),
                routing_key: "task".to_string(),
                prefetch: 10,
            },
            reconnect: ReconnectSettings {
                initial_backoff_ms: 1_000,
                max_backoff_ms: 30_000,
            },
        }
    }
}
