mod settings;

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};

use crate::client::BackoffPolicy;
use settings::PartialSettings;

pub use settings::{AppSettings, BrokerSettings, ReconnectSettings, Settings};

/// Prefix for environment overrides, e.g. `TETHERMQ_BROKER__QUEUE`.
pub const ENV_PREFIX: &str = "TETHERMQ";

/// Loads the configuration from `config/default.*` and `TETHERMQ_*`
/// environment variables, then merges it over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    Ok(Settings {
        app: AppSettings {
            name: partial
                .app
                .as_ref()
                .and_then(|a| a.name.clone())
                .unwrap_or(default.app.name),
            log_level: partial
                .app
                .as_ref()
                .and_then(|a| a.log_level.clone())
                .unwrap_or(default.app.log_level),
        },
        broker: BrokerSettings {
            exchange: partial
                .broker
                .as_ref()
                .and_then(|b| b.exchange.clone())
                .unwrap_or(default.broker.exchange),
            exchange_kind: partial
                .broker
                .as_ref()
                .and_then(|b| b.exchange_kind)
                .unwrap_or(default.broker.exchange_kind),
            queue: partial
                .broker
                .as_ref()
                .and_then(|b| b.queue.clone())
                .unwrap_or(default.broker.queue),
            routing_key: partial
                .broker
                .as_ref()
                .and_then(|b| b.routing_key.clone())
                .unwrap_or(default.broker.routing_key),
            prefetch: partial
                .broker
                .as_ref()
                .and_then(|b| b.prefetch)
                .unwrap_or(default.broker.prefetch),
        },
        reconnect: ReconnectSettings {
            initial_backoff_ms: partial
                .reconnect
                .as_ref()
                .and_then(|r| r.initial_backoff_ms)
                .unwrap_or(default.reconnect.initial_backoff_ms),
            max_backoff_ms: partial
                .reconnect
                .as_ref()
                .and_then(|r| r.max_backoff_ms)
                .unwrap_or(default.reconnect.max_backoff_ms),
        },
    })
}

impl From<&ReconnectSettings> for BackoffPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            initial: Duration::from_millis(settings.initial_backoff_ms),
            max: Duration::from_millis(settings.max_backoff_ms),
        }
    }
}
