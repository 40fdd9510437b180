//! The `utils` module provides the error types and the logging initializer
//! shared across `tethermq`.

pub mod error;
pub mod logging;

pub use error::{BrokerError, HandlerError, MqError, Result, Unavailable};
