//! # TetherMQ
//!
//! `tethermq` is a resilient client for AMQP-style message brokers. It keeps a
//! publishing connection alive across broker restarts, consumes with manual
//! acknowledgement, and carries distributed-trace context inside message
//! headers so a consumer's span joins the producer's trace.
//!
//! ## Core Modules
//!
//! - `broker`: The connection/channel seam and an embedded in-memory broker implementing it.
//! - `client`: The supervised publisher, the consumer and topology declaration.
//! - `config`: Loads settings from `config/default.*` and `TETHERMQ_*` environment variables.
//! - `telemetry`: Header carriers for W3C trace context and tracer provider setup.
//! - `utils`: Error types and logging initialization.

pub mod broker;
pub mod client;
pub mod config;
pub mod telemetry;
pub mod utils;

pub use client::{BackoffPolicy, Consumer, Publisher, Supervisor, Topology};
pub use utils::{HandlerError, MqError, Result};
