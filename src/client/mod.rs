//! The `client` module is the resilient side of `tethermq`: a publisher that
//! survives connection loss and a manual-ack consumer.

pub mod backoff;
pub mod consumer;
pub mod publisher;
pub mod supervisor;
pub mod topology;

pub use backoff::{Backoff, BackoffPolicy};
pub use consumer::{Consumer, DEFAULT_PREFETCH, QueueBinding};
pub use publisher::Publisher;
pub use supervisor::{LinkState, Supervisor};
pub use topology::Topology;
