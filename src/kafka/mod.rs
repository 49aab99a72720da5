//! Bus integration: command ingress, character-status ingress, and the
//! event producer. Partitioning is by character id on both sides, which
//! gives per-character in-order processing.

pub mod consumer;
pub mod headers;
pub mod producer;

pub use consumer::{CharacterStatusConsumer, CommandConsumer};
pub use headers::{tenant_from_headers, tenant_headers};
pub use producer::KafkaEventPublisher;
