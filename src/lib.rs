//! Multi-tenant marriage lifecycle service
//!
//! This crate governs in-game marriages: proposals, engagements,
//! ceremonies, divorces, and reactive cleanup when characters are
//! deleted. Commands arrive over the bus and a read-only HTTP surface,
//! durable state lives in Postgres, and domain events flow back onto the
//! bus. Each command commits its state changes in one transaction and
//! publishes its events only after the commit.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod api;
pub mod character;
pub mod clock;
pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod kafka;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod tenant;

pub use clock::{Clock, SystemClock};
pub use config::AppConfig;
pub use error::{ErrorCode, ErrorKind, MarriageError, MarriageResult};
pub use events::{Event, EventEnvelope, EventPublisher};
pub use processor::{MarriageService, Processor};
pub use tenant::Tenant;
