//! Read-only HTTP surface under `/api/mas/`
//!
//! Translates the processor's query methods into JSON resource documents.
//! All writes go through the command topic; HTTP never mutates.

pub mod models;
pub mod rest;

pub use rest::{router, serve};
