//! Core pipeline + domain logic for the webchat relay.
//!
//! This crate is intentionally transport-agnostic. The event bus, the
//! platform interaction API, and the web surface live behind ports (traits)
//! implemented in adapter crates.

pub mod config;
pub mod decode;
pub mod errors;
pub mod extract;
pub mod logging;
pub mod ports;
pub mod queue;
pub mod route;
pub mod schema;
pub mod settings;
pub mod subscription;

pub use errors::{Error, Result};
