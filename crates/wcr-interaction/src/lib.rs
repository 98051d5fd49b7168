//! Platform REST adapter: OAuth JWT bearer auth and outbound interaction
//! delivery.
//!
//! Implements the `wcr-core` `AccessTokenProvider` and `InteractionSender`
//! ports.

pub mod auth;
pub mod client;

pub use auth::BearerTokenProvider;
pub use client::InteractionClient;
