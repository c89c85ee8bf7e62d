//! sphere-core - Core library for the SocialSphere client
//!
//! This crate provides everything the `sphere` CLI needs to talk to the
//! SocialSphere service:
//!
//! - **session**: Credential and identity context with change subscription
//! - **client**: REST client behind a refresh-and-replay gateway
//! - **channel**: Authentication-gated live channel (Socket.IO)
//! - **feed**: Presence, notifications, chat and optimistic post updates
//! - **auth**: Credential helpers
//! - **config**: Service addresses

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use client::ApiClient;
pub use error::{Error, Result};
pub use session::SessionStore;
