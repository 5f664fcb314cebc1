//! Rust IRC Bot Core
//!
//! This crate provides an IRC client that speaks the registration handshake,
//! paces its outbound traffic and routes inbound lines to plugins. Plugins
//! observe every line and may bind trigger commands guarded by hostmask
//! access levels.

pub mod access;
pub mod basic;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod flood;
pub mod handle;
pub mod message;
pub mod plugin;


pub use access::{AccessEntry, AccessList, NO_ACCESS};
pub use basic::BasicProtocol;
pub use client::{Client, ClientBuilder};
pub use config::{ConfigStore, ConnectionSettings, ServerSettings};
pub use connection::{ConnectionState, ConnectionStream};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{Error, Result};
pub use flood::FloodControl;
pub use handle::ClientHandle;
pub use message::{Command, Event};
pub use plugin::{HandlerEntry, HandlerInfo, Plugin, Registrar, Registry};

/// Re-exports for convenience
pub use async_trait::async_trait;
pub use tracing::{debug, error, info, warn};
