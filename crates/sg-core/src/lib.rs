//! sg-core: Core abstractions and configuration for the session gateway
//!
//! This crate provides the shared types, error taxonomy, traits and
//! configuration structures used by the gateway daemon, plus the durable
//! credential store.

pub mod config;
pub mod credentials;
pub mod error;
pub mod traits;
pub mod types;

pub use credentials::{FileCredentialStore, MemoryCredentialStore};
pub use error::{ConfigError, DispatchError, PersistenceError, TransportError};
pub use sg_protocol::{CredentialsUpdate, SessionCredentials};
pub use types::{
    ConnectionState, DispatchReceipt, Generation, OutboundMessage, TransportEvent,
    TransportEventKind,
};
