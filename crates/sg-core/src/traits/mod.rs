//! Core trait definitions

mod credentials;
mod transport;

pub use credentials::CredentialStore;
pub use transport::{SessionTransport, TransportEventSender};
