//! sg-gateway: Persistent messaging-platform session behind an HTTP API
//!
//! The gateway keeps one authenticated session with a messaging platform
//! alive across network drops and restarts. A single supervisor task owns
//! the connection state machine; the HTTP surface only reads published
//! state, polls the pairing challenge and forwards outbound messages.

pub mod dispatch;
pub mod http;
pub mod pairing;
pub mod state;
pub mod status;
pub mod supervisor;
pub mod transport;

pub use dispatch::OutboundDispatcher;
pub use state::GatewayState;
pub use status::StatusReporter;
pub use supervisor::{ConnectionSupervisor, SupervisorError, SupervisorHandle};
