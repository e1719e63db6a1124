//! sg-protocol: Bridge wire protocol for the session gateway
//!
//! This crate defines the newline-delimited JSON protocol spoken between
//! the gateway and the sidecar process that hosts the messaging-platform
//! client library. One TCP connection to the sidecar is one session socket.

pub mod codec;
pub mod credentials;
pub mod error;
pub mod message;

pub use codec::{DecodedFrame, JsonLineCodec, MAX_FRAME_LENGTH};
pub use credentials::{CredentialsUpdate, SessionCredentials};
pub use error::ProtocolError;
pub use message::{BridgeCommand, BridgeEvent, PROTOCOL_VERSION};
