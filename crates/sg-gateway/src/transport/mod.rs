//! Session transport implementations

mod bridge;

pub use bridge::BridgeTransport;
