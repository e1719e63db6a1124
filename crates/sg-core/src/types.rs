//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use sg_protocol::CredentialsUpdate;

/// Connection state of the single platform session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket; initial state, and terminal after logout
    #[default]
    Disconnected,
    /// A socket is being established, or a reconnect is pending
    Connecting,
    /// Session is authenticated and can send
    Connected,
}

impl ConnectionState {
    /// Lowercase name used on the HTTP surface
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }

    /// Check if messages can be sent
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Epoch of a transport socket
///
/// Bumped on every `connect` and on operator logout. Events carry the
/// generation of the socket that produced them so late events from a
/// superseded socket can be told apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation that follows this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// A text message to deliver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Bare identifier or fully qualified address
    pub recipient: String,
    /// Message text
    pub body: String,
}

impl OutboundMessage {
    /// Create a new outbound message
    pub fn new(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            body: body.into(),
        }
    }
}

/// Successful delivery to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    /// Always true; failures are reported as errors
    pub success: bool,
    /// Normalized address the message was sent to
    pub recipient_address: String,
    /// Platform message id, when the transport reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Lifecycle event emitted by a transport socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Socket that produced the event
    pub generation: Generation,
    /// What happened
    pub kind: TransportEventKind,
}

impl TransportEvent {
    /// Create a new event for the given socket generation
    pub fn new(generation: Generation, kind: TransportEventKind) -> Self {
        Self { generation, kind }
    }
}

/// Kinds of transport lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// New pairing challenge payload
    Challenge { payload: String },
    /// Session authenticated
    Opened,
    /// Authentication material changed
    CredentialsUpdated(CredentialsUpdate),
    /// Socket closed
    Closed { reason: String, logged_out: bool },
}

impl TransportEventKind {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TransportEventKind::Challenge { .. } => "challenge",
            TransportEventKind::Opened => "opened",
            TransportEventKind::CredentialsUpdated(_) => "credentials_updated",
            TransportEventKind::Closed { .. } => "closed",
        }
    }
}
