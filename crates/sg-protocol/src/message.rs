//! Message types for the bridge protocol
//!
//! Every frame is a single JSON object on its own line, tagged by `type`.
//!
//! # Message Flow
//!
//! 1. Gateway opens a TCP connection and sends `connect` with any stored credentials
//! 2. Bridge sends `challenge` frames while the device is unpaired (each one supersedes the last)
//! 3. Bridge sends `credentials` whenever its authentication state changes
//! 4. Bridge sends `opened` once the session is authenticated
//! 5. Gateway sends `send`, bridge answers with `send_result` carrying the same `request_id`
//! 6. Bridge sends `closed` as the last frame before dropping the connection

use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialsUpdate, SessionCredentials};

/// Current protocol version string, sent in `connect`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Frames sent from the gateway to the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Begin a session, resuming from credentials when present
    Connect {
        version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<SessionCredentials>,
    },

    /// Deliver a text message
    Send {
        request_id: u64,
        to: String,
        body: String,
    },

    /// Invalidate the session on the platform side
    Logout,

    /// Drop the socket without logging out
    Close,
}

impl BridgeCommand {
    /// Build a `connect` frame for the current protocol version
    pub fn connect(credentials: Option<SessionCredentials>) -> Self {
        BridgeCommand::Connect {
            version: PROTOCOL_VERSION.to_string(),
            credentials,
        }
    }
}

/// Frames sent from the bridge to the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// New pairing challenge to display
    Challenge { payload: String },

    /// Session authenticated and live
    Opened,

    /// Authentication state changed and should be persisted
    Credentials(CredentialsUpdate),

    /// Socket is closing
    Closed {
        reason: String,
        #[serde(default)]
        logged_out: bool,
    },

    /// Outcome of a `send` command
    SendResult {
        request_id: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}
