//! Session transport trait

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::{Generation, TransportEvent};
use sg_protocol::SessionCredentials;

/// Channel on which a transport reports lifecycle events
pub type TransportEventSender = mpsc::Sender<TransportEvent>;

/// Abstraction over the external messaging-platform client
///
/// Exactly one socket may be live at a time. The supervisor is the only
/// caller of `connect`, `logout` and `close`.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Begin a connection attempt
    ///
    /// Returns once the attempt is underway; its outcome arrives as events
    /// tagged with `generation`. Fails with [`TransportError::AlreadyActive`]
    /// if a socket is already open or connecting.
    async fn connect(
        &self,
        generation: Generation,
        credentials: Option<SessionCredentials>,
        events: TransportEventSender,
    ) -> Result<(), TransportError>;

    /// Send a text message to a fully qualified address
    ///
    /// Only valid while connected. Returns the platform message id if known.
    async fn send(&self, address: &str, body: &str) -> Result<Option<String>, TransportError>;

    /// Ask the platform to invalidate the session
    async fn logout(&self) -> Result<(), TransportError>;

    /// Tear down the live socket, if any, without logging out
    async fn close(&self);
}
