//! Shared gateway state

use std::sync::Arc;

use sg_core::config::GatewayConfig;
use sg_core::traits::{CredentialStore, SessionTransport};

use crate::dispatch::OutboundDispatcher;
use crate::pairing::{ChallengeRenderer, PairingBroker};
use crate::status::{self, StatusReporter};
use crate::supervisor::{ConnectionSupervisor, SupervisorHandle};

/// State shared by the HTTP handlers
pub struct GatewayState {
    /// Connection state, read-only
    pub status: StatusReporter,
    /// Current pairing challenge
    pub pairing: Arc<PairingBroker>,
    /// Outbound message path
    pub dispatcher: OutboundDispatcher,
    /// Command channel into the supervisor
    pub supervisor: SupervisorHandle,
    /// Turns pairing payloads into images
    pub renderer: Arc<dyn ChallengeRenderer>,
}

impl GatewayState {
    /// Wire up the gateway components
    ///
    /// Returns the shared state and the supervisor, which the caller must
    /// spawn for anything to happen.
    pub fn build(
        config: GatewayConfig,
        transport: Arc<dyn SessionTransport>,
        store: Arc<dyn CredentialStore>,
        renderer: Arc<dyn ChallengeRenderer>,
    ) -> (Arc<Self>, ConnectionSupervisor) {
        let (publisher, status) = status::channel();
        let pairing = Arc::new(PairingBroker::new(status.clone()));
        let dispatcher =
            OutboundDispatcher::new(Arc::clone(&transport), status.clone(), &config.user_domain);
        let (supervisor, handle) = ConnectionSupervisor::new(
            transport,
            store,
            Arc::clone(&pairing),
            publisher,
            &config.reconnect,
        );

        let state = Arc::new(Self {
            status,
            pairing,
            dispatcher,
            supervisor: handle,
            renderer,
        });
        (state, supervisor)
    }
}
