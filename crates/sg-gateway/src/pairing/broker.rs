//! Holder of the current pairing challenge

use tokio::sync::RwLock;

use sg_core::ConnectionState;

use crate::status::StatusReporter;

/// A scannable pairing payload and its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingChallenge {
    /// Raw payload from the transport
    pub payload: String,
    /// Strictly increasing across the process lifetime
    pub sequence: u64,
}

/// What a caller polling for the pairing code should see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingView {
    /// Session is live; nothing to scan
    Connected,
    /// No challenge has been issued for the current attempt
    NoChallengeYet { status: ConnectionState },
    /// A challenge is waiting to be scanned
    Pending(PairingChallenge),
}

#[derive(Debug, Default)]
struct Slot {
    challenge: Option<PairingChallenge>,
    last_sequence: u64,
}

/// Current pairing challenge, written only by the supervisor
#[derive(Debug)]
pub struct PairingBroker {
    slot: RwLock<Slot>,
    status: StatusReporter,
}

impl PairingBroker {
    /// Create an empty broker reading connection state from `status`
    pub fn new(status: StatusReporter) -> Self {
        Self {
            slot: RwLock::new(Slot::default()),
            status,
        }
    }

    /// Current pairing view
    ///
    /// Reports `Connected` whenever the session is connected, even if a
    /// stale challenge is somehow still held. A challenge is only shown
    /// while connecting.
    pub async fn current(&self) -> PairingView {
        let status = self.status.status();
        if status == ConnectionState::Connected {
            return PairingView::Connected;
        }

        let slot = self.slot.read().await;
        match (&slot.challenge, status) {
            (Some(challenge), ConnectionState::Connecting) => {
                PairingView::Pending(challenge.clone())
            }
            _ => PairingView::NoChallengeYet { status },
        }
    }

    /// Replace the challenge, returning its new sequence number
    pub(crate) async fn offer(&self, payload: String) -> u64 {
        let mut slot = self.slot.write().await;
        slot.last_sequence += 1;
        let sequence = slot.last_sequence;
        slot.challenge = Some(PairingChallenge { payload, sequence });
        sequence
    }

    /// Drop the challenge, if any; returns true if one was held
    pub(crate) async fn clear(&self) -> bool {
        self.slot.write().await.challenge.take().is_some()
    }
}
