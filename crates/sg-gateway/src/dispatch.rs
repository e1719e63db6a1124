//! Outbound message dispatch

use std::sync::Arc;

use sg_core::traits::SessionTransport;
use sg_core::{DispatchError, DispatchReceipt, OutboundMessage};

use crate::status::StatusReporter;

/// Validates send requests and forwards them to the live session
pub struct OutboundDispatcher {
    transport: Arc<dyn SessionTransport>,
    status: StatusReporter,
    user_domain: String,
}

impl OutboundDispatcher {
    /// Create a dispatcher qualifying bare recipients with `user_domain`
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        status: StatusReporter,
        user_domain: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            status,
            user_domain: user_domain.into(),
        }
    }

    /// Validate and send a message
    ///
    /// Transport failures are returned as-is; retrying is up to the caller.
    pub async fn send(&self, message: OutboundMessage) -> Result<DispatchReceipt, DispatchError> {
        let address = self.normalize_recipient(&message.recipient);

        let mut missing = Vec::new();
        if address.is_none() {
            missing.push("to");
        }
        if message.body.trim().is_empty() {
            missing.push("message");
        }
        let address = match address {
            Some(address) if missing.is_empty() => address,
            _ => return Err(DispatchError::Validation { fields: missing }),
        };

        let status = self.status.status();
        if !status.is_connected() {
            tracing::debug!("Rejecting send to {} while {}", address, status);
            return Err(DispatchError::ServiceUnavailable { status });
        }

        let message_id = self
            .transport
            .send(&address, &message.body)
            .await
            .map_err(|e| {
                tracing::warn!("Send to {} failed: {}", address, e);
                DispatchError::Transport(e)
            })?;

        tracing::info!("Message sent to {}", address);

        Ok(DispatchReceipt {
            success: true,
            recipient_address: address,
            message_id,
        })
    }

    /// Map a recipient to the transport's addressing scheme
    ///
    /// Anything containing `@` is treated as already qualified. Bare
    /// identifiers lose formatting characters and gain the user domain.
    /// Returns `None` if nothing addressable is left.
    pub fn normalize_recipient(&self, recipient: &str) -> Option<String> {
        let recipient = recipient.trim();
        if recipient.contains('@') {
            return Some(recipient.to_string());
        }

        let id: String = recipient
            .chars()
            .filter(|c| !c.is_whitespace() && !matches!(c, '+' | '-' | '(' | ')'))
            .collect();
        if id.is_empty() {
            None
        } else {
            Some(format!("{}@{}", id, self.user_domain))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sg_core::traits::TransportEventSender;
    use sg_core::{ConnectionState, Generation, SessionCredentials, TransportError};
    use std::sync::Mutex;

    use crate::status::{self, StatusPublisher};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
        fail_with: Mutex<Option<TransportError>>,
    }

    #[async_trait]
    impl SessionTransport for RecordingTransport {
        async fn connect(
            &self,
            _generation: Generation,
            _credentials: Option<SessionCredentials>,
            _events: TransportEventSender,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&self, address: &str, body: &str) -> Result<Option<String>, TransportError> {
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }
            self.sent
                .lock()
                .unwrap()
                .push((address.to_string(), body.to_string()));
            Ok(Some("MSG1".to_string()))
        }

        async fn logout(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    fn dispatcher() -> (OutboundDispatcher, Arc<RecordingTransport>, StatusPublisher) {
        let transport = Arc::new(RecordingTransport::default());
        let (publisher, reporter) = status::channel();
        let dispatcher = OutboundDispatcher::new(transport.clone(), reporter, "s.whatsapp.net");
        (dispatcher, transport, publisher)
    }

    #[test]
    fn test_normalize_bare_identifier() {
        let (dispatcher, _, _) = dispatcher();
        assert_eq!(
            dispatcher.normalize_recipient(" +1 (555) 010-0000 ").as_deref(),
            Some("15550100000@s.whatsapp.net")
        );
    }

    #[test]
    fn test_normalize_keeps_qualified_address() {
        let (dispatcher, _, _) = dispatcher();
        assert_eq!(
            dispatcher.normalize_recipient("120363@g.us").as_deref(),
            Some("120363@g.us")
        );
    }

    #[test]
    fn test_normalize_rejects_punctuation_only() {
        let (dispatcher, _, _) = dispatcher();
        assert_eq!(dispatcher.normalize_recipient(" + - "), None);
    }

    #[tokio::test]
    async fn test_validation_before_state_check() {
        let (dispatcher, _, _) = dispatcher();
        let err = dispatcher
            .send(OutboundMessage::new("", "  "))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Validation {
                fields: vec!["to", "message"]
            }
        );
    }

    #[tokio::test]
    async fn test_unavailable_unless_connected() {
        let (dispatcher, transport, publisher) = dispatcher();

        for state in [ConnectionState::Disconnected, ConnectionState::Connecting] {
            publisher.publish(state);
            let err = dispatcher
                .send(OutboundMessage::new("123", "hi"))
                .await
                .unwrap_err();
            assert_eq!(err, DispatchError::ServiceUnavailable { status: state });
        }
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sends_when_connected() {
        let (dispatcher, transport, publisher) = dispatcher();
        publisher.publish(ConnectionState::Connected);

        let receipt = dispatcher
            .send(OutboundMessage::new("123", "hi"))
            .await
            .unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.recipient_address, "123@s.whatsapp.net");
        assert_eq!(receipt.message_id.as_deref(), Some("MSG1"));
        assert_eq!(
            transport.sent.lock().unwrap().as_slice(),
            &[("123@s.whatsapp.net".to_string(), "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let (dispatcher, transport, publisher) = dispatcher();
        publisher.publish(ConnectionState::Connected);
        *transport.fail_with.lock().unwrap() = Some(TransportError::Rejected("blocked".into()));

        let err = dispatcher
            .send(OutboundMessage::new("123", "hi"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Transport(TransportError::Rejected("blocked".into()))
        );
    }
}
