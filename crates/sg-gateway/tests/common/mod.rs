//! Shared fakes for gateway integration tests

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sg_core::traits::{SessionTransport, TransportEventSender};
use sg_core::{Generation, SessionCredentials, TransportError, TransportEvent, TransportEventKind};

/// Transport that records calls and lets the test drive events
#[derive(Default)]
pub struct ScriptedTransport {
    sockets: Mutex<Vec<(Generation, Option<SessionCredentials>, TransportEventSender)>>,
    sent: Mutex<Vec<(String, String)>>,
    send_error: Mutex<Option<TransportError>>,
}

impl ScriptedTransport {
    pub fn connects(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn credentials_for(&self, index: usize) -> Option<SessionCredentials> {
        self.sockets.lock().unwrap()[index].1.clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends_with(&self, err: TransportError) {
        *self.send_error.lock().unwrap() = Some(err);
    }

    /// Emit an event on the most recent socket
    pub async fn emit(&self, kind: TransportEventKind) {
        let (generation, tx) = {
            let sockets = self.sockets.lock().unwrap();
            let (generation, _, tx) = sockets.last().expect("no socket opened");
            (*generation, tx.clone())
        };
        tx.send(TransportEvent::new(generation, kind)).await.unwrap();
    }

    /// Wait until `connect` has been called `count` times
    pub async fn wait_for_connects(&self, count: usize) {
        eventually(|| self.connects() >= count).await;
    }
}

#[async_trait]
impl SessionTransport for ScriptedTransport {
    async fn connect(
        &self,
        generation: Generation,
        credentials: Option<SessionCredentials>,
        events: TransportEventSender,
    ) -> Result<(), TransportError> {
        self.sockets
            .lock()
            .unwrap()
            .push((generation, credentials, events));
        Ok(())
    }

    async fn send(&self, address: &str, body: &str) -> Result<Option<String>, TransportError> {
        if let Some(err) = self.send_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), body.to_string()));
        Ok(Some("3EB0C767D82B".to_string()))
    }

    async fn logout(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) {}
}

/// Poll `check` until it holds, failing after a few seconds
pub async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
