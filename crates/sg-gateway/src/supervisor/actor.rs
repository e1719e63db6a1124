//! The connection supervisor task
//!
//! Owns the connection state and is the only code that drives the
//! transport lifecycle. Commands from the HTTP surface, transport events
//! and the reconnect timer are all handled sequentially on one task, so
//! no two transitions ever interleave.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use sg_core::config::BackoffConfig;
use sg_core::traits::{CredentialStore, SessionTransport};
use sg_core::{
    ConnectionState, Generation, PersistenceError, SessionCredentials, TransportEvent,
    TransportEventKind,
};

use super::backoff::ExponentialBackoff;
use super::machine::{transition, Action, Input};
use crate::pairing::PairingBroker;
use crate::status::StatusPublisher;

/// Capacity of the command and transport event queues
const CHANNEL_CAPACITY: usize = 64;

/// Supervisor failures
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The supervisor task is no longer running
    #[error("Connection supervisor has stopped")]
    Stopped,

    /// Credentials could not be loaded or persisted
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Requests accepted by the supervisor
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Begin connecting if currently disconnected
    Start { ack: oneshot::Sender<ConnectionState> },
    /// Log out and forget credentials
    Logout { ack: oneshot::Sender<ConnectionState> },
    /// Close the socket and stop the supervisor
    Shutdown { ack: oneshot::Sender<ConnectionState> },
}

/// Cloneable handle for sending commands to the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Ask the supervisor to connect; returns the resulting state
    pub async fn start(&self) -> Result<ConnectionState, SupervisorError> {
        self.request(|ack| SupervisorCommand::Start { ack }).await
    }

    /// Log out and erase credentials; returns the resulting state
    pub async fn logout(&self) -> Result<ConnectionState, SupervisorError> {
        self.request(|ack| SupervisorCommand::Logout { ack }).await
    }

    /// Stop the supervisor, keeping credentials for the next run
    pub async fn shutdown(&self) -> Result<ConnectionState, SupervisorError> {
        self.request(|ack| SupervisorCommand::Shutdown { ack }).await
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<ConnectionState>) -> SupervisorCommand,
    ) -> Result<ConnectionState, SupervisorError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(make(ack))
            .await
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }
}

/// Drives the single platform session through its lifecycle
pub struct ConnectionSupervisor {
    transport: Arc<dyn SessionTransport>,
    store: Arc<dyn CredentialStore>,
    pairing: Arc<PairingBroker>,
    publisher: StatusPublisher,
    commands: mpsc::Receiver<SupervisorCommand>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: mpsc::Receiver<TransportEvent>,
    state: ConnectionState,
    generation: Generation,
    credentials: Option<SessionCredentials>,
    backoff: ExponentialBackoff,
    reconnect_at: Option<Instant>,
}

impl ConnectionSupervisor {
    /// Create a supervisor and the handle used to command it
    ///
    /// Nothing happens until [`run`](Self::run) is awaited.
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        store: Arc<dyn CredentialStore>,
        pairing: Arc<PairingBroker>,
        publisher: StatusPublisher,
        reconnect: &BackoffConfig,
    ) -> (Self, SupervisorHandle) {
        let (tx, commands) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let supervisor = Self {
            transport,
            store,
            pairing,
            publisher,
            commands,
            events_tx,
            events_rx,
            state: ConnectionState::Disconnected,
            generation: Generation::default(),
            credentials: None,
            backoff: ExponentialBackoff::from_config(reconnect),
            reconnect_at: None,
        };
        (supervisor, SupervisorHandle { tx })
    }

    /// Load stored credentials, connect, and supervise until shut down
    ///
    /// Returns an error only when credentials cannot be loaded or
    /// persisted. The transport is closed before returning either way.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        let result = self.supervise().await;
        if result.is_err() {
            self.transport.close().await;
            self.publisher.publish(ConnectionState::Disconnected);
        }
        result
    }

    async fn supervise(&mut self) -> Result<(), SupervisorError> {
        self.credentials = self.store.load().await?;
        match &self.credentials {
            Some(creds) => tracing::info!("Loaded {} stored credential entries", creds.len()),
            None => tracing::info!("No stored credentials, pairing will be required"),
        }

        if self.apply(Input::Start).await? {
            return Ok(());
        }

        loop {
            let stop = tokio::select! {
                biased;

                // Drain queued transport events before commands
                Some(event) = self.events_rx.recv() => self.handle_event(event).await?,

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await?,
                    None => {
                        tracing::debug!("All supervisor handles dropped");
                        self.apply(Input::Shutdown).await?
                    }
                },

                _ = reconnect_timer(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.apply(Input::ReconnectDue).await?
                }
            };

            if stop {
                tracing::info!("Connection supervisor stopped");
                return Ok(());
            }
        }
    }

    async fn handle_command(&mut self, command: SupervisorCommand) -> Result<bool, SupervisorError> {
        let (input, ack) = match command {
            SupervisorCommand::Start { ack } => (Input::Start, ack),
            SupervisorCommand::Logout { ack } => (Input::Logout, ack),
            SupervisorCommand::Shutdown { ack } => (Input::Shutdown, ack),
        };
        let stop = self.apply(input).await?;
        // Caller may have given up waiting
        let _ = ack.send(self.state);
        Ok(stop)
    }

    async fn handle_event(&mut self, event: TransportEvent) -> Result<bool, SupervisorError> {
        if event.generation != self.generation {
            tracing::debug!(
                "Ignoring {} event from {} (current {})",
                event.kind.name(),
                event.generation,
                self.generation
            );
            return Ok(false);
        }

        let input = match event.kind {
            TransportEventKind::Challenge { payload } => Input::Challenge { payload },
            TransportEventKind::Opened => Input::Opened,
            TransportEventKind::CredentialsUpdated(update) => Input::CredentialsUpdated(update),
            TransportEventKind::Closed { reason, logged_out } => Input::Closed {
                reason,
                logged_out,
                retry_allowed: !self.backoff.exhausted(),
            },
        };
        self.apply(input).await
    }

    /// Run one transition; returns true if the supervisor should stop
    async fn apply(&mut self, input: Input) -> Result<bool, SupervisorError> {
        let from = self.state;
        let t = transition(from, &input);
        if t.is_noop(from) {
            tracing::debug!("Ignoring {} while {}", input.name(), from);
            return Ok(false);
        }

        tracing::debug!("{} while {} -> {}", input.name(), from, t.next);
        self.state = t.next;
        if self.publisher.publish(t.next) {
            tracing::info!("Connection state: {}", t.next);
        }

        let mut stop = false;
        for action in t.actions {
            match action {
                Action::Connect => self.connect().await,
                Action::StoreChallenge => {
                    if let Input::Challenge { payload } = &input {
                        let sequence = self.pairing.offer(payload.clone()).await;
                        tracing::info!("Pairing challenge #{} ready to scan", sequence);
                    }
                }
                Action::ClearChallenge => {
                    self.pairing.clear().await;
                }
                Action::ScheduleReconnect => self.schedule_reconnect(&input),
                Action::CancelReconnect => self.reconnect_at = None,
                Action::ResetBackoff => self.backoff.reset(),
                Action::PersistCredentials => {
                    if let Input::CredentialsUpdated(update) = &input {
                        self.persist(update.clone()).await?;
                    }
                }
                Action::EraseCredentials => {
                    self.credentials = None;
                    self.store.clear().await?;
                    tracing::info!("Stored credentials erased");
                }
                Action::LogoutTransport => {
                    if let Err(e) = self.transport.logout().await {
                        tracing::warn!("Platform logout failed: {}", e);
                    }
                }
                Action::CloseTransport => self.transport.close().await,
                Action::InvalidateGeneration => self.generation = self.generation.next(),
                Action::Stop => stop = true,
            }
        }

        if let Input::Closed {
            reason,
            logged_out,
            retry_allowed,
        } = &input
        {
            if *logged_out {
                tracing::warn!("Session logged out by platform: {}", reason);
            } else if !retry_allowed {
                tracing::error!(
                    "Giving up after {} reconnect attempts ({}); POST /connect to retry",
                    self.backoff.attempts(),
                    reason
                );
            }
        }

        Ok(stop)
    }

    async fn connect(&mut self) {
        self.generation = self.generation.next();
        self.reconnect_at = None;

        tracing::info!(
            "Opening session socket {} ({})",
            self.generation,
            if self.credentials.is_some() {
                "resuming"
            } else {
                "pairing"
            }
        );

        let result = self
            .transport
            .connect(
                self.generation,
                self.credentials.clone(),
                self.events_tx.clone(),
            )
            .await;

        if let Err(e) = result {
            tracing::warn!("Failed to open session socket {}: {}", self.generation, e);
            let closed = TransportEvent::new(
                self.generation,
                TransportEventKind::Closed {
                    reason: e.to_string(),
                    logged_out: false,
                },
            );
            if self.events_tx.try_send(closed).is_err() {
                tracing::error!("Transport event queue full, dropping connect failure");
            }
        }
    }

    fn schedule_reconnect(&mut self, input: &Input) {
        if self.reconnect_at.is_some() {
            tracing::debug!("Reconnect already scheduled");
            return;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                let reason = match input {
                    Input::Closed { reason, .. } => reason.as_str(),
                    _ => "unknown",
                };
                tracing::warn!(
                    "Session closed ({}), reconnecting in {:?} (attempt {})",
                    reason,
                    delay,
                    self.backoff.attempts()
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                // Budget ran out between the close and scheduling
                self.state = ConnectionState::Disconnected;
                self.publisher.publish(ConnectionState::Disconnected);
            }
        }
    }

    async fn persist(
        &mut self,
        update: sg_core::CredentialsUpdate,
    ) -> Result<(), PersistenceError> {
        let credentials = self.credentials.get_or_insert_with(SessionCredentials::new);
        credentials.apply(update);
        self.store.save(credentials).await?;
        tracing::debug!("Persisted {} credential entries", credentials.len());
        Ok(())
    }
}

async fn reconnect_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sg_core::traits::TransportEventSender;
    use sg_core::{CredentialsUpdate, MemoryCredentialStore, TransportError};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::pairing::PairingView;
    use crate::status::{self, StatusReporter};

    #[derive(Default)]
    struct FakeTransport {
        sockets: Mutex<Vec<(Generation, Option<SessionCredentials>, TransportEventSender)>>,
        logouts: Mutex<usize>,
        closes: Mutex<usize>,
    }

    impl FakeTransport {
        fn connects(&self) -> usize {
            self.sockets.lock().unwrap().len()
        }

        fn socket(&self, index: usize) -> (Generation, TransportEventSender) {
            let sockets = self.sockets.lock().unwrap();
            let (generation, _, tx) = &sockets[index];
            (*generation, tx.clone())
        }

        async fn emit(&self, index: usize, kind: TransportEventKind) {
            let (generation, tx) = self.socket(index);
            tx.send(TransportEvent::new(generation, kind)).await.unwrap();
        }
    }

    #[async_trait]
    impl SessionTransport for FakeTransport {
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

        async fn send(&self, _address: &str, _body: &str) -> Result<Option<String>, TransportError> {
            Err(TransportError::NotConnected)
        }

        async fn logout(&self) -> Result<(), TransportError> {
            *self.logouts.lock().unwrap() += 1;
            Ok(())
        }

        async fn close(&self) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    struct Harness {
        transport: Arc<FakeTransport>,
        store: Arc<MemoryCredentialStore>,
        pairing: Arc<PairingBroker>,
        status: StatusReporter,
        handle: SupervisorHandle,
        task: tokio::task::JoinHandle<Result<(), SupervisorError>>,
    }

    fn spawn(store: MemoryCredentialStore, reconnect: BackoffConfig) -> Harness {
        let transport = Arc::new(FakeTransport::default());
        let store = Arc::new(store);
        let (publisher, status) = status::channel();
        let pairing = Arc::new(PairingBroker::new(status.clone()));
        let (supervisor, handle) = ConnectionSupervisor::new(
            transport.clone(),
            store.clone(),
            pairing.clone(),
            publisher,
            &reconnect,
        );
        let task = tokio::spawn(supervisor.run());
        Harness {
            transport,
            store,
            pairing,
            status,
            handle,
            task,
        }
    }

    /// Let the supervisor drain its queues
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn closed(reason: &str) -> TransportEventKind {
        TransportEventKind::Closed {
            reason: reason.to_string(),
            logged_out: false,
        }
    }

    fn stored_creds() -> SessionCredentials {
        let mut creds = SessionCredentials::new();
        creds.insert("creds.json", "{}");
        creds
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_pairing_flow() {
        let h = spawn(MemoryCredentialStore::new(), BackoffConfig::default());
        settle().await;

        assert_eq!(h.status.status(), ConnectionState::Connecting);
        assert_eq!(h.transport.connects(), 1);
        assert!(h.transport.sockets.lock().unwrap()[0].1.is_none());

        h.transport
            .emit(0, TransportEventKind::Challenge { payload: "P1".into() })
            .await;
        settle().await;
        assert!(matches!(h.pairing.current().await, PairingView::Pending(c) if c.payload == "P1"));

        let mut update = CredentialsUpdate::default();
        update.entries.insert("creds.json".into(), "{\"me\":1}".into());
        h.transport
            .emit(0, TransportEventKind::CredentialsUpdated(update))
            .await;
        h.transport.emit(0, TransportEventKind::Opened).await;
        settle().await;

        assert_eq!(h.status.status(), ConnectionState::Connected);
        assert_eq!(h.pairing.current().await, PairingView::Connected);
        assert_eq!(h.store.save_count(), 1);
        assert_eq!(
            h.store.stored().unwrap().get("creds.json"),
            Some("{\"me\":1}")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_uses_stored_credentials() {
        let h = spawn(
            MemoryCredentialStore::with_credentials(stored_creds()),
            BackoffConfig::default(),
        );
        settle().await;

        let sockets = h.transport.sockets.lock().unwrap();
        assert_eq!(sockets[0].1.as_ref(), Some(&stored_creds()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_close_reconnects_once() {
        let h = spawn(MemoryCredentialStore::new(), BackoffConfig::default());
        settle().await;
        h.transport.emit(0, TransportEventKind::Opened).await;
        settle().await;

        h.transport.emit(0, closed("connection lost")).await;
        h.transport.emit(0, closed("connection lost")).await;
        settle().await;
        assert_eq!(h.status.status(), ConnectionState::Connecting);
        assert_eq!(h.transport.connects(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(h.transport.connects(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.connects(), 2);
        assert_eq!(h.store.clear_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_ignored() {
        let h = spawn(MemoryCredentialStore::new(), BackoffConfig::default());
        settle().await;
        h.transport.emit(0, closed("lost")).await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(h.transport.connects(), 2);

        h.transport.emit(0, TransportEventKind::Opened).await;
        settle().await;
        assert_eq!(h.status.status(), ConnectionState::Connecting);

        h.transport.emit(1, TransportEventKind::Opened).await;
        settle().await;
        assert_eq!(h.status.status(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logged_out_close_erases_without_reconnect() {
        let h = spawn(
            MemoryCredentialStore::with_credentials(stored_creds()),
            BackoffConfig::default(),
        );
        settle().await;
        h.transport.emit(0, TransportEventKind::Opened).await;
        h.transport
            .emit(
                0,
                TransportEventKind::Closed {
                    reason: "logged out".into(),
                    logged_out: true,
                },
            )
            .await;
        settle().await;

        assert_eq!(h.status.status(), ConnectionState::Disconnected);
        assert!(h.store.stored().is_none());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_logout_cancels_pending_reconnect() {
        let h = spawn(
            MemoryCredentialStore::with_credentials(stored_creds()),
            BackoffConfig::default(),
        );
        settle().await;
        h.transport.emit(0, closed("lost")).await;
        settle().await;

        let state = h.handle.logout().await.unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
        assert_eq!(*h.transport.logouts.lock().unwrap(), 1);
        assert!(h.store.stored().is_none());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.transport.connects(), 1);

        // Late event from the logged-out socket changes nothing
        h.transport.emit(0, TransportEventKind::Opened).await;
        settle().await;
        assert_eq!(h.status.status(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_logout_pairs_fresh() {
        let h = spawn(
            MemoryCredentialStore::with_credentials(stored_creds()),
            BackoffConfig::default(),
        );
        settle().await;
        h.handle.logout().await.unwrap();

        assert_eq!(h.handle.start().await.unwrap(), ConnectionState::Connecting);
        let sockets = h.transport.sockets.lock().unwrap();
        assert_eq!(sockets.len(), 2);
        assert!(sockets[1].1.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_keeps_credentials() {
        let reconnect = BackoffConfig {
            max_attempts: 2,
            ..BackoffConfig::default()
        };
        let h = spawn(
            MemoryCredentialStore::with_credentials(stored_creds()),
            reconnect,
        );
        settle().await;

        for socket in 0..3 {
            h.transport.emit(socket, closed("refused")).await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        assert_eq!(h.status.status(), ConnectionState::Disconnected);
        assert_eq!(h.transport.connects(), 3);
        assert!(h.store.stored().is_some());

        assert_eq!(h.handle.start().await.unwrap(), ConnectionState::Connecting);
        assert_eq!(h.transport.connects(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_is_fatal() {
        let h = spawn(MemoryCredentialStore::new(), BackoffConfig::default());
        settle().await;
        h.store.fail_saves(true);

        let mut update = CredentialsUpdate::default();
        update.entries.insert("creds.json".into(), "{}".into());
        h.transport
            .emit(0, TransportEventKind::CredentialsUpdated(update))
            .await;

        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(SupervisorError::Persistence(_))));
        assert_eq!(h.status.status(), ConnectionState::Disconnected);
        assert!(matches!(
            h.handle.start().await,
            Err(SupervisorError::Stopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_keeps_credentials() {
        let h = spawn(
            MemoryCredentialStore::with_credentials(stored_creds()),
            BackoffConfig::default(),
        );
        settle().await;

        assert_eq!(
            h.handle.shutdown().await.unwrap(),
            ConnectionState::Disconnected
        );
        assert!(h.task.await.unwrap().is_ok());
        assert_eq!(*h.transport.closes.lock().unwrap(), 1);
        assert!(h.store.stored().is_some());
    }
}
