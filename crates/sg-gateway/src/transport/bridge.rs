//! Session transport backed by the protocol sidecar
//!
//! The sidecar hosts the messaging-platform client library and speaks the
//! line-delimited JSON protocol from `sg-protocol`. Each `connect` opens a
//! fresh TCP connection; the connection's lifetime is the socket's lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use sg_core::config::BridgeConfig;
use sg_core::traits::{SessionTransport, TransportEventSender};
use sg_core::{
    Generation, SessionCredentials, TransportError, TransportEvent, TransportEventKind,
};
use sg_protocol::{BridgeCommand, BridgeEvent, JsonLineCodec};

/// Commands queued for the socket task before `send` waits
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// How long to spend telling the sidecar we are leaving
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type SendResult = Result<Option<String>, TransportError>;

/// Outstanding `send` requests keyed by request id
type PendingSends = Arc<Mutex<HashMap<u64, oneshot::Sender<SendResult>>>>;

/// Handle to the live socket task
struct ActiveBridge {
    generation: Generation,
    commands: mpsc::Sender<BridgeCommand>,
    pending: PendingSends,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveBridge {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

/// [`SessionTransport`] talking to the sidecar over TCP
pub struct BridgeTransport {
    config: BridgeConfig,
    active: Mutex<Option<ActiveBridge>>,
    next_request_id: AtomicU64,
}

impl BridgeTransport {
    /// Create a transport for the sidecar described by `config`
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    async fn live_commands(&self) -> Result<(mpsc::Sender<BridgeCommand>, PendingSends), TransportError> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(bridge) if bridge.is_live() => {
                Ok((bridge.commands.clone(), Arc::clone(&bridge.pending)))
            }
            _ => Err(TransportError::NotConnected),
        }
    }
}

#[async_trait]
impl SessionTransport for BridgeTransport {
    async fn connect(
        &self,
        generation: Generation,
        credentials: Option<SessionCredentials>,
        events: TransportEventSender,
    ) -> Result<(), TransportError> {
        let mut active = self.active.lock().await;
        if let Some(bridge) = active.as_ref() {
            if bridge.is_live() {
                tracing::warn!(
                    "Refusing to open {} while {} is still active",
                    generation,
                    bridge.generation
                );
                return Err(TransportError::AlreadyActive);
            }
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let pending: PendingSends = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let socket = BridgeSocket {
            address: self.config.address.clone(),
            connect_timeout: self.config.connect_timeout,
            generation,
            credentials,
            events,
            commands: commands_rx,
            pending: Arc::clone(&pending),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(socket.run());

        *active = Some(ActiveBridge {
            generation,
            commands: commands_tx,
            pending,
            cancel,
            task,
        });
        Ok(())
    }

    async fn send(&self, address: &str, body: &str) -> Result<Option<String>, TransportError> {
        let (commands, pending) = self.live_commands().await?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(request_id, tx);

        let command = BridgeCommand::Send {
            request_id,
            to: address.to_string(),
            body: body.to_string(),
        };
        if commands.send(command).await.is_err() {
            pending.lock().await.remove(&request_id);
            return Err(TransportError::Closed("bridge connection ended".to_string()));
        }

        match tokio::time::timeout(self.config.send_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed("bridge connection ended".to_string())),
            Err(_) => {
                pending.lock().await.remove(&request_id);
                Err(TransportError::Timeout(self.config.send_timeout))
            }
        }
    }

    async fn logout(&self) -> Result<(), TransportError> {
        let (commands, _) = self.live_commands().await?;
        commands
            .send(BridgeCommand::Logout)
            .await
            .map_err(|_| TransportError::Closed("bridge connection ended".to_string()))
    }

    async fn close(&self) {
        let bridge = self.active.lock().await.take();
        if let Some(bridge) = bridge {
            tracing::debug!("Closing bridge socket {}", bridge.generation);
            bridge.cancel.cancel();
            if let Err(e) = bridge.task.await {
                tracing::warn!("Bridge socket task failed: {}", e);
            }
        }
    }
}

/// How a socket task ended
enum SocketEnd {
    /// Closed locally; the supervisor already knows
    Cancelled,
    /// The sidecar sent `closed`, which has been forwarded
    Closed,
    /// Connection failed or dropped without a `closed` frame
    Lost(String),
}

/// State owned by one socket task
struct BridgeSocket {
    address: String,
    connect_timeout: Duration,
    generation: Generation,
    credentials: Option<SessionCredentials>,
    events: TransportEventSender,
    commands: mpsc::Receiver<BridgeCommand>,
    pending: PendingSends,
    cancel: CancellationToken,
}

impl BridgeSocket {
    async fn run(mut self) {
        let end = self.session().await;

        // Refuse new sends before failing the outstanding ones
        self.commands.close();
        let reason = match &end {
            SocketEnd::Lost(reason) => reason.clone(),
            _ => "bridge connection ended".to_string(),
        };
        for (_, tx) in self.pending.lock().await.drain() {
            let _ = tx.send(Err(TransportError::Closed(reason.clone())));
        }

        if let SocketEnd::Lost(reason) = end {
            tracing::warn!("Bridge socket {} lost: {}", self.generation, reason);
            self.emit(TransportEventKind::Closed {
                reason,
                logged_out: false,
            })
            .await;
        }
    }

    async fn session(&mut self) -> SocketEnd {
        let dial = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address));
        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return SocketEnd::Cancelled,
            result = dial => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return SocketEnd::Lost(format!(
                        "failed to connect to bridge at {}: {}",
                        self.address, e
                    ))
                }
                Err(_) => {
                    return SocketEnd::Lost(format!(
                        "timed out connecting to bridge at {}",
                        self.address
                    ))
                }
            },
        };
        tracing::debug!("Connected to bridge at {} for {}", self.address, self.generation);

        let mut framed = Framed::new(stream, JsonLineCodec::<BridgeEvent>::new());
        if let Err(e) = framed
            .send(BridgeCommand::connect(self.credentials.take()))
            .await
        {
            return SocketEnd::Lost(format!("failed to send connect: {}", e));
        }

        loop {
            tokio::select! {
                biased;

                Some(command) = self.commands.recv() => {
                    if let Err(e) = framed.send(command).await {
                        return SocketEnd::Lost(format!("failed to write to bridge: {}", e));
                    }
                }

                _ = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_GRACE, framed.send(BridgeCommand::Close)).await;
                    return SocketEnd::Cancelled;
                }

                frame = framed.next() => match frame {
                    Some(Ok(Ok(event))) => {
                        if self.handle_frame(event).await {
                            return SocketEnd::Closed;
                        }
                    }
                    Some(Ok(Err(e))) => {
                        tracing::warn!("Skipping bad frame from bridge: {}", e);
                    }
                    Some(Err(e)) => {
                        return SocketEnd::Lost(format!("bridge read failed: {}", e));
                    }
                    None => return SocketEnd::Lost("bridge closed the connection".to_string()),
                },
            }
        }
    }

    /// Forward one frame; returns true if it ended the session
    async fn handle_frame(&mut self, event: BridgeEvent) -> bool {
        match event {
            BridgeEvent::Challenge { payload } => {
                self.emit(TransportEventKind::Challenge { payload }).await;
            }
            BridgeEvent::Opened => self.emit(TransportEventKind::Opened).await,
            BridgeEvent::Credentials(update) => {
                self.emit(TransportEventKind::CredentialsUpdated(update)).await;
            }
            BridgeEvent::Closed { reason, logged_out } => {
                tracing::info!(
                    "Bridge closed {}: {} (logged out: {})",
                    self.generation,
                    reason,
                    logged_out
                );
                self.emit(TransportEventKind::Closed { reason, logged_out })
                    .await;
                return true;
            }
            BridgeEvent::SendResult {
                request_id,
                ok,
                message_id,
                error,
            } => {
                let waiter = self.pending.lock().await.remove(&request_id);
                let result = if ok {
                    Ok(message_id)
                } else {
                    Err(TransportError::Rejected(
                        error.unwrap_or_else(|| "send failed".to_string()),
                    ))
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => tracing::debug!("Result for unknown send request {}", request_id),
                }
            }
        }
        false
    }

    async fn emit(&self, kind: TransportEventKind) {
        let event = TransportEvent::new(self.generation, kind);
        if self.events.send(event).await.is_err() {
            tracing::debug!("Supervisor gone, dropping event from {}", self.generation);
        }
    }
}
