mod transcripts;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::app::{BackendCommand, ConnectionStatus, StateSnapshot};
use crate::config::ClientConfig;
use crate::decoder::{Frame, TransportDecoder};
use crate::sync::ReplicaStateMachine;
use crate::transport::{Connector, FrameSource};

pub use transcripts::TranscriptCache;

/// Why a connection's frame pump stopped.
#[derive(Debug)]
enum SessionEnd {
    Lost(String),
    Quit,
}

// ── Backend actor ──────────────────────────────────────────────────

/// The backend actor runs in `tokio::spawn` and owns the connection, the
/// replica state machine and the transcript cache. Every change is published
/// as a fresh immutable [`StateSnapshot`].
pub struct Backend {
    connector: Box<dyn Connector>,
    decoder: TransportDecoder,
    engine: ReplicaStateMachine,
    transcripts: TranscriptCache,
    connection: ConnectionStatus,
    reconnect_delay: Duration,
    dropped_frames: u64,
    state_tx: watch::Sender<Arc<StateSnapshot>>,
}

impl Backend {
    pub fn new(
        connector: Box<dyn Connector>,
        config: &ClientConfig,
        state_tx: watch::Sender<Arc<StateSnapshot>>,
    ) -> Self {
        let connection = ConnectionStatus {
            endpoint: connector.endpoint(),
            ..ConnectionStatus::default()
        };
        Self {
            connector,
            decoder: TransportDecoder::new(config.decompression),
            engine: ReplicaStateMachine::new(config.sync_timeout),
            transcripts: TranscriptCache::new(),
            connection,
            reconnect_delay: config.reconnect_delay,
            dropped_frames: 0,
            state_tx,
        }
    }

    /// Run the connect / pump / reconnect loop until `Quit` arrives or every
    /// command sender is dropped.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<BackendCommand>) {
        debug!(
            endpoint = %self.connection.endpoint,
            decompression = self.decoder.backend_name().unwrap_or("none"),
            "backend started"
        );
        self.publish();

        loop {
            info!(endpoint = %self.connection.endpoint, "connecting");
            let attempt = tokio::select! {
                result = self.connector.connect() => result,
                cmd = cmd_rx.recv() => match cmd {
                    Some(BackendCommand::Reconnect) => continue,
                    Some(BackendCommand::Quit) | None => break,
                },
            };

            let mut source = match attempt {
                Ok(source) => source,
                Err(err) => {
                    warn!(error = %err, "connect failed");
                    self.connection.last_error = Some(err.to_string());
                    self.publish();
                    if self.wait_reconnect(&mut cmd_rx).await {
                        break;
                    }
                    continue;
                }
            };

            self.on_connected();
            let end = self.pump(source.as_mut(), &mut cmd_rx).await;
            source.close().await;

            match end {
                SessionEnd::Quit => break,
                SessionEnd::Lost(reason) => {
                    self.on_transport_lost(reason);
                    if self.wait_reconnect(&mut cmd_rx).await {
                        break;
                    }
                }
            }
        }
        info!("backend stopped");
    }

    /// Feed frames into the state machine until the connection ends.
    async fn pump(
        &mut self,
        source: &mut dyn FrameSource,
        cmd_rx: &mut mpsc::Receiver<BackendCommand>,
    ) -> SessionEnd {
        loop {
            let deadline = self.engine.deadline();
            tokio::select! {
                frame = source.next_frame() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame),
                    Some(Err(err)) => return SessionEnd::Lost(err.to_string()),
                    None => return SessionEnd::Lost("connection closed by server".to_string()),
                },
                _ = sleep_until_deadline(deadline) => {
                    if self.engine.fire_timeout(Instant::now()) {
                        self.publish();
                    }
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(BackendCommand::Reconnect) => {
                        return SessionEnd::Lost("reconnect requested".to_string())
                    }
                    Some(BackendCommand::Quit) | None => return SessionEnd::Quit,
                },
            }
        }
    }

    /// Sleep out the reconnect delay. Returns true if the backend should stop.
    async fn wait_reconnect(&mut self, cmd_rx: &mut mpsc::Receiver<BackendCommand>) -> bool {
        debug!(delay_ms = self.reconnect_delay.as_millis() as u64, "reconnect scheduled");
        tokio::select! {
            _ = tokio::time::sleep(self.reconnect_delay) => false,
            cmd = cmd_rx.recv() => match cmd {
                Some(BackendCommand::Reconnect) => false,
                Some(BackendCommand::Quit) | None => true,
            },
        }
    }

    fn on_connected(&mut self) {
        self.connection.connected = true;
        self.connection.epoch += 1;
        self.connection.last_error = None;
        self.engine.on_connected();
        info!(epoch = self.connection.epoch, "connected");
        self.publish();
    }

    fn on_transport_lost(&mut self, reason: String) {
        warn!(reason = %reason, "connection lost");
        self.connection.connected = false;
        self.connection.last_error = Some(reason);
        self.engine.on_transport_lost();
        self.publish();
    }

    fn handle_frame(&mut self, frame: Frame) {
        match self.decoder.decode(frame) {
            Ok(envelope) => {
                let kind = envelope.kind().to_string();
                let change = self.engine.apply(envelope, Instant::now());
                if self.transcripts.apply(&change, &self.engine.replica()) {
                    debug!(kind = %kind, "transcripts refreshed");
                }
            }
            Err(err) => {
                self.dropped_frames += 1;
                warn!(
                    error = %err,
                    frame = %err.raw().preview(),
                    dropped = self.dropped_frames,
                    "dropping undecodable frame"
                );
            }
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = StateSnapshot {
            replica: self.engine.replica(),
            transcripts: self.transcripts.snapshot(),
            connection: self.connection.clone(),
            sync: self.engine.status(),
            dropped_frames: self.dropped_frames,
        };
        self.state_tx.send_replace(Arc::new(snapshot));
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
