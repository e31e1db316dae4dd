//! Client side of the hub protocol.
//!
//! Keeps one logical connection alive across physical reconnects. All state
//! transitions happen in a single driver task; the only timer alive at any
//! moment is the one that task is waiting on, so a manual reconnect or a
//! teardown never leaves an orphaned retry behind.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::backoff::{CloseKind, ConnectionState, NextStep, ReconnectConfig, ReconnectPolicy};
use crate::error::ClientError;
use crate::protocol::{ClientMessage, InboundMessage, ServerMessage};

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 64;

#[derive(Debug)]
enum Command {
    Reconnect,
    Send(String),
}

/// How a connected session ended
#[derive(Debug)]
enum SessionEnd {
    Closed(CloseKind),
    ManualReconnect,
    Shutdown,
}

/// What woke a disconnected driver
enum Wake {
    Timer,
    Manual,
    Shutdown,
}

pub struct Reconnector {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<InboundMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Reconnector {
    /// Start connecting. The returned receiver sees every inbound message
    /// from the first connection onward.
    pub fn spawn(config: ReconnectConfig) -> (Self, broadcast::Receiver<InboundMessage>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = broadcast::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let driver = Driver {
            policy: ReconnectPolicy::new(&config),
            config,
            commands: commands_rx,
            state: state_tx,
            events: events_tx.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        (
            Self {
                commands: commands_tx,
                state: state_rx,
                events: events_tx,
                cancel,
                task,
            },
            events_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.events.subscribe()
    }

    /// Resolve once the connection reaches `target`
    pub async fn wait_for(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Drop the current connection (if any) and start over with a fresh
    /// attempt budget. Also the way out of [`ConnectionState::Failed`].
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Reconnect)
            .map_err(|_| ClientError::Closed)
    }

    /// Queue a message. Messages sent while disconnected are dropped.
    pub fn send<T: Serialize>(&self, msg: &T) -> Result<(), ClientError> {
        let text = serde_json::to_string(msg)?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ClientError::Closed)
    }

    /// Close the connection for good and wait for the driver to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("Reconnector task failed: {}", e);
        }
    }
}

struct Driver {
    config: ReconnectConfig,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<InboundMessage>,
    cancel: CancellationToken,
}

fn normal_close(reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: reason.to_string().into(),
    }))
}

fn classify_close(frame: Option<&CloseFrame>) -> CloseKind {
    match frame {
        Some(frame) if frame.code == CloseCode::Normal => CloseKind::Intentional,
        _ => CloseKind::Abnormal,
    }
}

impl Driver {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, ?state, "Connection state changed");
        }
    }

    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);

            let end = match self.connect().await {
                Ok(Some(stream)) => {
                    self.policy.on_open();
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(url = %self.config.url, "Connected to hub");
                    self.session(stream).await
                }
                Ok(None) => SessionEnd::Shutdown,
                Err(e) => {
                    tracing::warn!(url = %self.config.url, "Connect failed: {}", e);
                    SessionEnd::Closed(CloseKind::Abnormal)
                }
            };

            let kind = match end {
                SessionEnd::Shutdown => break,
                SessionEnd::ManualReconnect => {
                    self.policy.reset();
                    continue;
                }
                SessionEnd::Closed(kind) => kind,
            };

            self.set_state(ConnectionState::Disconnected);
            let step = self.policy.on_close(kind, &mut rand::rng());
            let wake = match step {
                NextStep::Retry { attempt, delay } => {
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect"
                    );
                    self.wait(Some(delay)).await
                }
                NextStep::Stay => {
                    tracing::info!("Connection closed normally, not reconnecting");
                    self.wait(None).await
                }
                NextStep::GiveUp => {
                    tracing::error!(
                        attempts = self.policy.attempts(),
                        "Giving up on reconnecting, manual reconnect required"
                    );
                    self.set_state(ConnectionState::Failed);
                    self.wait(None).await
                }
            };

            match wake {
                Wake::Timer => {}
                Wake::Manual => self.policy.reset(),
                Wake::Shutdown => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::debug!("Reconnector stopped");
    }

    /// `Ok(None)` means shutdown was requested while connecting
    async fn connect(&self) -> Result<Option<HubStream>, ClientError> {
        let attempt = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        );

        tokio::select! {
            _ = self.cancel.cancelled() => Ok(None),
            result = attempt => match result {
                Ok(Ok((stream, _response))) => Ok(Some(stream)),
                Ok(Err(e)) => Err(ClientError::Connect(e)),
                Err(_) => Err(ClientError::Timeout(self.config.connect_timeout)),
            },
        }
    }

    /// Sleep until the backoff expires (or forever with `None`), a manual
    /// reconnect arrives, or the reconnector is torn down.
    async fn wait(&mut self, delay: Option<Duration>) -> Wake {
        let timer = async {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Wake::Shutdown,
                _ = &mut timer => return Wake::Timer,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Reconnect) => return Wake::Manual,
                    Some(Command::Send(_)) => {
                        tracing::debug!("Dropping outbound message while disconnected");
                    }
                    None => return Wake::Shutdown,
                },
            }
        }
    }

    async fn session(&mut self, stream: HubStream) -> SessionEnd {
        let (mut sink, mut source) = stream.split();
        let ping = match serde_json::to_string(&ClientMessage::Ping) {
            Ok(ping) => ping,
            Err(_) => return SessionEnd::Closed(CloseKind::Abnormal),
        };

        let period = self.config.ping_interval;
        let stale_after = self.config.stale_ack_timeout;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        let mut last_ack = Instant::now();
        // Pushed forward by every pong
        let stale = tokio::time::sleep_until(last_ack + stale_after);
        tokio::pin!(stale);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(normal_close("client shutdown")).await;
                    return SessionEnd::Shutdown;
                }

                _ = &mut stale => {
                    tracing::warn!(
                        silent_ms = last_ack.elapsed().as_millis() as u64,
                        "No keepalive ack from hub, dropping connection"
                    );
                    let _ = sink.close().await;
                    return SessionEnd::Closed(CloseKind::Abnormal);
                }

                _ = keepalive.tick() => {
                    if let Err(e) = sink.send(Message::Text(ping.clone().into())).await {
                        tracing::warn!("Keepalive send failed: {}", e);
                        return SessionEnd::Closed(CloseKind::Abnormal);
                    }
                }

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Reconnect) => {
                        let _ = sink.send(normal_close("manual reconnect")).await;
                        return SessionEnd::ManualReconnect;
                    }
                    Some(Command::Send(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::warn!("Send failed: {}", e);
                            return SessionEnd::Closed(CloseKind::Abnormal);
                        }
                    }
                    None => return SessionEnd::Shutdown,
                },

                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => match InboundMessage::decode(text.as_str()) {
                        Ok(msg) => {
                            if matches!(msg, InboundMessage::Control(ServerMessage::Pong { .. })) {
                                last_ack = Instant::now();
                                stale.as_mut().reset(last_ack + stale_after);
                            }
                            // No subscribers is fine
                            let _ = self.events.send(msg);
                        }
                        Err(e) => tracing::warn!("Unreadable message from hub: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let kind = classify_close(frame.as_ref());
                        tracing::info!(?kind, "Hub closed the connection");
                        return SessionEnd::Closed(kind);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {}", e);
                        return SessionEnd::Closed(CloseKind::Abnormal);
                    }
                    None => return SessionEnd::Closed(CloseKind::Abnormal),
                },
            }
        }
    }
}
