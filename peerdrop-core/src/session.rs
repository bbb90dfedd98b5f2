//! Session controller: owns the live session, dispatches inbound messages, exposes the commands.
//!
//! Every method runs on the caller's thread and emits events synchronously through the observer.
//! Timers are not spawned here; the owner sleeps until `next_deadline()` and calls `on_timer`.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError};
use crate::config::Config;
use crate::events::{ConnectionStatus, Observer, Role, SessionEvent, TeardownReason};
use crate::heartbeat::{HeartbeatMonitor, Liveness};
use crate::protocol::{self, FileId, Message};
use crate::transfer::{Artifact, Pump, TooManyChunks, TransferTracker};

/// One active peer relationship.
pub struct Session {
    pub role: Role,
    pub created_at: Instant,
    channel: Arc<dyn Channel>,
}

/// Errors surfaced to the caller of a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("not connected to a peer")]
    NotConnected,
    #[error("message is empty")]
    EmptyContent,
    #[error(transparent)]
    TooLarge(#[from] TooManyChunks),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("session driver stopped")]
    Stopped,
}

/// Main coordinator. Channel adapter and user layer pass events in; the observer gets events out.
pub struct SessionController<O: Observer> {
    config: Config,
    observer: O,
    session: Option<Session>,
    heartbeat: HeartbeatMonitor,
    transfers: TransferTracker,
}

impl<O: Observer> SessionController<O> {
    pub fn new(config: Config, observer: O) -> Self {
        Self {
            heartbeat: HeartbeatMonitor::new(&config),
            transfers: TransferTracker::new(&config),
            config,
            observer,
            session: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn transfers(&self) -> &TransferTracker {
        &self.transfers
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// A session exists and its channel reports open.
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.channel.is_open())
    }

    fn open_channel(&self) -> Result<Arc<dyn Channel>, SessionError> {
        match &self.session {
            Some(s) if s.channel.is_open() => Ok(s.channel.clone()),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// The channel is up: create the session and start heartbeats and the timeout sweep.
    /// An existing session is torn down first.
    pub fn on_channel_open(&mut self, channel: Arc<dyn Channel>, role: Role, now: Instant) {
        if self.session.is_some() {
            warn!("new channel opened while a session is live; replacing it");
            self.teardown(TeardownReason::Disconnected);
        }
        self.heartbeat.start(now);
        self.transfers.start(now);
        self.session = Some(Session {
            role,
            created_at: now,
            channel,
        });
        info!(?role, "session established");
        self.observer
            .notify(SessionEvent::StatusChanged(ConnectionStatus::Connected { role }));
        self.observer.info("Connected to peer");
    }

    pub fn on_channel_closed(&mut self) {
        self.teardown(TeardownReason::ChannelClosed);
    }

    pub fn on_channel_error(&mut self, reason: impl Into<String>) {
        self.teardown(TeardownReason::ChannelError(reason.into()));
    }

    /// Dispatch one inbound message. Liveness is refreshed before the kind is looked at.
    pub fn on_message(&mut self, msg: Message, now: Instant) {
        if self.session.is_none() {
            debug!(kind = msg.kind(), "message without a session ignored");
            return;
        }
        self.heartbeat.observe(&msg, now);
        match msg {
            Message::Heartbeat { .. } => {}
            Message::Text { content, timestamp } => {
                debug!(len = content.len(), "text received");
                self.observer
                    .notify(SessionEvent::TextReceived { content, timestamp });
            }
            Message::FileMeta {
                file_id,
                name,
                size,
                file_type,
                total_chunks,
            } => self.transfers.on_meta(
                file_id,
                name,
                size,
                file_type,
                total_chunks,
                now,
                &mut self.observer,
            ),
            Message::FileChunk {
                file_id,
                chunk_index,
                data,
            } => self
                .transfers
                .on_chunk(&file_id, chunk_index, data, now, &mut self.observer),
            Message::FileComplete { file_id } => {
                self.transfers.on_complete(&file_id, &mut self.observer)
            }
            Message::Unknown => debug!("unknown message kind ignored"),
        }
    }

    /// Queue a file. Metadata, chunks and completion go out as the driver pumps.
    pub fn send_file(&mut self, artifact: Artifact) -> Result<FileId, SessionError> {
        self.open_channel()?;
        self.transfers.enqueue(artifact).map_err(|err| {
            warn!(error = %err, "file refused");
            SessionError::from(err)
        })
    }

    pub fn send_text(&mut self, content: &str) -> Result<(), SessionError> {
        let channel = self.open_channel()?;
        if content.trim().is_empty() {
            return Err(SessionError::EmptyContent);
        }
        let msg = Message::Text {
            content: content.to_owned(),
            timestamp: protocol::now_millis(),
        };
        channel.send(&msg).map_err(|err| {
            warn!(error = %err, "text send failed");
            SessionError::from(err)
        })
    }

    /// Close the channel and drop the session. In-flight transfers vanish without notices.
    pub fn disconnect(&mut self) {
        self.teardown(TeardownReason::Disconnected);
    }

    /// Backgrounded to foregrounded: probe the peer now instead of waiting for the next check.
    pub fn on_foreground(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        match session.channel.send(&self.heartbeat.ping_message()) {
            Ok(()) => debug!("foreground probe sent"),
            Err(err) => {
                warn!(error = %err, "foreground probe failed");
                self.teardown(TeardownReason::PeerUnreachable);
            }
        }
    }

    /// Earliest timer the owner must wake up for. `None` when no session is live.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.heartbeat.next_deadline(), self.transfers.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire whichever periodic actions are due: ping, timeout sweep, liveness check.
    pub fn on_timer(&mut self, now: Instant) {
        let Some(channel) = self.session.as_ref().map(|s| s.channel.clone()) else {
            return;
        };
        if self.heartbeat.take_ping_due(now) && channel.is_open() {
            if let Err(err) = channel.send(&self.heartbeat.ping_message()) {
                warn!(error = %err, "heartbeat send failed");
            }
        }
        self.transfers.take_sweep_due(now, &mut self.observer);
        match self.heartbeat.take_check_due(now, channel.is_open()) {
            Some(Liveness::Dead { elapsed }) => {
                warn!(elapsed_ms = elapsed.as_millis() as u64, "peer silent and channel closed");
                self.teardown(TeardownReason::PeerUnreachable);
            }
            Some(Liveness::Silent { elapsed }) => {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "peer silent; channel still open");
            }
            Some(Liveness::Alive) | None => {}
        }
    }

    pub fn has_pending_outbound(&self) -> bool {
        self.session.is_some() && self.transfers.has_pending_outbound()
    }

    /// Send one batch of the active outbound transfer.
    pub fn pump_outbound(&mut self) -> Pump {
        let Some(channel) = self.session.as_ref().map(|s| s.channel.clone()) else {
            return Pump::Idle;
        };
        self.transfers
            .pump(channel.as_ref(), &mut self.observer, self.config.yield_every)
    }

    /// Release everything tied to the session. Runs at most once per session.
    fn teardown(&mut self, reason: TeardownReason) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.heartbeat.stop();
        self.transfers.stop();
        session.channel.close();
        info!(%reason, role = ?session.role, "session ended");
        let message = match &reason {
            TeardownReason::Disconnected => None,
            other => Some(format!("Connection lost: {other}")),
        };
        self.observer
            .notify(SessionEvent::StatusChanged(ConnectionStatus::Disconnected {
                reason,
            }));
        match message {
            Some(message) => self.observer.error(message),
            None => self.observer.info("Disconnected"),
        }
    }
}
