//! Event loop: one task owns the `SessionController` and serializes every input to it.
//!
//! Inputs are channel-adapter events, user commands, the controller's next timer deadline,
//! and the outbound pump. Nothing else touches the controller, so no locks are needed.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::channel::Channel;
use crate::events::{Observer, Role};
use crate::protocol::{FileId, Message};
use crate::session::{SessionController, SessionError};
use crate::transfer::{Artifact, Pump};

/// What the channel adapter reports.
pub enum ChannelEvent {
    Open {
        channel: Arc<dyn Channel>,
        role: Role,
    },
    Message(Message),
    Closed,
    Error(String),
}

/// User-issued commands. Replies travel back over `oneshot`.
pub enum Command {
    SendFile {
        artifact: Artifact,
        reply: oneshot::Sender<Result<FileId, SessionError>>,
    },
    SendText {
        content: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect,
    /// The user layer came back to the foreground.
    Foreground,
}

/// Cloneable front for issuing commands to a running driver.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

/// Create a handle and the command receiver to pass to `run`.
pub fn command_channel() -> (SessionHandle, mpsc::UnboundedReceiver<Command>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SessionHandle { commands: tx }, rx)
}

impl SessionHandle {
    pub async fn send_file(&self, artifact: Artifact) -> Result<FileId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::SendFile { artifact, reply })?;
        rx.await.map_err(|_| SessionError::Stopped)?
    }

    pub async fn send_text(&self, content: impl Into<String>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::SendText {
            content: content.into(),
            reply,
        })?;
        rx.await.map_err(|_| SessionError::Stopped)?
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.submit(Command::Disconnect)
    }

    pub fn foreground(&self) -> Result<(), SessionError> {
        self.submit(Command::Foreground)
    }

    fn submit(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Stopped)
    }
}

/// Drive the controller until every `SessionHandle` is dropped. The session is disconnected on exit.
pub async fn run<O: Observer>(
    mut controller: SessionController<O>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> SessionController<O> {
    loop {
        let deadline = controller.next_deadline();
        let pumping = controller.has_pending_outbound();
        // User commands and timers first: an inbound chunk backlog must not delay a disconnect.
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(command) => dispatch_command(&mut controller, command),
                None => break,
            },
            () = sleep_until(deadline) => controller.on_timer(Instant::now()),
            Some(event) = events.recv() => dispatch_event(&mut controller, event),
            () = std::future::ready(()), if pumping => {
                if controller.pump_outbound() == Pump::Yield {
                    tokio::task::yield_now().await;
                }
            }
        }
    }
    debug!("command senders dropped; stopping driver");
    controller.disconnect();
    controller
}

fn dispatch_event<O: Observer>(controller: &mut SessionController<O>, event: ChannelEvent) {
    let now = Instant::now();
    match event {
        ChannelEvent::Open { channel, role } => controller.on_channel_open(channel, role, now),
        ChannelEvent::Message(msg) => controller.on_message(msg, now),
        ChannelEvent::Closed => controller.on_channel_closed(),
        ChannelEvent::Error(reason) => controller.on_channel_error(reason),
    }
}

fn dispatch_command<O: Observer>(controller: &mut SessionController<O>, command: Command) {
    match command {
        Command::SendFile { artifact, reply } => {
            let _ = reply.send(controller.send_file(artifact));
        }
        Command::SendText { content, reply } => {
            let _ = reply.send(controller.send_text(&content));
        }
        Command::Disconnect => controller.disconnect(),
        Command::Foreground => controller.on_foreground(),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::channel::testing::MemoryChannel;
    use crate::config::Config;
    use crate::events::{ConnectionStatus, SessionEvent, TeardownReason};

    struct Harness {
        handle: SessionHandle,
        events_tx: mpsc::UnboundedSender<ChannelEvent>,
        observed: mpsc::UnboundedReceiver<SessionEvent>,
        channel: Arc<MemoryChannel>,
        task: tokio::task::JoinHandle<SessionController<mpsc::UnboundedSender<SessionEvent>>>,
    }

    async fn start(config: Config) -> Harness {
        let (obs_tx, mut observed) = mpsc::unbounded_channel();
        let controller = SessionController::new(config, obs_tx);
        let (handle, commands) = command_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(controller, events, commands));
        let channel = MemoryChannel::new();
        events_tx
            .send(ChannelEvent::Open {
                channel: channel.clone(),
                role: Role::Responder,
            })
            .unwrap();
        assert!(matches!(
            observed.recv().await,
            Some(SessionEvent::StatusChanged(ConnectionStatus::Connected {
                role: Role::Responder
            }))
        ));
        Harness {
            handle,
            events_tx,
            observed,
            channel,
            task,
        }
    }

    async fn next_matching<F>(rx: &mut mpsc::UnboundedReceiver<SessionEvent>, f: F) -> SessionEvent
    where
        F: Fn(&SessionEvent) -> bool,
    {
        loop {
            let event = rx.recv().await.unwrap();
            if f(&event) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn commands_round_trip_through_driver() {
        let mut h = start(Config::default()).await;
        assert_eq!(h.handle.send_text("   ").await, Err(SessionError::EmptyContent));
        h.handle.send_text("hi").await.unwrap();
        assert!(matches!(h.channel.sent().as_slice(), [Message::Text { .. }]));

        h.events_tx
            .send(ChannelEvent::Message(Message::Text {
                content: "back".into(),
                timestamp: 3,
            }))
            .unwrap();
        let got = next_matching(&mut h.observed, |e| {
            matches!(e, SessionEvent::TextReceived { .. })
        })
        .await;
        assert_eq!(
            got,
            SessionEvent::TextReceived {
                content: "back".into(),
                timestamp: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn file_is_pumped_to_completion() {
        let mut h = start(Config {
            chunk_size: 100,
            ..Config::default()
        })
        .await;
        let id = h
            .handle
            .send_file(Artifact::new("a.bin", "", vec![9u8; 2_550]))
            .await
            .unwrap();
        next_matching(&mut h.observed, |e| {
            matches!(e, SessionEvent::FileSent { file_id, .. } if *file_id == id)
        })
        .await;
        let sent = h.channel.sent();
        // meta + 26 chunks + complete
        assert_eq!(sent.len(), 28);
        let indices: Vec<u32> = sent
            .iter()
            .filter_map(|m| match m {
                Message::FileChunk { chunk_index, .. } => Some(*chunk_index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, (0..26).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_and_detects_dead_peer() {
        let mut h = start(Config::default()).await;
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert!(h
            .channel
            .sent()
            .iter()
            .any(|m| matches!(m, Message::Heartbeat { .. })));

        h.channel.set_open(false);
        let event = next_matching(&mut h.observed, |e| {
            matches!(e, SessionEvent::StatusChanged(_))
        })
        .await;
        assert_eq!(
            event,
            SessionEvent::StatusChanged(ConnectionStatus::Disconnected {
                reason: TeardownReason::PeerUnreachable
            })
        );
        assert_eq!(
            h.handle.send_text("anyone?").await,
            Err(SessionError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_not_queued_behind_inbound_backlog() {
        let mut h = start(Config::default()).await;
        for i in 0..50 {
            h.events_tx
                .send(ChannelEvent::Message(Message::Text {
                    content: format!("msg {i}"),
                    timestamp: i,
                }))
                .unwrap();
        }
        h.handle.disconnect().unwrap();
        let first = next_matching(&mut h.observed, |e| {
            matches!(
                e,
                SessionEvent::StatusChanged(_) | SessionEvent::TextReceived { .. }
            )
        })
        .await;
        assert_eq!(
            first,
            SessionEvent::StatusChanged(ConnectionStatus::Disconnected {
                reason: TeardownReason::Disconnected
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handles_stops_driver() {
        let h = start(Config::default()).await;
        drop(h.handle);
        let controller = h.task.await.unwrap();
        assert!(controller.session().is_none());
        assert!(!h.channel.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn channel_closed_event_tears_down() {
        let mut h = start(Config::default()).await;
        h.events_tx.send(ChannelEvent::Closed).unwrap();
        let event = next_matching(&mut h.observed, |e| {
            matches!(e, SessionEvent::StatusChanged(_))
        })
        .await;
        assert_eq!(
            event,
            SessionEvent::StatusChanged(ConnectionStatus::Disconnected {
                reason: TeardownReason::ChannelClosed
            })
        );
    }
}
