//! Events raised by the core for the user-facing layer, and the observer seam that receives them.

use std::fmt;

use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::FileId;
use crate::transfer::TransferError;

/// Which end of the link created the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReason {
    /// Local `disconnect()`.
    Disconnected,
    /// Channel reported close.
    ChannelClosed,
    /// Channel reported an error.
    ChannelError(String),
    /// Heartbeat silence with a closed channel, or a failed foreground probe.
    PeerUnreachable,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownReason::Disconnected => f.write_str("disconnected"),
            TeardownReason::ChannelClosed => f.write_str("connection closed by peer"),
            TeardownReason::ChannelError(e) => write!(f, "connection error: {e}"),
            TeardownReason::PeerUnreachable => f.write_str("peer unreachable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected { role: Role },
    Disconnected { reason: TeardownReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// A completed inbound artifact with its declared metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_id: FileId,
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Hex SHA-256 of `bytes`.
    pub sha256: String,
}

impl fmt::Debug for ReceivedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedFile")
            .field("file_id", &self.file_id)
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .field("sha256", &self.sha256)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    /// Percent in `0.0..=100.0`, non-decreasing per transfer.
    Progress {
        file_id: FileId,
        direction: Direction,
        percent: f64,
    },
    SendStarted {
        file_id: FileId,
        name: String,
        size: u64,
    },
    FileSent {
        file_id: FileId,
        name: String,
        sha256: String,
    },
    ReceiveStarted {
        file_id: FileId,
        name: String,
        size: u64,
    },
    FileReceived(ReceivedFile),
    TransferTimedOut {
        file_id: FileId,
        name: String,
    },
    TransferFailed {
        file_id: FileId,
        direction: Direction,
        error: TransferError,
    },
    TextReceived {
        content: String,
        timestamp: i64,
    },
    /// Human-readable message for the user.
    Notice {
        severity: Severity,
        message: String,
    },
}

/// Receives core events synchronously, in the order transitions happen.
pub trait Observer {
    fn notify(&mut self, event: SessionEvent);

    fn info(&mut self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.notify(SessionEvent::Notice {
            severity: Severity::Info,
            message: message.into(),
        });
    }

    fn error(&mut self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.notify(SessionEvent::Notice {
            severity: Severity::Error,
            message: message.into(),
        });
    }
}

impl Observer for Vec<SessionEvent> {
    fn notify(&mut self, event: SessionEvent) {
        self.push(event);
    }
}

/// Forward events to another task. A dropped receiver discards events.
impl Observer for UnboundedSender<SessionEvent> {
    fn notify(&mut self, event: SessionEvent) {
        if self.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}
