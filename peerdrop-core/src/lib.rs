//! Peerdrop session transfer protocol.
//! Host-driven: the host owns the transport and feeds channel events and user commands in;
//! the core answers through the channel and raises events for the user layer.

pub mod channel;
pub mod chunk;
pub mod config;
pub mod driver;
pub mod events;
pub mod heartbeat;
pub mod integrity;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod wire;

pub use channel::{Channel, ChannelError};
pub use config::{Config, ConfigError, LivenessPolicy};
pub use driver::{command_channel, ChannelEvent, Command, SessionHandle};
pub use events::{
    ConnectionStatus, Direction, Observer, ReceivedFile, Role, SessionEvent, Severity,
    TeardownReason,
};
pub use protocol::{FileId, Message};
pub use session::{SessionController, SessionError};
pub use transfer::{Artifact, TooManyChunks, TransferError};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
