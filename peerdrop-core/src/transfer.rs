//! Transfer tracker: outbound send queue and inbound reassembly state, with progress and timeouts.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError};
use crate::chunk::{self, ChunkSlots, Chunks, IncompleteAssembly, SlotInsert};
use crate::config::Config;
use crate::events::{Direction, Observer, ReceivedFile, SessionEvent};
use crate::integrity;
use crate::protocol::{FileId, Message};

/// Upper bound on `totalChunks` accepted from a peer (64 GiB at the default chunk size).
pub const MAX_TOTAL_CHUNKS: u32 = 1 << 20;

/// A file handed to the core for sending.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// An artifact needs more chunks than a receiver accepts at the configured chunk size.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name} needs {chunks} chunks, limit is {MAX_TOTAL_CHUNKS}")]
pub struct TooManyChunks {
    pub name: String,
    pub chunks: u64,
}

/// Which message of an outbound transfer could not be handed to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    Meta,
    Chunk(u32),
    Complete,
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendStage::Meta => f.write_str("metadata"),
            SendStage::Chunk(i) => write!(f, "chunk {i}"),
            SendStage::Complete => f.write_str("completion"),
        }
    }
}

/// Per-transfer failure. Never escalates to the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("sending {stage} failed: {source}")]
    ChunkSend {
        stage: SendStage,
        source: ChannelError,
    },
    #[error("reassembly failed: {0}")]
    Incomplete(#[from] IncompleteAssembly),
    #[error("no activity for {}s", .idle.as_secs())]
    TimedOut { idle: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    Sending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundState {
    Receiving,
    Completed,
    TimedOut,
}

/// Result of one pump batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// Nothing left to send.
    Idle,
    /// Batch budget spent; more chunks queued.
    Yield,
}

enum Step {
    Meta,
    Chunk,
    Completed,
}

/// A file being sent. Chunks are produced lazily from the shared artifact buffer.
#[derive(Debug)]
pub struct OutboundTransfer {
    pub file_id: FileId,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub total_chunks: u32,
    pub chunks_sent: u32,
    pub state: OutboundState,
    meta_sent: bool,
    bytes: Bytes,
    chunks: Chunks,
}

impl OutboundTransfer {
    fn new(
        file_id: FileId,
        artifact: Artifact,
        chunk_size: usize,
        total_chunks: u32,
    ) -> Self {
        let chunks = chunk::split(artifact.bytes.clone(), chunk_size);
        Self {
            file_id,
            name: artifact.name,
            size: artifact.bytes.len() as u64,
            content_type: artifact.content_type,
            total_chunks,
            chunks_sent: 0,
            state: OutboundState::Sending,
            meta_sent: false,
            bytes: artifact.bytes,
            chunks,
        }
    }

    /// `chunksSent / totalChunks` as a percentage. An empty file is at 100 once completed.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return if self.state == OutboundState::Completed {
                100.0
            } else {
                0.0
            };
        }
        f64::from(self.chunks_sent) / f64::from(self.total_chunks) * 100.0
    }

    fn send(&self, channel: &dyn Channel, msg: &Message, stage: SendStage) -> Result<(), TransferError> {
        channel
            .send(msg)
            .map_err(|source| TransferError::ChunkSend { stage, source })
    }

    /// Hand the next message (metadata, one chunk, or completion) to the channel.
    fn step<O: Observer>(
        &mut self,
        channel: &dyn Channel,
        observer: &mut O,
    ) -> Result<Step, TransferError> {
        if !self.meta_sent {
            let meta = Message::FileMeta {
                file_id: self.file_id.clone(),
                name: self.name.clone(),
                size: self.size,
                file_type: self.content_type.clone(),
                total_chunks: self.total_chunks,
            };
            self.send(channel, &meta, SendStage::Meta)?;
            self.meta_sent = true;
            info!(file_id = %self.file_id, name = %self.name, size = self.size, chunks = self.total_chunks, "sending file");
            observer.notify(SessionEvent::SendStarted {
                file_id: self.file_id.clone(),
                name: self.name.clone(),
                size: self.size,
            });
            return Ok(Step::Meta);
        }
        if let Some((index, data)) = self.chunks.next() {
            let msg = Message::FileChunk {
                file_id: self.file_id.clone(),
                chunk_index: index,
                data: data.to_vec(),
            };
            self.send(channel, &msg, SendStage::Chunk(index))?;
            self.chunks_sent += 1;
            debug!(file_id = %self.file_id, index, len = data.len(), "chunk sent");
            observer.notify(SessionEvent::Progress {
                file_id: self.file_id.clone(),
                direction: Direction::Outbound,
                percent: self.progress(),
            });
            return Ok(Step::Chunk);
        }
        let complete = Message::FileComplete {
            file_id: self.file_id.clone(),
        };
        self.send(channel, &complete, SendStage::Complete)?;
        self.state = OutboundState::Completed;
        if self.total_chunks == 0 {
            observer.notify(SessionEvent::Progress {
                file_id: self.file_id.clone(),
                direction: Direction::Outbound,
                percent: self.progress(),
            });
        }
        let sha256 = integrity::digest_hex(&self.bytes);
        info!(file_id = %self.file_id, name = %self.name, %sha256, "file sent");
        observer.notify(SessionEvent::FileSent {
            file_id: self.file_id.clone(),
            name: self.name.clone(),
            sha256,
        });
        Ok(Step::Completed)
    }
}

/// A file being received: declared metadata plus the index-addressed slots.
#[derive(Debug)]
pub struct InboundTransfer {
    pub file_id: FileId,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub total_chunks: u32,
    pub received_bytes: u64,
    pub last_activity: Instant,
    pub state: InboundState,
    slots: ChunkSlots,
    reported_percent: f64,
}

impl InboundTransfer {
    /// `receivedBytes / size` as a percentage, capped at 100. An empty file reads 100.
    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            return 100.0;
        }
        (self.received_bytes as f64 / self.size as f64 * 100.0).min(100.0)
    }

    pub fn chunks_received(&self) -> usize {
        self.slots.filled()
    }

    /// Progress clamped so the reported value never goes down.
    fn next_reported_percent(&mut self) -> f64 {
        self.reported_percent = self.reported_percent.max(self.progress());
        self.reported_percent
    }
}

/// Owns every transfer of the current session. Outbound sends run one file at a time.
#[derive(Debug)]
pub struct TransferTracker {
    chunk_size: usize,
    transfer_timeout: Duration,
    sweep_interval: Duration,
    outbound: VecDeque<OutboundTransfer>,
    inbound: HashMap<FileId, InboundTransfer>,
    next_sweep: Option<Instant>,
}

impl TransferTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            transfer_timeout: config.transfer_timeout,
            sweep_interval: config.transfer_sweep_interval,
            outbound: VecDeque::new(),
            inbound: HashMap::new(),
            next_sweep: None,
        }
    }

    /// Arm the periodic timeout sweep.
    pub fn start(&mut self, now: Instant) {
        self.next_sweep = Some(now + self.sweep_interval);
    }

    /// Cancel the sweep and drop every transfer without notices.
    pub fn stop(&mut self) {
        self.next_sweep = None;
        self.clear();
    }

    pub fn clear(&mut self) {
        if !self.outbound.is_empty() || !self.inbound.is_empty() {
            debug!(
                outbound = self.outbound.len(),
                inbound = self.inbound.len(),
                "discarding in-flight transfers"
            );
        }
        self.outbound.clear();
        self.inbound.clear();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_sweep
    }

    /// Queue a file for sending. It starts once every earlier file has finished.
    /// Files a receiver would reject for their chunk count are refused here.
    pub fn enqueue(&mut self, artifact: Artifact) -> Result<FileId, TooManyChunks> {
        let chunks = chunk::chunk_count(artifact.bytes.len() as u64, self.chunk_size);
        let total_chunks = u32::try_from(chunks)
            .ok()
            .filter(|n| *n <= MAX_TOTAL_CHUNKS)
            .ok_or_else(|| TooManyChunks {
                name: artifact.name.clone(),
                chunks,
            })?;
        let file_id = FileId::generate();
        let transfer =
            OutboundTransfer::new(file_id.clone(), artifact, self.chunk_size, total_chunks);
        debug!(file_id = %file_id, queued = self.outbound.len(), "file queued");
        self.outbound.push_back(transfer);
        Ok(file_id)
    }

    pub fn has_pending_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// The transfer currently being sent, if any.
    pub fn active_outbound(&self) -> Option<&OutboundTransfer> {
        self.outbound.front()
    }

    pub fn inbound(&self, file_id: &FileId) -> Option<&InboundTransfer> {
        self.inbound.get(file_id)
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Send until `budget` chunks have gone out or the queue is empty.
    /// A failed hand-off fails only that transfer; the next queued file continues.
    pub fn pump<O: Observer>(
        &mut self,
        channel: &dyn Channel,
        observer: &mut O,
        budget: usize,
    ) -> Pump {
        let mut sent = 0usize;
        while let Some(transfer) = self.outbound.front_mut() {
            match transfer.step(channel, observer) {
                Ok(Step::Meta) => {}
                Ok(Step::Chunk) => sent += 1,
                Ok(Step::Completed) => {
                    self.outbound.pop_front();
                }
                Err(err) => {
                    transfer.state = OutboundState::Failed;
                    warn!(file_id = %transfer.file_id, error = %err, "outbound transfer failed");
                    let message = format!("Failed to send {}: {err}", transfer.name);
                    observer.notify(SessionEvent::TransferFailed {
                        file_id: transfer.file_id.clone(),
                        direction: Direction::Outbound,
                        error: err,
                    });
                    observer.error(message);
                    self.outbound.pop_front();
                }
            }
            if sent >= budget.max(1) {
                return if self.outbound.is_empty() {
                    Pump::Idle
                } else {
                    Pump::Yield
                };
            }
        }
        Pump::Idle
    }

    /// `file-meta`: start tracking an inbound file.
    #[allow(clippy::too_many_arguments)]
    pub fn on_meta<O: Observer>(
        &mut self,
        file_id: FileId,
        name: String,
        size: u64,
        content_type: String,
        total_chunks: u32,
        now: Instant,
        observer: &mut O,
    ) {
        if self.inbound.contains_key(&file_id) {
            warn!(file_id = %file_id, "duplicate file-meta ignored");
            return;
        }
        if total_chunks > MAX_TOTAL_CHUNKS {
            warn!(file_id = %file_id, total_chunks, "file-meta rejected: too many chunks");
            observer.error(format!("Rejected incoming file {name}: too large"));
            return;
        }
        info!(file_id = %file_id, name = %name, size, total_chunks, "receiving file");
        observer.notify(SessionEvent::ReceiveStarted {
            file_id: file_id.clone(),
            name: name.clone(),
            size,
        });
        self.inbound.insert(
            file_id.clone(),
            InboundTransfer {
                file_id,
                name,
                size,
                content_type,
                total_chunks,
                received_bytes: 0,
                last_activity: now,
                state: InboundState::Receiving,
                slots: ChunkSlots::new(total_chunks as usize),
                reported_percent: 0.0,
            },
        );
    }

    /// `file-chunk`: store the block in its slot and report progress. Unknown ids are ignored.
    pub fn on_chunk<O: Observer>(
        &mut self,
        file_id: &FileId,
        index: u32,
        data: Vec<u8>,
        now: Instant,
        observer: &mut O,
    ) {
        let Some(transfer) = self.inbound.get_mut(file_id) else {
            debug!(file_id = %file_id, index, "chunk for unknown transfer ignored");
            return;
        };
        transfer.last_activity = now;
        let len = data.len() as u64;
        match transfer.slots.insert(index, data) {
            SlotInsert::Filled => transfer.received_bytes += len,
            SlotInsert::Replaced { previous_len } => {
                debug!(file_id = %file_id, index, "duplicate chunk overwrote slot");
                transfer.received_bytes = transfer.received_bytes - previous_len as u64 + len;
            }
            SlotInsert::OutOfRange => {
                debug!(file_id = %file_id, index, total = transfer.total_chunks, "out-of-range chunk ignored");
                return;
            }
        }
        let percent = transfer.next_reported_percent();
        observer.notify(SessionEvent::Progress {
            file_id: file_id.clone(),
            direction: Direction::Inbound,
            percent,
        });
    }

    /// `file-complete`: assemble and deliver the artifact, then forget the transfer.
    pub fn on_complete<O: Observer>(&mut self, file_id: &FileId, observer: &mut O) {
        let Some(mut transfer) = self.inbound.remove(file_id) else {
            debug!(file_id = %file_id, "completion for unknown transfer ignored");
            return;
        };
        let bytes = match transfer.slots.assemble() {
            Ok(bytes) => bytes,
            Err(missing) => {
                let err = TransferError::from(missing);
                warn!(file_id = %file_id, error = %err, "inbound transfer failed");
                observer.notify(SessionEvent::TransferFailed {
                    file_id: file_id.clone(),
                    direction: Direction::Inbound,
                    error: err.clone(),
                });
                observer.error(format!("Failed to receive {}: {err}", transfer.name));
                return;
            }
        };
        if bytes.len() as u64 != transfer.size {
            warn!(file_id = %file_id, declared = transfer.size, actual = bytes.len(), "size mismatch");
        }
        transfer.state = InboundState::Completed;
        if transfer.reported_percent < 100.0 {
            transfer.reported_percent = 100.0;
            observer.notify(SessionEvent::Progress {
                file_id: file_id.clone(),
                direction: Direction::Inbound,
                percent: 100.0,
            });
        }
        let sha256 = integrity::digest_hex(&bytes);
        info!(file_id = %file_id, name = %transfer.name, len = bytes.len(), %sha256, "file received");
        observer.notify(SessionEvent::FileReceived(ReceivedFile {
            file_id: transfer.file_id,
            name: transfer.name,
            content_type: transfer.content_type,
            bytes,
            sha256,
        }));
    }

    /// Run the timeout sweep if it is due, re-arming it. Returns how many transfers were purged.
    pub fn take_sweep_due<O: Observer>(&mut self, now: Instant, observer: &mut O) -> usize {
        match self.next_sweep {
            Some(at) if at <= now => {
                self.next_sweep = Some(now + self.sweep_interval);
                self.sweep(now, observer)
            }
            _ => 0,
        }
    }

    /// Purge inbound transfers idle for longer than the transfer timeout.
    pub fn sweep<O: Observer>(&mut self, now: Instant, observer: &mut O) -> usize {
        let mut expired: Vec<FileId> = self
            .inbound
            .values()
            .filter(|t| now.saturating_duration_since(t.last_activity) > self.transfer_timeout)
            .map(|t| t.file_id.clone())
            .collect();
        expired.sort();
        for file_id in &expired {
            let Some(mut transfer) = self.inbound.remove(file_id) else {
                continue;
            };
            transfer.state = InboundState::TimedOut;
            let err = TransferError::TimedOut {
                idle: now.saturating_duration_since(transfer.last_activity),
            };
            warn!(
                file_id = %file_id,
                received = transfer.chunks_received(),
                total = transfer.total_chunks,
                error = %err,
                "inbound transfer timed out"
            );
            observer.error(format!("Transfer of {} timed out: {err}", transfer.name));
            observer.notify(SessionEvent::TransferTimedOut {
                file_id: transfer.file_id,
                name: transfer.name,
            });
        }
        expired.len()
    }
}
