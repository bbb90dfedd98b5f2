//! TCP channel adapter: length-prefixed frames over one connected stream.
//! Sends are handed to a writer task through an unbounded queue; a reader task turns frames into channel events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use peerdrop_core::driver::ChannelEvent;
use peerdrop_core::wire::{self, decode_frame, encode_frame};
use peerdrop_core::{Channel, ChannelError, Message, Role};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const LEN_SIZE: usize = wire::header_len();

pub struct StreamChannel {
    writer: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    open: Arc<AtomicBool>,
}

impl Channel for StreamChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, msg: &Message) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let frame = encode_frame(msg).map_err(|e| ChannelError::Send(e.to_string()))?;
        let writer = self.writer.lock();
        let tx = writer.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(frame).map_err(|_| ChannelError::Closed)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        // Dropping the sender ends the writer task, which shuts the write half down.
        if self.writer.lock().take().is_some() {
            debug!("stream channel closed locally");
        }
    }
}

/// Split a connected stream into reader/writer tasks and announce it to the driver as open.
pub fn attach<S>(
    stream: S,
    role: Role,
    events: mpsc::UnboundedSender<ChannelEvent>,
) -> Arc<StreamChannel>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let open = Arc::new(AtomicBool::new(true));
    let channel = Arc::new(StreamChannel {
        writer: Mutex::new(Some(tx)),
        open: open.clone(),
    });
    // Open must be queued before the reader can queue the first message.
    let _ = events.send(ChannelEvent::Open {
        channel: channel.clone(),
        role,
    });
    tokio::spawn(write_loop(writer, rx, open.clone()));
    tokio::spawn(read_loop(reader, events.clone(), open));
    channel
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>, open: Arc<AtomicBool>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            warn!(error = %e, "write failed; marking channel closed");
            open.store(false, Ordering::SeqCst);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(mut reader: R, events: mpsc::UnboundedSender<ChannelEvent>, open: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let outcome = loop {
        let mut header = [0u8; LEN_SIZE];
        if let Err(e) = reader.read_exact(&mut header).await {
            break match e.kind() {
                std::io::ErrorKind::UnexpectedEof => ChannelEvent::Closed,
                _ => ChannelEvent::Error(e.to_string()),
            };
        }
        let len = match wire::frame_len(&header) {
            Ok(len) => len,
            Err(e) => break ChannelEvent::Error(e.to_string()),
        };
        let mut frame = vec![0u8; LEN_SIZE + len];
        frame[..LEN_SIZE].copy_from_slice(&header);
        if let Err(e) = reader.read_exact(&mut frame[LEN_SIZE..]).await {
            break ChannelEvent::Error(e.to_string());
        }
        match decode_frame(&frame) {
            Ok((msg, _)) => {
                if events.send(ChannelEvent::Message(msg)).is_err() {
                    break ChannelEvent::Closed;
                }
            }
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    };
    open.store(false, Ordering::SeqCst);
    info!("peer link ended");
    let _ = events.send(outcome);
}

#[cfg(test)]
mod tests {
    use peerdrop_core::FileId;

    use super::*;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let left = attach(a, Role::Initiator, a_tx);
        let _right = attach(b, Role::Responder, b_tx);
        assert!(matches!(a_rx.recv().await, Some(ChannelEvent::Open { .. })));
        assert!(matches!(b_rx.recv().await, Some(ChannelEvent::Open { .. })));

        let msg = Message::FileChunk {
            file_id: FileId::from("f"),
            chunk_index: 0,
            data: vec![1, 2, 3],
        };
        left.send(&msg).unwrap();
        match b_rx.recv().await {
            Some(ChannelEvent::Message(got)) => assert_eq!(got, msg),
            _ => panic!("expected message"),
        }

        left.close();
        assert!(!left.is_open());
        assert_eq!(left.send(&msg), Err(ChannelError::Closed));
        assert!(matches!(b_rx.recv().await, Some(ChannelEvent::Closed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn open_precedes_frames_already_in_flight() {
        let (local, mut remote) = tokio::io::duplex(64 * 1024);
        let hello = Message::Text {
            content: "early".into(),
            timestamp: 1,
        };
        remote
            .write_all(&wire::encode_frame(&hello).unwrap())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _channel = attach(local, Role::Responder, tx);
        assert!(matches!(
            rx.recv().await,
            Some(ChannelEvent::Open {
                role: Role::Responder,
                ..
            })
        ));
        match rx.recv().await {
            Some(ChannelEvent::Message(got)) => assert_eq!(got, hello),
            _ => panic!("expected message"),
        }
    }
}
