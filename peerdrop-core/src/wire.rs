//! Framing for stream transports: length-prefix (4 bytes LE) + JSON payload.

use crate::protocol::Message;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB
/// Room for the JSON fields around a chunk's base64 data.
const CHUNK_ENVELOPE: usize = 1024;

/// Largest chunk whose `file-chunk` frame stays under the frame limit once base64-encoded.
pub const MAX_CHUNK_SIZE: usize = (MAX_FRAME_LEN as usize - CHUNK_ENVELOPE) / 4 * 3;

/// Encode a message into a single frame: 4 bytes LE length + JSON payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message into a frame (serialization or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("frame too large ({0} bytes)")]
    TooLarge(usize),
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` if not enough bytes (caller should try again after more data).
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    let len = frame_len(bytes)?;
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg: Message = serde_json::from_slice(&bytes[LEN_SIZE..LEN_SIZE + len])?;
    Ok((msg, LEN_SIZE + len))
}

/// Read the payload length from a frame header, checking the size limit.
pub fn frame_len(header: &[u8]) -> Result<usize, FrameDecodeError> {
    if header.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

/// Size of the length prefix in front of every frame.
pub const fn header_len() -> usize {
    LEN_SIZE
}

/// Error decoding a frame (need more bytes, too large, or malformed JSON).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FileId;

    fn sample_chunk() -> Message {
        Message::FileChunk {
            file_id: FileId::from("f-1"),
            chunk_index: 7,
            data: (0..=255u8).collect(),
        }
    }

    #[test]
    fn roundtrip_chunk() {
        let msg = sample_chunk();
        let frame = encode_frame(&msg).unwrap();
        let (decoded, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_frame(&sample_chunk()).unwrap();
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..super::LEN_SIZE]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn multiple_messages() {
        let a = Message::Text {
            content: "hi".into(),
            timestamp: 1,
        };
        let b = Message::FileComplete {
            file_id: FileId::from("f-1"),
        };
        let fa = encode_frame(&a).unwrap();
        let fb = encode_frame(&b).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&fa);
        buf.extend_from_slice(&fb);
        let (m1, n1) = decode_frame(&buf).unwrap();
        assert_eq!(n1, fa.len());
        let (m2, n2) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(n2, fb.len());
        assert!(matches!(m1, Message::Text { .. }));
        assert!(matches!(m2, Message::FileComplete { .. }));
    }

    #[test]
    fn oversized_header_rejected() {
        let header = (MAX_FRAME_LEN + 1).to_le_bytes();
        assert!(matches!(
            decode_frame(&header),
            Err(FrameDecodeError::TooLarge)
        ));
    }

    #[test]
    fn garbage_payload_is_decode_error() {
        let mut frame = 3u32.to_le_bytes().to_vec();
        frame.extend_from_slice(b"{x}");
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::Decode(_))
        ));
    }

    #[test]
    fn largest_chunk_fits_in_one_frame() {
        let chunk = |len: usize| Message::FileChunk {
            file_id: FileId::generate(),
            chunk_index: u32::MAX,
            data: vec![0xAB; len],
        };
        let frame = encode_frame(&chunk(MAX_CHUNK_SIZE)).unwrap();
        assert!(frame.len() <= header_len() + MAX_FRAME_LEN as usize);
        assert!(matches!(
            encode_frame(&chunk(13 * 1024 * 1024)),
            Err(FrameEncodeError::TooLarge(_))
        ));
    }
}
