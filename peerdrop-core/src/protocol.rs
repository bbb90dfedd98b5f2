//! Peerdrop wire protocol: message types exchanged over an open channel.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one artifact transfer, unique per send. Generated as UUID v4.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn generate() -> Self {
        FileId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        FileId(s.to_owned())
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        FileId(s)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// All wire message types. Encoding is JSON tagged by `type`; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Liveness ping. Timestamp in milliseconds since the Unix epoch.
    Heartbeat { timestamp: i64 },
    /// Chat text, delivered straight to the user.
    Text { content: String, timestamp: i64 },
    /// Announces a file; receiver allocates `total_chunks` slots.
    #[serde(rename_all = "camelCase")]
    FileMeta {
        file_id: FileId,
        name: String,
        size: u64,
        file_type: String,
        total_chunks: u32,
    },
    /// One chunk of a file, addressed by zero-based index.
    #[serde(rename_all = "camelCase")]
    FileChunk {
        file_id: FileId,
        chunk_index: u32,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Sender finished handing every chunk to the channel.
    #[serde(rename_all = "camelCase")]
    FileComplete { file_id: FileId },
    /// Any tag this build does not know. Ignored by dispatch.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Heartbeat { .. } => "heartbeat",
            Message::Text { .. } => "text",
            Message::FileMeta { .. } => "file-meta",
            Message::FileChunk { .. } => "file-chunk",
            Message::FileComplete { .. } => "file-complete",
            Message::Unknown => "unknown",
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch, as carried in `timestamp` fields.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 chunk data: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_meta_uses_wire_field_names() {
        let msg = Message::FileMeta {
            file_id: FileId::from("X"),
            name: "a.txt".into(),
            size: 150_000,
            file_type: "text/plain".into(),
            total_chunks: 3,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "file-meta");
        assert_eq!(json["fileId"], "X");
        assert_eq!(json["fileType"], "text/plain");
        assert_eq!(json["totalChunks"], 3);
        assert_eq!(json["size"], 150_000);
    }

    #[test]
    fn chunk_data_is_base64_text() {
        let msg = Message::FileChunk {
            file_id: FileId::from("X"),
            chunk_index: 2,
            data: b"hello".to_vec(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "file-chunk");
        assert_eq!(json["chunkIndex"], 2);
        assert_eq!(json["data"], "aGVsbG8=");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_tag_decodes_as_unknown() {
        let msg: Message =
            serde_json::from_str(r#"{"type":"typing-indicator","active":true}"#).unwrap();
        assert_eq!(msg, Message::Unknown);
        assert_eq!(msg.kind(), "unknown");
    }

    #[test]
    fn heartbeat_shape() {
        let json = serde_json::to_string(&Message::Heartbeat { timestamp: 42 }).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat","timestamp":42}"#);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(FileId::generate(), FileId::generate());
    }
}
