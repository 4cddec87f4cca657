use serde::{Deserialize, Serialize};

use crate::transfer::{ChunkAck, ChunkDescriptor, OutboundTransfer};
use crate::track::Track;

/// Inline bytes or a reference to a completed chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferSource {
    #[serde(default, with = "crate::transfer::b64::option", skip_serializing_if = "Option::is_none")]
    pub buffer: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRequest {
    #[serde(flatten)]
    pub source: BufferSource,
    #[serde(default)]
    pub start_sec: Option<f64>,
    #[serde(default)]
    pub dur_sec: Option<f64>,
    #[serde(default)]
    pub seek_to_sec: Option<f64>,
}

/// Requests accepted on the message channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    Extract {
        job_id: String,
        #[serde(flatten)]
        source: BufferSource,
    },
    /// Subtitles read by the engine straight from a remote stream
    #[serde(rename_all = "camelCase")]
    ExtractUrl { job_id: String, stream_url: String },
    #[serde(rename_all = "camelCase")]
    Decode {
        job_id: String,
        windows: Vec<WindowRequest>,
    },
    #[serde(rename_all = "camelCase")]
    ChunkUpload {
        transfer_id: String,
        chunk_index: usize,
        total_chunks: usize,
        #[serde(with = "crate::transfer::b64")]
        bytes: Vec<u8>,
        #[serde(default)]
        expected_bytes: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    ChunkFetch { transfer_id: String, chunk_index: usize },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Extract { .. } => "EXTRACT",
            Request::ExtractUrl { .. } => "EXTRACT_URL",
            Request::Decode { .. } => "DECODE",
            Request::ChunkUpload { .. } => "CHUNK_UPLOAD",
            Request::ChunkFetch { .. } => "CHUNK_FETCH",
        }
    }

    /// Chunk traffic reports failure as `ok: false`; jobs as `success: false`
    pub fn is_chunk_traffic(&self) -> bool {
        matches!(self, Request::ChunkUpload { .. } | Request::ChunkFetch { .. })
    }
}

/// A request plus the optional correlation id echoed on its reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub request: Request,
}

/// Reference to one decoded window waiting in the outbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioWindowRef {
    pub transfer_id: String,
    pub total_bytes: usize,
    pub total_chunks: usize,
    pub start_ms: u64,
}

impl AudioWindowRef {
    pub fn new(transfer: OutboundTransfer, start_ms: u64) -> Self {
        Self {
            transfer_id: transfer.transfer_id,
            total_bytes: transfer.total_bytes,
            total_chunks: transfer.total_chunks,
            start_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Extracted {
        success: bool,
        tracks: Vec<Track>,
        chunked: bool,
    },
    #[serde(rename_all = "camelCase")]
    Decoded {
        success: bool,
        audio_windows: Vec<AudioWindowRef>,
        chunked: bool,
    },
    Chunk(ChunkAck),
    Fetched {
        ok: bool,
        #[serde(flatten)]
        chunk: ChunkDescriptor,
    },
    JobFailed {
        success: bool,
        error: String,
    },
    ChunkFailed {
        ok: bool,
        error: String,
    },
}

impl Response {
    pub fn extracted(tracks: Vec<Track>, chunked: bool) -> Self {
        Response::Extracted {
            success: true,
            tracks,
            chunked,
        }
    }

    pub fn decoded(audio_windows: Vec<AudioWindowRef>) -> Self {
        Response::Decoded {
            success: true,
            audio_windows,
            chunked: true,
        }
    }

    pub fn fetched(chunk: ChunkDescriptor) -> Self {
        Response::Fetched { ok: true, chunk }
    }

    pub fn job_failed(error: impl Into<String>) -> Self {
        Response::JobFailed {
            success: false,
            error: error.into(),
        }
    }

    pub fn chunk_failed(error: impl Into<String>) -> Self {
        Response::ChunkFailed {
            ok: false,
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Response::Extracted { success, .. }
            | Response::Decoded { success, .. }
            | Response::JobFailed { success, .. } => *success,
            Response::Chunk(ack) => ack.ok,
            Response::Fetched { ok, .. } | Response::ChunkFailed { ok, .. } => *ok,
        }
    }
}

/// One line written back on the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub response: Response,
}

/// Progress line relayed to the caller while its request runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "LOG")]
pub struct LogLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub level: String,
    pub text: String,
    /// Unix time in milliseconds
    pub ts: i64,
}

/// Anything written on the reply channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Reply(Reply),
    Log(LogLine),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_extract_inline() {
        let envelope: Envelope = serde_json::from_value(json!({
            "id": "m1",
            "type": "EXTRACT",
            "jobId": "job-1",
            "buffer": "AQID"
        }))
        .unwrap();
        assert_eq!(envelope.id.as_deref(), Some("m1"));
        match envelope.request {
            Request::Extract { job_id, source } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(source.buffer, Some(vec![1, 2, 3]));
                assert_eq!(source.transfer_id, None);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_parse_decode_windows() {
        let envelope: Envelope = serde_json::from_value(json!({
            "type": "DECODE",
            "jobId": "job-2",
            "windows": [
                {"transferId": "up_1", "startSec": 12.5, "durSec": 30},
                {"buffer": "AAAA", "seekToSec": 60}
            ]
        }))
        .unwrap();
        let Request::Decode { windows, .. } = envelope.request else {
            panic!("expected DECODE");
        };
        assert_eq!(windows[0].source.transfer_id.as_deref(), Some("up_1"));
        assert_eq!(windows[0].start_sec, Some(12.5));
        assert_eq!(windows[1].source.buffer, Some(vec![0, 0, 0]));
        assert_eq!(windows[1].seek_to_sec, Some(60.0));
    }

    #[test]
    fn test_parse_chunk_upload() {
        let envelope: Envelope = serde_json::from_value(json!({
            "type": "CHUNK_UPLOAD",
            "transferId": "t",
            "chunkIndex": 2,
            "totalChunks": 12,
            "bytes": "AQ==",
            "expectedBytes": 1
        }))
        .unwrap();
        assert!(envelope.request.is_chunk_traffic());
        assert_eq!(envelope.request.kind(), "CHUNK_UPLOAD");
    }

    #[test]
    fn test_parse_extract_url() {
        let envelope: Envelope = serde_json::from_value(json!({
            "id": "v1",
            "type": "EXTRACT_URL",
            "jobId": "job-9",
            "streamUrl": "https://media.example/ep.m3u8"
        }))
        .unwrap();
        assert_eq!(envelope.request.kind(), "EXTRACT_URL");
        assert!(!envelope.request.is_chunk_traffic());
        let Request::ExtractUrl { stream_url, .. } = envelope.request else {
            panic!("expected EXTRACT_URL");
        };
        assert_eq!(stream_url, "https://media.example/ep.m3u8");
    }

    #[test]
    fn test_log_line_shape() {
        let line = Outgoing::Log(LogLine {
            id: Some("v1".to_string()),
            level: "warn".to_string(),
            text: "Stream 2 has no cues".to_string(),
            ts: 1_700_000_000_000,
        });
        assert_eq!(
            serde_json::to_value(&line).unwrap(),
            json!({"type": "LOG", "id": "v1", "level": "warn", "text": "Stream 2 has no cues", "ts": 1_700_000_000_000i64})
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let parsed = serde_json::from_value::<Envelope>(json!({"type": "TRANSLATE"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_reply_shapes() {
        let reply = Reply {
            id: Some("m1".to_string()),
            response: Response::job_failed("No subtitle tracks found"),
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"id": "m1", "success": false, "error": "No subtitle tracks found"})
        );

        let reply = Reply {
            id: None,
            response: Response::decoded(vec![AudioWindowRef {
                transfer_id: "adec_1".to_string(),
                total_bytes: 100,
                total_chunks: 1,
                start_ms: 500,
            }]),
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "success": true,
                "chunked": true,
                "audioWindows": [{"transferId": "adec_1", "totalBytes": 100, "totalChunks": 1, "startMs": 500}]
            })
        );
    }
}
