use serde::{Deserialize, Serialize};

/// Prefix shared by every extracted track label
pub const EXTRACTED_PREFIX: &str = "extracted_sub";

/// Variant tag carried by tracks produced by a timeline repair pass
pub const REPAIR_VARIANT: &str = "fix";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackCodec {
    Srt,
    Copy,
}

/// Which rung of the demux ladder produced a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Primary,
    Copy,
    Repaired,
    /// Read from a remote stream URL, converted from WebVTT
    Remote,
}

/// Exactly one representation of a track's payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackPayload {
    /// Plain subtitle text
    Content(String),
    /// Remuxed container bytes, base64 on the wire
    ContentBase64(#[serde(with = "crate::transfer::b64")] Vec<u8>),
    /// Payload moved to an outbound chunked transfer
    TransferId(String),
}

/// One extracted subtitle stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub label: String,
    pub language: String,
    pub codec: TrackCodec,
    pub binary: bool,
    pub byte_length: usize,
    pub source: TrackSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_label: Option<String>,
    #[serde(flatten)]
    pub payload: TrackPayload,
}

impl Track {
    pub fn text<S: Into<String>>(id: S, label: S, content: String, source: TrackSource) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            language: "und".to_string(),
            codec: TrackCodec::Srt,
            binary: false,
            byte_length: content.len(),
            source,
            original_label: None,
            payload: TrackPayload::Content(content),
        }
    }

    pub fn binary<S: Into<String>>(id: S, label: S, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            language: "und".to_string(),
            codec: TrackCodec::Copy,
            binary: true,
            byte_length: bytes.len(),
            source: TrackSource::Copy,
            original_label: None,
            payload: TrackPayload::ContentBase64(bytes),
        }
    }

    /// Subtitle text, if the payload is inline text
    pub fn content(&self) -> Option<&str> {
        match &self.payload {
            TrackPayload::Content(text) => Some(text),
            _ => None,
        }
    }

    /// Raw payload bytes, if the payload is inline
    pub fn payload_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            TrackPayload::Content(text) => Some(text.as_bytes()),
            TrackPayload::ContentBase64(bytes) => Some(bytes),
            TrackPayload::TransferId(_) => None,
        }
    }

    /// File extension matching the payload shape
    pub fn extension(&self) -> &'static str {
        if self.binary || self.codec == TrackCodec::Copy {
            "mkv"
        } else {
            "srt"
        }
    }
}

/// `extracted_sub_[variant_]NN.ext`
pub fn format_extracted_name(index: usize, ext: &str, variant: Option<&str>) -> String {
    match variant {
        Some(variant) => format!("{}_{}_{:02}.{}", EXTRACTED_PREFIX, variant, index, ext),
        None => format!("{}_{:02}.{}", EXTRACTED_PREFIX, index, ext),
    }
}

/// Renumber tracks 1..=n and relabel them so every code path yields the same naming
pub fn normalize_tracks(tracks: Vec<Track>) -> Vec<Track> {
    tracks
        .into_iter()
        .enumerate()
        .map(|(idx, mut track)| {
            let variant = (track.source == TrackSource::Repaired).then_some(REPAIR_VARIANT);
            let label = format_extracted_name(idx + 1, track.extension(), variant);
            track.original_label = Some(std::mem::replace(&mut track.label, label));
            track.id = (idx + 1).to_string();
            track
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_extracted_name() {
        assert_eq!(format_extracted_name(1, "srt", None), "extracted_sub_01.srt");
        assert_eq!(format_extracted_name(12, "mkv", None), "extracted_sub_12.mkv");
        assert_eq!(format_extracted_name(3, "srt", Some("fix")), "extracted_sub_fix_03.srt");
    }

    #[test]
    fn test_normalize_renumbers_and_keeps_original_label() {
        let tracks = vec![
            Track::text("4", "job_x_extracted_sub_04.srt", "a".to_string(), TrackSource::Primary),
            Track::binary("7", "job_x_extracted_sub_07.mkv", vec![1, 2, 3]),
            Track::text("2", "job_x_extracted_sub_fix_02.srt", "b".to_string(), TrackSource::Repaired),
        ];
        let normalized = normalize_tracks(tracks);

        let labels: Vec<_> = normalized.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["extracted_sub_01.srt", "extracted_sub_02.mkv", "extracted_sub_fix_03.srt"]);
        let ids: Vec<_> = normalized.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(normalized[1].original_label.as_deref(), Some("job_x_extracted_sub_07.mkv"));
    }

    #[test]
    fn test_wire_shape_text() {
        let track = Track::text("1", "extracted_sub_01.srt", "hello".to_string(), TrackSource::Primary);
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["content"], "hello");
        assert_eq!(json["codec"], "srt");
        assert_eq!(json["binary"], false);
        assert_eq!(json["byteLength"], 5);
        assert!(json.get("contentBase64").is_none());
    }

    #[test]
    fn test_wire_shape_binary() {
        let track = Track::binary("1", "extracted_sub_01.mkv", vec![0x1a, 0x45, 0xdf, 0xa3]);
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["contentBase64"], "GkXfow==");
        assert_eq!(json["codec"], "copy");
        assert!(json.get("content").is_none());

        let back: Track = serde_json::from_value(json).unwrap();
        assert_eq!(back, track);
    }
}
