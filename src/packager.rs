use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transfer::{new_transfer_id, Outbox};
use crate::track::{Track, TrackPayload};

/// Track records ready for the return channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedTracks {
    pub tracks: Vec<Track>,
    /// True when at least one payload moved to a chunked transfer
    pub chunked: bool,
}

/// Move every payload larger than `size_threshold` into `outbox`.
///
/// The record keeps its metadata and `byteLength`; the payload is replaced by the
/// transfer id the peer fetches chunks from. Smaller tracks pass unchanged.
pub fn pack(tracks: Vec<Track>, size_threshold: usize, outbox: &Outbox) -> PackedTracks {
    let mut chunked = false;
    let tracks = tracks
        .into_iter()
        .map(|mut track| {
            let oversized = track
                .payload_bytes()
                .filter(|bytes| bytes.len() > size_threshold)
                .map(<[u8]>::to_vec);
            if let Some(bytes) = oversized {
                let transfer_id = new_transfer_id(&format!("track_{}", track.id));
                let summary = outbox.publish(&transfer_id, &bytes);
                debug!(
                    "Track {} ({} bytes) sent as {} chunk(s)",
                    track.label, summary.total_bytes, summary.total_chunks
                );
                track.byte_length = bytes.len();
                track.payload = TrackPayload::TransferId(transfer_id);
                chunked = true;
            }
            track
        })
        .collect();
    PackedTracks { tracks, chunked }
}
