use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Result, XsyncError};
use super::{encode_with_id, ChunkDescriptor};

/// Summary handed back to the peer in place of an inline payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundTransfer {
    pub transfer_id: String,
    pub total_chunks: usize,
    pub total_bytes: usize,
}

struct PendingTransfer {
    chunks: Vec<ChunkDescriptor>,
    fetched: Vec<bool>,
    expires_at: Instant,
}

/// Outbound chunked results waiting to be fetched by the peer.
///
/// A transfer is released once every chunk has been fetched at least once, or when
/// it sits idle past the TTL.
pub struct Outbox {
    transfers: Mutex<HashMap<String, PendingTransfer>>,
    chunk_size: usize,
    ttl: Duration,
}

impl Outbox {
    pub fn new(chunk_size: usize, ttl: Duration) -> Self {
        Self {
            transfers: Mutex::new(HashMap::new()),
            chunk_size,
            ttl,
        }
    }

    /// Chunk `bytes` under `transfer_id` and hold the chunks for fetching
    pub fn publish(&self, transfer_id: &str, bytes: &[u8]) -> OutboundTransfer {
        let chunks = encode_with_id(transfer_id, bytes, self.chunk_size);
        let summary = OutboundTransfer {
            transfer_id: transfer_id.to_string(),
            total_chunks: chunks.len(),
            total_bytes: bytes.len(),
        };
        debug!(
            "Published {} ({} bytes in {} chunks)",
            transfer_id, summary.total_bytes, summary.total_chunks
        );

        let mut transfers = self.lock();
        Self::purge_locked(&mut transfers);
        if !chunks.is_empty() {
            transfers.insert(
                transfer_id.to_string(),
                PendingTransfer {
                    fetched: vec![false; chunks.len()],
                    chunks,
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
        summary
    }

    pub fn fetch(&self, transfer_id: &str, chunk_index: usize) -> Result<ChunkDescriptor> {
        let mut transfers = self.lock();
        Self::purge_locked(&mut transfers);

        let pending = transfers.get_mut(transfer_id).ok_or_else(|| {
            XsyncError::Transfer(format!("Unknown or expired outbound transfer '{}'", transfer_id))
        })?;
        let chunk = pending.chunks.get(chunk_index).cloned().ok_or_else(|| {
            XsyncError::Transfer(format!(
                "Chunk index {} out of range for '{}' ({} chunks)",
                chunk_index,
                transfer_id,
                pending.chunks.len()
            ))
        })?;

        pending.fetched[chunk_index] = true;
        pending.expires_at = Instant::now() + self.ttl;
        if pending.fetched.iter().all(|f| *f) {
            debug!("Outbound transfer {} fully fetched; releasing", transfer_id);
            transfers.remove(transfer_id);
        }
        Ok(chunk)
    }

    pub fn purge_expired(&self) -> usize {
        let mut transfers = self.lock();
        Self::purge_locked(&mut transfers)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_locked(transfers: &mut HashMap<String, PendingTransfer>) -> usize {
        let now = Instant::now();
        let before = transfers.len();
        transfers.retain(|_, t| t.expires_at > now);
        before - transfers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingTransfer>> {
        self.transfers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{reassemble, ChunkStore};

    #[test]
    fn test_publish_then_fetch_all_releases() {
        let outbox = Outbox::new(4, Duration::from_secs(60));
        let summary = outbox.publish("r1", b"0123456789");
        assert_eq!(summary.total_chunks, 3);
        assert_eq!(summary.total_bytes, 10);

        let chunks: Vec<_> = (0..3).map(|i| outbox.fetch("r1", i).unwrap()).collect();
        assert!(outbox.is_empty());

        let store = ChunkStore::new(Duration::from_secs(60));
        assert_eq!(reassemble(&store, chunks).unwrap().unwrap(), b"0123456789");
    }

    #[test]
    fn test_refetch_before_release() {
        let outbox = Outbox::new(4, Duration::from_secs(60));
        outbox.publish("r1", b"01234567");
        let first = outbox.fetch("r1", 0).unwrap();
        assert_eq!(outbox.fetch("r1", 0).unwrap(), first);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn test_fetch_errors() {
        let outbox = Outbox::new(4, Duration::from_secs(60));
        outbox.publish("r1", b"0123");
        assert!(outbox.fetch("missing", 0).is_err());
        assert!(outbox.fetch("r1", 5).is_err());
    }

    #[test]
    fn test_expiry() {
        let outbox = Outbox::new(4, Duration::from_millis(10));
        outbox.publish("r1", b"0123");
        std::thread::sleep(Duration::from_millis(40));
        assert!(outbox.fetch("r1", 0).is_err());
    }
}
