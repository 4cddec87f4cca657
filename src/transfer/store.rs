use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{Result, XsyncError};

/// Reassembly state for one in-flight chunked upload
#[derive(Debug)]
struct TransferSession {
    total_chunks: usize,
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
    expires_at: Instant,
}

impl TransferSession {
    fn new(total_chunks: usize, ttl: Duration) -> Self {
        Self {
            total_chunks,
            parts: vec![None; total_chunks],
            received: 0,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.total_chunks && self.parts.iter().all(Option::is_some)
    }
}

/// Result of accepting one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    pub ok: bool,
    pub complete: bool,
    pub received: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkAck {
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            complete: false,
            received: 0,
            total: 0,
            error: Some(error.into()),
        }
    }
}

/// Slot-indexed reassembly of chunked transfers, keyed by transfer id.
///
/// Chunks may arrive in any order. A session idle for longer than the TTL is
/// discarded; chunks arriving afterwards start a fresh, empty session.
pub struct ChunkStore {
    sessions: Mutex<HashMap<String, TransferSession>>,
    ttl: Duration,
}

impl ChunkStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn accept_chunk(
        &self,
        transfer_id: &str,
        chunk_index: usize,
        total_chunks: usize,
        bytes: Vec<u8>,
        expected_bytes: Option<usize>,
    ) -> Result<ChunkAck> {
        if transfer_id.is_empty() || total_chunks == 0 || chunk_index >= total_chunks {
            return Err(XsyncError::Transfer(format!(
                "Invalid chunk metadata (transfer '{}', index {}, total {})",
                transfer_id, chunk_index, total_chunks
            )));
        }
        if bytes.is_empty() {
            return Err(XsyncError::Transfer(format!(
                "Empty chunk received (index {}/{})",
                chunk_index + 1,
                total_chunks
            )));
        }
        if let Some(expected) = expected_bytes {
            if expected != bytes.len() {
                return Err(XsyncError::Transfer(format!(
                    "Chunk size mismatch at {}/{}: expected {}, got {}",
                    chunk_index + 1,
                    total_chunks,
                    expected,
                    bytes.len()
                )));
            }
        }

        let mut sessions = self.lock();
        Self::purge_locked(&mut sessions);

        let session = sessions
            .entry(transfer_id.to_string())
            .or_insert_with(|| TransferSession::new(total_chunks, self.ttl));
        if session.total_chunks != total_chunks {
            warn!(
                "Transfer {} restarted with a different chunk count ({} -> {})",
                transfer_id, session.total_chunks, total_chunks
            );
            *session = TransferSession::new(total_chunks, self.ttl);
        }

        let slot = &mut session.parts[chunk_index];
        if slot.is_none() {
            session.received += 1;
        }
        *slot = Some(bytes);
        session.expires_at = Instant::now() + self.ttl;

        let ack = ChunkAck {
            ok: true,
            complete: session.is_complete(),
            received: session.received,
            total: session.total_chunks,
            error: None,
        };

        if total_chunks <= 20 || chunk_index == 0 || chunk_index + 1 == total_chunks || (chunk_index + 1) % 25 == 0 {
            debug!(
                "Chunk {}/{} stored for {} (complete: {})",
                chunk_index + 1,
                total_chunks,
                transfer_id,
                ack.complete
            );
        }

        Ok(ack)
    }

    /// Rejection ack carrying the session's real progress, so the sender knows what to resend
    pub fn rejection(&self, transfer_id: &str, error: impl Into<String>) -> ChunkAck {
        let mut ack = ChunkAck::rejected(error);
        let mut sessions = self.lock();
        Self::purge_locked(&mut sessions);
        if let Some(session) = sessions.get(transfer_id) {
            ack.received = session.received;
            ack.total = session.total_chunks;
        }
        ack
    }

    /// Take the reassembled buffer. Single use: the session is removed on success.
    pub fn consume(&self, transfer_id: &str) -> Option<Vec<u8>> {
        let mut sessions = self.lock();
        Self::purge_locked(&mut sessions);

        if !sessions.get(transfer_id)?.is_complete() {
            return None;
        }
        let session = sessions.remove(transfer_id)?;
        let total: usize = session.parts.iter().flatten().map(Vec::len).sum();
        let mut merged = Vec::with_capacity(total);
        for part in session.parts.into_iter().flatten() {
            merged.extend_from_slice(&part);
        }
        Some(merged)
    }

    /// Like [`consume`](Self::consume), but reports a missing or incomplete session as an error
    pub fn take(&self, transfer_id: &str) -> Result<Vec<u8>> {
        self.consume(transfer_id).ok_or_else(|| {
            XsyncError::Transfer(format!(
                "Chunked buffer incomplete, expired or missing for transfer '{}'",
                transfer_id
            ))
        })
    }

    /// Drop every session whose TTL has elapsed. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.lock();
        Self::purge_locked(&mut sessions)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_locked(sessions: &mut HashMap<String, TransferSession>) -> usize {
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|id, session| {
            let alive = session.expires_at > now;
            if !alive {
                debug!(
                    "Transfer {} expired with {}/{} chunks",
                    id, session.received, session.total_chunks
                );
            }
            alive
        });
        before - sessions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TransferSession>> {
        // A poisoned map still holds consistent per-session state
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChunkStore {
        ChunkStore::new(Duration::from_secs(60))
    }

    #[test]
    fn test_rejects_invalid_metadata() {
        let store = store();
        assert!(store.accept_chunk("t", 0, 0, vec![1], None).is_err());
        assert!(store.accept_chunk("t", 2, 2, vec![1], None).is_err());
        assert!(store.accept_chunk("", 0, 1, vec![1], None).is_err());
        assert!(store.accept_chunk("t", 0, 1, vec![], None).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_size_mismatch_does_not_complete() {
        let store = store();
        let err = store.accept_chunk("t", 0, 1, vec![1, 2, 3], Some(4)).unwrap_err();
        assert!(matches!(err, XsyncError::Transfer(_)));
        assert!(err.to_string().contains("expected 4, got 3"));
        assert!(store.consume("t").is_none());
    }

    #[test]
    fn test_rejection_reports_session_progress() {
        let store = store();
        store.accept_chunk("t", 0, 3, vec![1], None).unwrap();
        store.accept_chunk("t", 2, 3, vec![3], None).unwrap();

        let ack = store.rejection("t", "Chunk size mismatch");
        assert!(!ack.ok);
        assert_eq!((ack.received, ack.total), (2, 3));
        assert_eq!(ack.error.as_deref(), Some("Chunk size mismatch"));

        let unknown = store.rejection("never_seen", "Invalid chunk metadata");
        assert_eq!((unknown.received, unknown.total), (0, 0));
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let store = store();
        store.accept_chunk("t", 0, 2, vec![1, 2], Some(2)).unwrap();
        let again = store.accept_chunk("t", 0, 2, vec![1, 2], Some(2)).unwrap();
        assert_eq!(again.received, 1);
        assert!(!again.complete);

        let done = store.accept_chunk("t", 1, 2, vec![3], Some(1)).unwrap();
        assert!(done.complete);
        assert_eq!(done.received, 2);
        assert_eq!(store.consume("t").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_consume_is_single_use() {
        let store = store();
        store.accept_chunk("t", 0, 1, vec![9], None).unwrap();
        assert_eq!(store.consume("t"), Some(vec![9]));
        assert_eq!(store.consume("t"), None);
        assert!(store.take("t").is_err());
    }

    #[test]
    fn test_incomplete_session_is_not_consumable() {
        let store = store();
        store.accept_chunk("t", 1, 3, vec![1], None).unwrap();
        assert!(store.consume("t").is_none());
        // still present after a failed consume
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_changed_total_restarts_session() {
        let store = store();
        store.accept_chunk("t", 0, 3, vec![1], None).unwrap();
        let ack = store.accept_chunk("t", 0, 1, vec![7], None).unwrap();
        assert!(ack.complete);
        assert_eq!(store.consume("t"), Some(vec![7]));
    }

    #[test]
    fn test_expired_session_stays_unconsumable() {
        let store = ChunkStore::new(Duration::from_millis(20));
        store.accept_chunk("t", 0, 2, vec![1], None).unwrap();
        std::thread::sleep(Duration::from_millis(60));

        // the late chunk starts a fresh session rather than completing the old one
        let ack = store.accept_chunk("t", 1, 2, vec![2], None).unwrap();
        assert!(!ack.complete);
        assert_eq!(ack.received, 1);
        assert!(store.consume("t").is_none());
    }

    #[test]
    fn test_purge_expired() {
        let store = ChunkStore::new(Duration::from_millis(10));
        store.accept_chunk("a", 0, 2, vec![1], None).unwrap();
        store.accept_chunk("b", 0, 2, vec![1], None).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.purge_expired(), 2);
        assert!(store.is_empty());
    }
}
