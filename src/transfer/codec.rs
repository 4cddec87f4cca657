use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use super::ChunkStore;

/// One size-bounded slice of a larger buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub transfer_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(with = "super::b64")]
    pub bytes: Vec<u8>,
    pub expected_bytes: usize,
}

/// Generate a fresh transfer id, prefixed with a readable label
pub fn new_transfer_id(label: &str) -> String {
    format!("{}_{}", label, Uuid::new_v4().simple())
}

/// Number of chunks needed for `len` bytes: ceil(len / chunk_size)
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1))
}

/// Split `buffer` into chunks under a freshly generated transfer id
pub fn encode(buffer: &[u8], chunk_size: usize) -> Vec<ChunkDescriptor> {
    encode_with_id(&new_transfer_id("xfer"), buffer, chunk_size)
}

/// Split `buffer` into chunks of at most `chunk_size` bytes. The last chunk may be
/// shorter. An empty buffer yields no chunks.
pub fn encode_with_id(transfer_id: &str, buffer: &[u8], chunk_size: usize) -> Vec<ChunkDescriptor> {
    let chunk_size = chunk_size.max(1);
    let total_chunks = chunk_count(buffer.len(), chunk_size);

    buffer
        .chunks(chunk_size)
        .enumerate()
        .map(|(chunk_index, slice)| ChunkDescriptor {
            transfer_id: transfer_id.to_string(),
            chunk_index,
            total_chunks,
            bytes: slice.to_vec(),
            expected_bytes: slice.len(),
        })
        .collect()
}

/// Feed every descriptor into `store` and take the reassembled buffer.
/// Returns `Ok(None)` when the chunks did not cover the whole transfer.
pub fn reassemble<I>(store: &ChunkStore, chunks: I) -> Result<Option<Vec<u8>>>
where
    I: IntoIterator<Item = ChunkDescriptor>,
{
    let mut transfer_id = None;
    for chunk in chunks {
        store.accept_chunk(
            &chunk.transfer_id,
            chunk.chunk_index,
            chunk.total_chunks,
            chunk.bytes,
            Some(chunk.expected_bytes),
        )?;
        transfer_id.get_or_insert(chunk.transfer_id);
    }

    Ok(transfer_id.and_then(|id| store.consume(&id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 4), 0);
        assert_eq!(chunk_count(1, 4), 1);
        assert_eq!(chunk_count(8, 4), 2);
        assert_eq!(chunk_count(9, 4), 3);
    }

    #[test]
    fn test_encode_last_chunk_shorter() {
        let chunks = encode_with_id("t1", &pattern(10), 4);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.total_chunks == 3 && c.transfer_id == "t1"));
        assert_eq!(chunks[2].bytes.len(), 2);
        assert_eq!(chunks[2].expected_bytes, 2);
    }

    #[test]
    fn test_encode_empty_buffer() {
        assert!(encode(&[], 512).is_empty());
    }

    #[test]
    fn test_round_trip_various_sizes() {
        let store = ChunkStore::new(Duration::from_secs(60));
        for (len, size) in [(1, 1), (7, 3), (4096, 512), (4097, 512), (100, 1000)] {
            let buffer = pattern(len);
            let rebuilt = reassemble(&store, encode(&buffer, size)).unwrap();
            assert_eq!(rebuilt.as_deref(), Some(buffer.as_slice()), "len={} size={}", len, size);
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_six_mib_out_of_order() {
        let buffer = pattern(6 * 1024 * 1024);
        let chunks = encode_with_id("big", &buffer, 512 * 1024);
        assert_eq!(chunks.len(), 12);

        let store = ChunkStore::new(Duration::from_secs(60));
        let mut order: Vec<usize> = vec![0, 2, 1];
        order.extend(3..12);

        let mut last = None;
        for (n, &idx) in order.iter().enumerate() {
            let c = &chunks[idx];
            let ack = store
                .accept_chunk(&c.transfer_id, c.chunk_index, c.total_chunks, c.bytes.clone(), Some(c.expected_bytes))
                .unwrap();
            assert_eq!(ack.complete, n == 11);
            last = Some(ack);
        }

        let ack = last.unwrap();
        assert_eq!((ack.received, ack.total), (12, 12));
        assert_eq!(store.consume("big").unwrap(), buffer);
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let chunk = encode_with_id("t", b"hi", 16).remove(0);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["transferId"], "t");
        assert_eq!(json["chunkIndex"], 0);
        assert_eq!(json["totalChunks"], 1);
        assert_eq!(json["bytes"], "aGk=");
        assert_eq!(json["expectedBytes"], 2);
    }
}
