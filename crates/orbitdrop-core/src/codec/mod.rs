//! Wire codec for the direct-channel transfer protocol.
//!
//! Two message shapes travel over a direct channel:
//!
//! - **Binary chunk frames** carrying payload bytes:
//!
//! ```text
//! ┌────────┬──────────────┬─────────────┬─────────────┬─────────────┐
//! │  0x01  │ fileId len N │ chunk index │   fileId    │   payload   │
//! │ 1 byte │  u16, BE     │  u32, BE    │  N bytes    │  remainder  │
//! └────────┴──────────────┴─────────────┴─────────────┴─────────────┘
//! ```
//!
//! - **Control messages** as a self-describing JSON envelope
//!   (`meta`, `ack`, `resume:request`, `resume:state`), sent as channel text.
//!
//! The codec also owns the chunk arithmetic shared by both transfer paths:
//! merging received chunk tables, building contiguous received ranges, and
//! computing the missing-index complement used by resume.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transfer::TransferKind;

/// Frame tag for a payload chunk.
pub const FRAME_TAG_CHUNK: u8 = 1;

/// Fixed part of the chunk frame header: tag + fileId length + index.
pub const FRAME_HEADER_SIZE: usize = 1 + 2 + 4;

/// Immutable descriptor of one transfer, announced before any chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMeta {
    /// Wire-level transfer id
    pub file_id: String,
    /// File name (synthetic for text payloads)
    pub name: String,
    /// Payload size in bytes
    pub size: u64,
    /// Declared MIME type
    pub mime: String,
    /// Number of chunks, at least 1 even for empty payloads
    pub total_chunks: u32,
    /// Chunk size used to slice the payload
    pub chunk_size: u32,
    /// Payload kind
    pub kind: TransferKind,
}

impl TransferMeta {
    /// Number of chunks needed for `size` bytes at `chunk_size`.
    ///
    /// Always at least 1, so a zero-length payload still moves as a single
    /// empty chunk and completes like any other transfer.
    #[must_use]
    pub fn chunk_count(size: u64, chunk_size: u32) -> u32 {
        if size == 0 {
            return 1;
        }
        let count = size.div_ceil(u64::from(chunk_size));
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

/// Control messages exchanged over the direct channel alongside chunk frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ControlMessage {
    /// Announce a new transfer; the receiver allocates state
    #[serde(rename = "meta")]
    Meta(TransferMeta),
    /// Confirm one chunk
    #[serde(rename = "ack")]
    Ack {
        /// Transfer id
        #[serde(rename = "fileId")]
        file_id: String,
        /// Confirmed chunk index
        index: u32,
    },
    /// Ask the receiver what it already has
    #[serde(rename = "resume:request")]
    ResumeRequest {
        /// Transfer id
        #[serde(rename = "fileId")]
        file_id: String,
    },
    /// Report contiguous received ranges, inclusive `[start, end]` pairs
    #[serde(rename = "resume:state")]
    ResumeState {
        /// Transfer id
        #[serde(rename = "fileId")]
        file_id: String,
        /// Contiguous received ranges
        ranges: Vec<(u32, u32)>,
    },
}

/// A decoded chunk frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Transfer id
    pub file_id: String,
    /// Chunk index
    pub index: u32,
    /// Chunk payload
    pub payload: Bytes,
}

/// Encode a chunk frame.
#[must_use]
pub fn encode_chunk(file_id: &str, index: u32, payload: &[u8]) -> Bytes {
    let id_bytes = file_id.as_bytes();
    debug_assert!(id_bytes.len() <= usize::from(u16::MAX));

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + id_bytes.len() + payload.len());
    buf.push(FRAME_TAG_CHUNK);
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(id_bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(&index.to_be_bytes());
    buf.extend_from_slice(id_bytes);
    buf.extend_from_slice(payload);
    Bytes::from(buf)
}

/// Decode a chunk frame.
///
/// # Errors
///
/// Returns an error for an unknown tag, a truncated header, or a fileId that
/// overruns the buffer or is not UTF-8. Callers treat any of these as a
/// malformed message and drop it.
pub fn decode_chunk(data: &[u8]) -> Result<ChunkFrame> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(Error::Protocol("chunk frame too short".to_string()));
    }
    if data[0] != FRAME_TAG_CHUNK {
        return Err(Error::Protocol(format!("unknown frame tag: {:#x}", data[0])));
    }

    let id_len = usize::from(u16::from_be_bytes([data[1], data[2]]));
    let index = u32::from_be_bytes([data[3], data[4], data[5], data[6]]);

    let id_end = FRAME_HEADER_SIZE + id_len;
    if data.len() < id_end {
        return Err(Error::Protocol("chunk frame fileId overruns buffer".to_string()));
    }

    let file_id = std::str::from_utf8(&data[FRAME_HEADER_SIZE..id_end])
        .map_err(|_| Error::Protocol("chunk frame fileId is not UTF-8".to_string()))?
        .to_string();

    Ok(ChunkFrame {
        file_id,
        index,
        payload: Bytes::copy_from_slice(&data[id_end..]),
    })
}

/// Concatenate a chunk table in index order, skipping absent entries.
#[must_use]
pub fn merge_chunks(chunks: &[Option<Bytes>]) -> Bytes {
    let total: usize = chunks
        .iter()
        .map(|chunk| chunk.as_ref().map_or(0, Bytes::len))
        .sum();

    let mut merged = Vec::with_capacity(total);
    for chunk in chunks.iter().flatten() {
        merged.extend_from_slice(chunk);
    }
    Bytes::from(merged)
}

/// Build the contiguous received ranges of a chunk table, as inclusive
/// `[start, end]` index pairs.
#[must_use]
pub fn received_ranges(chunks: &[Option<Bytes>]) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    let mut start: Option<u32> = None;

    for (i, chunk) in chunks.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let i = i as u32;
        match (chunk.is_some(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                ranges.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        #[allow(clippy::cast_possible_truncation)]
        ranges.push((s, chunks.len() as u32 - 1));
    }
    ranges
}

/// Compute the indices NOT covered by `ranges` out of `total` chunks, in
/// ascending order. Out-of-range entries in `ranges` are clamped.
#[must_use]
pub fn missing_indices(total: u32, ranges: &[(u32, u32)]) -> Vec<u32> {
    let mut received = vec![false; total as usize];
    for &(start, end) in ranges {
        for index in start..=end.min(total.saturating_sub(1)) {
            received[index as usize] = true;
        }
    }

    received
        .iter()
        .enumerate()
        .filter(|(_, seen)| !**seen)
        .map(|(index, _)| {
            #[allow(clippy::cast_possible_truncation)]
            {
                index as u32
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_frame_round_trip() {
        let payload = vec![7u8; 1000];
        let frame = encode_chunk("file-abc", 42, &payload);

        assert_eq!(frame[0], FRAME_TAG_CHUNK);
        // fileId length, big-endian
        assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 8);
        // index, big-endian
        assert_eq!(u32::from_be_bytes([frame[3], frame[4], frame[5], frame[6]]), 42);

        let decoded = decode_chunk(&frame).expect("decode");
        assert_eq!(decoded.file_id, "file-abc");
        assert_eq!(decoded.index, 42);
        assert_eq!(decoded.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = encode_chunk("f", 0, &[]);
        let decoded = decode_chunk(&frame).expect("decode");
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded.index, 0);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_chunk(&[]).is_err());
        assert!(decode_chunk(&[1, 0]).is_err());
        // wrong tag
        assert!(decode_chunk(&[2, 0, 1, 0, 0, 0, 0, b'x']).is_err());
        // fileId length overruns the buffer
        assert!(decode_chunk(&[1, 0, 9, 0, 0, 0, 0, b'x']).is_err());
        // fileId not UTF-8
        assert!(decode_chunk(&[1, 0, 1, 0, 0, 0, 0, 0xFF]).is_err());
    }

    #[test]
    fn test_chunk_count() {
        let chunk = 64 * 1024;
        assert_eq!(TransferMeta::chunk_count(0, chunk), 1);
        assert_eq!(TransferMeta::chunk_count(1, chunk), 1);
        assert_eq!(TransferMeta::chunk_count(u64::from(chunk), chunk), 1);
        assert_eq!(TransferMeta::chunk_count(u64::from(chunk) + 1, chunk), 2);
        assert_eq!(TransferMeta::chunk_count(200 * 1024, chunk), 4);
    }

    #[test]
    fn test_merge_chunks_skips_absent() {
        let chunks = vec![
            Some(Bytes::from_static(b"he")),
            None,
            Some(Bytes::from_static(b"llo")),
        ];
        assert_eq!(merge_chunks(&chunks).as_ref(), b"hello");
    }

    #[test]
    fn test_received_ranges() {
        let some = || Some(Bytes::new());

        assert_eq!(received_ranges(&[]), vec![]);
        assert_eq!(received_ranges(&[None, None]), vec![]);
        assert_eq!(received_ranges(&[some(), some()]), vec![(0, 1)]);

        // [0,4] and [7,9] filled out of 10
        let mut chunks = vec![None; 10];
        for i in 0..=4 {
            chunks[i] = some();
        }
        for i in 7..=9 {
            chunks[i] = some();
        }
        assert_eq!(received_ranges(&chunks), vec![(0, 4), (7, 9)]);
    }

    #[test]
    fn test_missing_indices_complement() {
        assert_eq!(missing_indices(10, &[(0, 4), (7, 9)]), vec![5, 6]);
        assert_eq!(missing_indices(4, &[(0, 1)]), vec![2, 3]);
        assert_eq!(missing_indices(3, &[]), vec![0, 1, 2]);
        assert_eq!(missing_indices(3, &[(0, 2)]), Vec::<u32>::new());
        // out-of-range report entries are clamped, not an error
        assert_eq!(missing_indices(3, &[(1, 9)]), vec![0]);
    }

    #[test]
    fn test_control_message_wire_shape() {
        let ack = ControlMessage::Ack {
            file_id: "f1".to_string(),
            index: 3,
        };
        let json = serde_json::to_string(&ack).unwrap();
        assert!(json.contains("\"type\":\"ack\""));
        assert!(json.contains("\"fileId\":\"f1\""));

        let state = ControlMessage::ResumeState {
            file_id: "f1".to_string(),
            ranges: vec![(0, 4), (7, 9)],
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"ranges\":[[0,4],[7,9]]"));

        let back: ControlMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_meta_round_trip() {
        let meta = TransferMeta {
            file_id: "f1".to_string(),
            name: "report.pdf".to_string(),
            size: 200 * 1024,
            mime: "application/pdf".to_string(),
            total_chunks: 4,
            chunk_size: 64 * 1024,
            kind: TransferKind::File,
        };

        let json = serde_json::to_string(&ControlMessage::Meta(meta.clone())).unwrap();
        assert!(json.contains("\"totalChunks\":4"));
        assert!(json.contains("\"chunkSize\":65536"));

        match serde_json::from_str::<ControlMessage>(&json).unwrap() {
            ControlMessage::Meta(back) => assert_eq!(back, meta),
            other => panic!("unexpected control message: {other:?}"),
        }
    }
}
