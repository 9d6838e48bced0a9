//! Chunking and reassembly of oversized messages (spec.md §4.A).
//!
//! A message that doesn't fit in `max_chunk_size` once framed is split
//! into several chunk messages sharing a fresh `message_id`; the
//! receiver buffers chunks by `message_id` until all arrive, then
//! reassembles the original payload.

use crate::error::{CoreError, CoreResult};
use crate::protocol::framing::encode_frame;
use crate::protocol::message::{MessageBuilder, Payload, ProtocolMessage};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// How long a partially-received chunk set is kept before being dropped,
/// guarding against the unbounded leak the original implementation had
/// (spec.md §9 "per-exchange chunk buffer leak on missing chunks").
pub const CHUNK_BUFFER_TTL_SECS: u64 = 5;

impl MessageBuilder {
    /// Split `message` into chunk frames no larger than `max_chunk_size`
    /// bytes each, or return `[message]` unchanged if it already fits.
    pub fn chunk_message(&mut self, message: &ProtocolMessage, max_chunk_size: usize) -> CoreResult<Vec<ProtocolMessage>> {
        if message.serialized_size() <= max_chunk_size {
            return Ok(vec![message.clone()]);
        }

        let payload_bytes = serde_json::to_vec(&message.payload).map_err(|e| CoreError::Decode(e.to_string()))?;
        let message_id = Uuid::new_v4().to_string();

        // Measure overhead via an empty-payload sample chunk, then carve
        // out a 50-byte safety margin and account for base64 expansion
        // (raw bytes are ~3/4 of the base64-encoded string length).
        let sample = ProtocolMessage {
            message_type: message.message_type.clone(),
            timestamp: message.timestamp,
            sequence_id: self.next_sequence_id(),
            payload: Payload::new(),
            source: message.source.clone(),
            target: message.target.clone(),
            message_id: Some(message_id.clone()),
            chunk_index: Some(0),
            total_chunks: Some(1),
            is_chunk: true,
        };
        let overhead = encode_frame(&sample).len();
        let available_payload_size = max_chunk_size as i64 - overhead as i64 - 50;
        let raw_chunk_size = (available_payload_size as f64 * 0.75) as i64 - 4;

        if raw_chunk_size <= 0 {
            return Err(CoreError::ChunkReassembly(
                "chunk size too small to fit ProtocolMessage overhead".into(),
            ));
        }
        let raw_chunk_size = raw_chunk_size as usize;

        let total_chunks = payload_bytes.len().div_ceil(raw_chunk_size) as u32;
        let mut chunks = Vec::with_capacity(total_chunks as usize);

        for (i, piece) in payload_bytes.chunks(raw_chunk_size).enumerate() {
            let mut payload = Payload::new();
            payload.insert("_chunk_data".into(), Value::from(BASE64.encode(piece)));
            payload.insert("_original_type".into(), Value::from(message.message_type.clone()));

            chunks.push(ProtocolMessage {
                message_type: message.message_type.clone(),
                timestamp: message.timestamp,
                sequence_id: self.next_sequence_id(),
                payload,
                source: message.source.clone(),
                target: message.target.clone(),
                message_id: Some(message_id.clone()),
                chunk_index: Some(i as u32),
                total_chunks: Some(total_chunks),
                is_chunk: true,
            });
        }

        Ok(chunks)
    }
}

/// One in-flight reassembly slot: a fixed-size array of chunk slots plus
/// the instant the first chunk for this `message_id` arrived.
struct PendingReassembly {
    slots: Vec<Option<ProtocolMessage>>,
    first_seen: Instant,
}

/// Per-receiver reassembly state, keyed by `message_id`. Entries older
/// than [`CHUNK_BUFFER_TTL_SECS`] are dropped by [`ChunkReassembler::sweep_expired`],
/// which callers should invoke periodically (the message exchange calls
/// it on every receive-loop iteration).
#[derive(Default)]
pub struct ChunkReassembler {
    pending: HashMap<String, PendingReassembly>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk in; returns `Some(reconstructed)` once every chunk
    /// slot for its `message_id` has arrived.
    pub fn accept(&mut self, chunk: ProtocolMessage) -> CoreResult<Option<ProtocolMessage>> {
        let message_id = chunk
            .message_id
            .clone()
            .ok_or_else(|| CoreError::ChunkReassembly("chunk missing message_id".into()))?;
        let total_chunks = chunk
            .total_chunks
            .ok_or_else(|| CoreError::ChunkReassembly("chunk missing total_chunks".into()))? as usize;
        let chunk_index = chunk
            .chunk_index
            .ok_or_else(|| CoreError::ChunkReassembly("chunk missing chunk_index".into()))? as usize;

        let entry = self.pending.entry(message_id.clone()).or_insert_with(|| PendingReassembly {
            slots: vec![None; total_chunks],
            first_seen: Instant::now(),
        });

        if entry.slots.len() != total_chunks {
            self.pending.remove(&message_id);
            return Err(CoreError::ChunkReassembly(format!(
                "mismatched total_chunks for message_id {message_id}"
            )));
        }
        if chunk_index >= entry.slots.len() {
            return Err(CoreError::ChunkReassembly(format!(
                "chunk_index {chunk_index} out of range for message_id {message_id}"
            )));
        }

        entry.slots[chunk_index] = Some(chunk);

        if entry.slots.iter().all(Option::is_some) {
            let entry = self.pending.remove(&message_id).expect("just inserted");
            let chunks: Vec<ProtocolMessage> = entry.slots.into_iter().map(|c| c.unwrap()).collect();
            Ok(Some(reconstruct(chunks)?))
        } else {
            Ok(None)
        }
    }

    /// Drop any reassembly buffers whose first chunk arrived longer ago
    /// than [`CHUNK_BUFFER_TTL_SECS`]. Returns the number dropped.
    pub fn sweep_expired(&mut self) -> usize {
        let ttl = std::time::Duration::from_secs(CHUNK_BUFFER_TTL_SECS);
        let before = self.pending.len();
        self.pending.retain(|_, v| v.first_seen.elapsed() < ttl);
        before - self.pending.len()
    }
}

/// Reconstruct a logical message from a complete, index-ordered-or-not
/// set of chunks (ordering is applied internally by sort key).
fn reconstruct(mut chunks: Vec<ProtocolMessage>) -> CoreResult<ProtocolMessage> {
    chunks.sort_by_key(|c| c.chunk_index.unwrap_or(0));

    let first = chunks.first().ok_or_else(|| CoreError::ChunkReassembly("no chunks".into()))?;
    let message_id = first.message_id.clone();

    let mut payload_bytes = Vec::new();
    for chunk in &chunks {
        if chunk.message_id != message_id {
            return Err(CoreError::ChunkReassembly("chunks have different message_id".into()));
        }
        let data = chunk
            .payload
            .get("_chunk_data")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::ChunkReassembly("chunk missing _chunk_data".into()))?;
        let bytes = BASE64
            .decode(data)
            .map_err(|e| CoreError::ChunkReassembly(format!("invalid base64 chunk data: {e}")))?;
        payload_bytes.extend_from_slice(&bytes);
    }

    let payload: Payload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| CoreError::ChunkReassembly(format!("invalid reassembled JSON: {e}")))?;

    let original_type = first
        .payload
        .get("_original_type")
        .and_then(Value::as_str)
        .unwrap_or(&first.message_type)
        .to_string();

    Ok(ProtocolMessage {
        message_type: original_type,
        timestamp: first.timestamp,
        sequence_id: first.sequence_id,
        payload,
        source: first.source.clone(),
        target: first.target.clone(),
        message_id: None,
        chunk_index: None,
        total_chunks: None,
        is_chunk: false,
    })
}
