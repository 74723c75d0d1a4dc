//! Message body chunking for the embedding pipeline.
//!
//! Each message yields 1..N chunks of at most [`CHUNK_SIZE`] characters with
//! [`CHUNK_OVERLAP`] characters of overlap between consecutive chunks. Chunk
//! ids are `<messageId>#<chunkIndex>`, which makes re-ingestion idempotent.

/// Maximum characters per chunk.
pub const CHUNK_SIZE: usize = 3_500;

/// Characters shared between consecutive chunks.
pub const CHUNK_OVERLAP: usize = 400;

/// Split `text` into overlapping character chunks. Empty input yields no
/// chunks (the caller skips the message entirely).
pub fn chunk_text(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= CHUNK_SIZE {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + CHUNK_SIZE).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end - CHUNK_OVERLAP;
    }
    chunks
}

/// Stable vector-record id for one chunk of a message.
pub fn chunk_id(message_id: &str, index: usize) -> String {
    format!("{message_id}#{index}")
}
