//! Chunk planning: pure arithmetic, no I/O.

use sha2::{Digest, Sha256};

use crate::model::{ChunkTask, UploadSession};

/// Splits `file_size` bytes into `chunk_size` ranges. The last range is
/// clipped to the file end. An empty file yields no chunks.
pub fn plan_chunks(session_id: &str, file_size: u64, chunk_size: u64) -> Vec<ChunkTask> {
    if chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::with_capacity(expected_chunk_count(file_size, chunk_size));
    let mut offset = 0u64;
    let mut chunk_index = 0usize;

    while offset < file_size {
        let length = std::cmp::min(chunk_size, file_size - offset);
        chunks.push(ChunkTask {
            session_id: session_id.to_string(),
            chunk_index,
            offset,
            length,
        });
        offset += length;
        chunk_index += 1;
    }

    chunks
}

/// `ceil(file_size / chunk_size)`.
pub fn expected_chunk_count(file_size: u64, chunk_size: u64) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size) as usize
}

/// Chunks of `file_size` still owed to `session`.
pub fn pending_chunks(session: &UploadSession, file_size: u64) -> Vec<ChunkTask> {
    plan_chunks(session.session_id(), file_size, session.chunk_size())
        .into_iter()
        .filter(|c| c.chunk_index >= session.resume_from_chunk())
        .collect()
}

/// Hex SHA-256 of a chunk's bytes, sent alongside it so the server can
/// address and verify the block.
pub fn chunk_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
