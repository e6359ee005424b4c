use crate::TransferError;
use crate::types::ChunkDescriptor;

/// Number of chunks for a file of `file_size` bytes.
///
/// An empty file still has one (zero-length) chunk so that chunk
/// numbering and finalization work the same way for every file.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }
    u32::try_from(file_size.div_ceil(chunk_size).max(1)).map_err(|_| TransferError::TooManyChunks {
        file_size,
        chunk_size,
    })
}

/// Partitions a file into ordered, contiguous chunks.
///
/// Every chunk but the last is exactly `chunk_size` bytes long.
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Result<Vec<ChunkDescriptor>, TransferError> {
    let total = total_chunks(file_size, chunk_size)?;
    let chunks = (1..=total)
        .map(|chunk_id| {
            let start = u64::from(chunk_id - 1) * chunk_size;
            let end = (start + chunk_size).min(file_size);
            ChunkDescriptor {
                chunk_id,
                start,
                end,
                total_chunks: total,
            }
        })
        .collect();
    Ok(chunks)
}
