//! Chunked reads of the evidence with a trailing overlap, so that every
//! position inside a chunk's valid range sees a full window.

use crate::evidence::{EvidenceError, EvidenceSource, read_full};

#[derive(Debug, Clone)]
pub struct ScanChunk {
    pub id: u64,
    pub start: u64,
    pub length: u64,
    /// Positions in `[start, start + valid_length)` belong to this chunk; the
    /// rest of `data` is overlap for windows near the end.
    pub valid_length: u64,
    pub data: Vec<u8>,
}

impl ScanChunk {
    pub fn load(
        source: &dyn EvidenceSource,
        id: u64,
        start: u64,
        chunk_size: u64,
        overlap: u64,
    ) -> Result<Self, EvidenceError> {
        let (length, valid_length) = plan(source.len(), start, chunk_size, overlap);
        let mut data = vec![0u8; length as usize];
        let read = read_full(source, start, &mut data)?;
        data.truncate(read);
        Ok(Self {
            id,
            start,
            length: read as u64,
            valid_length: valid_length.min(read as u64),
            data,
        })
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset - self.start < self.valid_length
    }

    pub fn end(&self) -> u64 {
        self.start + self.valid_length
    }

    /// Up to `max_len` bytes starting at `offset`.
    pub fn window_at(&self, offset: u64, max_len: usize) -> &[u8] {
        let Some(rel) = offset.checked_sub(self.start) else {
            return &[];
        };
        let rel = (rel as usize).min(self.data.len());
        let end = rel.saturating_add(max_len).min(self.data.len());
        &self.data[rel..end]
    }
}

/// `(length, valid_length)` of a chunk starting at `start`.
pub fn plan(total_len: u64, start: u64, chunk_size: u64, overlap: u64) -> (u64, u64) {
    if start >= total_len || chunk_size == 0 {
        return (0, 0);
    }
    let remaining = total_len - start;
    let length = remaining.min(chunk_size.saturating_add(overlap));
    let valid_length = remaining.min(chunk_size);
    (length, valid_length)
}

/// Round `value` up to a multiple of `align`.
pub fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align).saturating_mul(align)
}
