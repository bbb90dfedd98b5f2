//! Chunk codec: split an artifact into fixed-size chunks, track slots, reassemble.

use bytes::Bytes;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024; // 64 KiB

/// Number of chunks needed for `size` bytes: `ceil(size / chunk_size)`. Zero bytes need zero chunks.
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    let chunk_size = effective_chunk_size(chunk_size) as u64;
    size.div_ceil(chunk_size)
}

fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

/// Split an artifact into `(index, bytes)` chunks. Lazy; clone the iterator to restart it.
/// Chunk size 0 uses `DEFAULT_CHUNK_SIZE`.
pub fn split(data: Bytes, chunk_size: usize) -> Chunks {
    Chunks {
        data,
        chunk_size: effective_chunk_size(chunk_size),
        next: 0,
    }
}

/// Iterator over the chunks of one artifact. Slices share the artifact buffer.
#[derive(Debug, Clone)]
pub struct Chunks {
    data: Bytes,
    chunk_size: usize,
    next: u64,
}

impl Chunks {
    /// Total chunks in the artifact, regardless of how many were already yielded.
    pub fn total(&self) -> u64 {
        chunk_count(self.data.len() as u64, self.chunk_size)
    }

    /// Index of the chunk the next call to `next()` yields.
    pub fn position(&self) -> u64 {
        self.next
    }
}

impl Iterator for Chunks {
    type Item = (u32, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        // Indices past u32::MAX are not addressable on the wire.
        let index = u32::try_from(self.next).ok()?;
        let start = usize::try_from(self.next)
            .ok()?
            .checked_mul(self.chunk_size)?;
        if start >= self.data.len() {
            return None;
        }
        let end = start.saturating_add(self.chunk_size).min(self.data.len());
        self.next += 1;
        Some((index, self.data.slice(start..end)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self
            .total()
            .min(u64::from(u32::MAX) + 1)
            .saturating_sub(self.next);
        let left = usize::try_from(left).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Chunks {}

/// Index-addressed slot array for a file being received. Sized once from the declared chunk count.
#[derive(Debug, Clone)]
pub struct ChunkSlots {
    slots: Vec<Option<Vec<u8>>>,
    filled: usize,
}

/// What happened to a chunk offered to `ChunkSlots::insert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotInsert {
    /// Slot was empty and is now filled.
    Filled,
    /// Slot already held a chunk of `previous_len` bytes; it was overwritten.
    Replaced { previous_len: usize },
    /// Index outside `0..len`; chunk dropped.
    OutOfRange,
}

impl ChunkSlots {
    pub fn new(total_chunks: usize) -> Self {
        Self {
            slots: vec![None; total_chunks],
            filled: 0,
        }
    }

    /// Store a chunk at `index`. Duplicates overwrite; out-of-range indices are ignored.
    pub fn insert(&mut self, index: u32, data: Vec<u8>) -> SlotInsert {
        let Some(slot) = self.slots.get_mut(index as usize) else {
            return SlotInsert::OutOfRange;
        };
        match slot.replace(data) {
            Some(previous) => SlotInsert::Replaced {
                previous_len: previous.len(),
            },
            None => {
                self.filled += 1;
                SlotInsert::Filled
            }
        }
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// Concatenate every slot in index order. Fails if any slot is still empty.
    pub fn assemble(&self) -> Result<Vec<u8>, IncompleteAssembly> {
        assemble(&self.slots)
    }
}

/// Assembly found empty slots. Holds the count and the lowest missing index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{missing} of {total} chunks missing (first missing index {first_missing})")]
pub struct IncompleteAssembly {
    pub missing: usize,
    pub total: usize,
    pub first_missing: usize,
}

/// Concatenate slots strictly in index order into the complete artifact.
pub fn assemble(slots: &[Option<Vec<u8>>]) -> Result<Vec<u8>, IncompleteAssembly> {
    let missing = slots.iter().filter(|s| s.is_none()).count();
    if let Some(first_missing) = slots.iter().position(Option::is_none) {
        return Err(IncompleteAssembly {
            missing,
            total: slots.len(),
            first_missing,
        });
    }
    let len = slots.iter().flatten().map(Vec::len).sum();
    let mut out = Vec::with_capacity(len);
    for block in slots.iter().flatten() {
        out.extend_from_slice(block);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn artifact(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    fn reassemble(data: Bytes, chunk_size: usize) -> Vec<u8> {
        let chunks = split(data, chunk_size);
        let mut slots = ChunkSlots::new(chunks.total() as usize);
        for (i, block) in chunks {
            slots.insert(i, block.to_vec());
        }
        slots.assemble().unwrap()
    }

    #[test]
    fn split_150000_bytes_into_three() {
        let chunks: Vec<_> = split(artifact(150_000), 65_536).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].0, 0);
        assert_eq!(chunks[0].1.len(), 65_536);
        assert_eq!(chunks[1].1.len(), 65_536);
        assert_eq!(chunks[2].0, 2);
        assert_eq!(chunks[2].1.len(), 18_928);
        assert_eq!(chunk_count(150_000, 65_536), 3);
    }

    #[test]
    fn split_exact_multiple() {
        let chunks: Vec<_> = split(artifact(90), 30).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].1.len(), 30);
    }

    #[test]
    fn split_zero_length() {
        let chunks = split(Bytes::new(), 30);
        assert_eq!(chunks.total(), 0);
        assert_eq!(chunks.count(), 0);
        assert_eq!(reassemble(Bytes::new(), 30), Vec::<u8>::new());
    }

    #[test]
    fn split_zero_chunk_size_uses_default() {
        let chunks = split(artifact(DEFAULT_CHUNK_SIZE * 2 + 1), 0);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn split_is_restartable() {
        let mut chunks = split(artifact(100), 30);
        let fresh = chunks.clone();
        chunks.next();
        chunks.next();
        assert_eq!(chunks.position(), 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(fresh.count(), 4);
    }

    #[test]
    fn reassemble_any_size_and_chunk_size() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..40 {
            let len = rng.gen_range(0..5_000);
            let chunk_size = rng.gen_range(1..700);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            assert_eq!(reassemble(Bytes::from(data.clone()), chunk_size), data);
        }
        assert_eq!(reassemble(artifact(1), 1), artifact(1).to_vec());
    }

    #[test]
    fn shuffled_delivery_matches_in_order() {
        let data = artifact(10_000);
        let mut chunks: Vec<_> = split(data.clone(), 333).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        chunks.shuffle(&mut rng);
        let mut slots = ChunkSlots::new(chunks.len());
        for (i, block) in chunks {
            assert_eq!(slots.insert(i, block.to_vec()), SlotInsert::Filled);
        }
        assert!(slots.is_full());
        assert_eq!(slots.assemble().unwrap(), data.to_vec());
    }

    #[test]
    fn duplicate_chunk_overwrites() {
        let mut slots = ChunkSlots::new(2);
        assert_eq!(slots.insert(0, vec![1, 2, 3]), SlotInsert::Filled);
        assert_eq!(
            slots.insert(0, vec![1, 2, 3]),
            SlotInsert::Replaced { previous_len: 3 }
        );
        assert_eq!(slots.filled(), 1);
        assert!(!slots.is_full());
    }

    #[test]
    fn out_of_range_index_ignored() {
        let mut slots = ChunkSlots::new(2);
        assert_eq!(slots.insert(2, vec![0]), SlotInsert::OutOfRange);
        assert_eq!(slots.filled(), 0);
    }

    #[test]
    fn assemble_reports_missing_slots() {
        let mut slots = ChunkSlots::new(3);
        slots.insert(0, vec![0]);
        slots.insert(2, vec![2]);
        let err = slots.assemble().unwrap_err();
        assert_eq!(
            err,
            IncompleteAssembly {
                missing: 1,
                total: 3,
                first_missing: 1
            }
        );
    }
}
