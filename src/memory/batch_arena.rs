/// Batch Arena
///
/// CPU staging for one frame's batch records. The encoder addresses records
/// by index instead of advancing a raw pointer, and every write is bounds
/// checked so a miscounted chunk can never spill into a neighbouring ring
/// buffer region.

use std::ops::Range;

use bytemuck::Pod;

pub struct BatchArena<T: Pod> {
    records: Vec<T>,
}

impl<T: Pod> BatchArena<T> {
    pub fn new(capacity: u32) -> Self {
        Self {
            records: vec![T::zeroed(); capacity as usize],
        }
    }

    pub fn capacity(&self) -> u32 {
        self.records.len() as u32
    }

    /// Stores `record` at `index`; panics when `index >= capacity`
    #[inline]
    pub fn write(&mut self, index: u32, record: T) {
        assert!(
            index < self.capacity(),
            "batch arena write at {} exceeds capacity {}",
            index,
            self.capacity()
        );
        self.records[index as usize] = record;
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.records.get(index as usize)
    }

    pub fn records(&self, range: Range<u32>) -> &[T] {
        &self.records[range.start as usize..range.end as usize]
    }

    /// Raw bytes of `range`, ready for upload
    pub fn as_bytes(&self, range: Range<u32>) -> &[u8] {
        bytemuck::cast_slice(self.records(range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::FilterBatchData;

    #[test]
    fn test_write_and_read_back() {
        let mut arena = BatchArena::<FilterBatchData>::new(4);
        arena.write(3, FilterBatchData { mesh_index: 7, ..Default::default() });

        assert_eq!(arena.get(3).map(|r| r.mesh_index), Some(7));
        assert_eq!(arena.as_bytes(2..4).len(), 64);
    }

    #[test]
    #[should_panic(expected = "exceeds capacity")]
    fn test_out_of_bounds_write_panics() {
        let mut arena = BatchArena::<FilterBatchData>::new(4);
        arena.write(4, FilterBatchData::default());
    }
}
