//! Dispatch chunking of batch records
//!
//! Records are staged into a per-frame region of the batch data ring buffer.
//! The region is cut into chunks of at most `max_records_per_dispatch`
//! records; each chunk is bound as one uniform window and consumed by one
//! dispatch with one thread group per record.

use bytemuck::Pod;

use crate::error::{config_error, VisibilityError, VisibilityResult};
use crate::gpu::{BatchDataRange, CommandRecorder, ComputeStage};
use crate::memory::{round_up_u32, BatchArena, RingOffset};

/// Geometry of one frame's batch data region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Bytes per record
    pub record_stride: u64,

    /// Records consumed by one dispatch
    pub max_records_per_dispatch: u32,

    /// Records per uniform offset alignment; chunk starts are multiples of it
    pub align_records: u32,

    /// Record distance between two full chunks
    pub chunk_stride_records: u32,

    /// Chunks that fit in one frame's region
    pub num_chunks: u32,
}

impl ChunkLayout {
    pub fn new(
        record_stride: u64,
        max_records_per_dispatch: u32,
        num_chunks: u32,
        uniform_alignment: u64,
    ) -> VisibilityResult<Self> {
        if record_stride == 0 || max_records_per_dispatch == 0 || num_chunks == 0 {
            return Err(config_error(format!(
                "chunk layout needs a positive stride, chunk size and chunk count (got {}, {}, {})",
                record_stride, max_records_per_dispatch, num_chunks
            )));
        }

        let uniform_alignment = uniform_alignment.max(1);
        let align_records = if uniform_alignment >= record_stride {
            if uniform_alignment % record_stride != 0 {
                return Err(config_error(format!(
                    "record stride {} does not divide the uniform alignment {}",
                    record_stride, uniform_alignment
                )));
            }
            (uniform_alignment / record_stride) as u32
        } else {
            if record_stride % uniform_alignment != 0 {
                return Err(config_error(format!(
                    "uniform alignment {} does not divide the record stride {}",
                    uniform_alignment, record_stride
                )));
            }
            1
        };

        Ok(Self {
            record_stride,
            max_records_per_dispatch,
            align_records,
            chunk_stride_records: round_up_u32(max_records_per_dispatch, align_records),
            num_chunks,
        })
    }

    /// Records addressable in one frame's region
    pub fn region_records(&self) -> u32 {
        self.num_chunks * self.chunk_stride_records
    }

    pub fn region_bytes(&self) -> u64 {
        self.region_records() as u64 * self.record_stride
    }

    /// Size of the uniform window bound for one dispatch
    pub fn window_bytes(&self) -> u64 {
        self.max_records_per_dispatch as u64 * self.record_stride
    }
}

/// What a finished chunker recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkerSummary {
    pub dispatches: u32,
    pub records: u32,
}

/// Accumulates records into chunks and records one dispatch per chunk
pub struct DispatchChunker<'a, T: Pod> {
    arena: &'a mut BatchArena<T>,
    layout: ChunkLayout,
    region: RingOffset,
    stage: ComputeStage,

    /// First record of the open chunk
    chunk_base: u32,
    /// Records in the open chunk
    current_count: u32,

    dispatches: u32,
    records: u32,
}

impl<'a, T: Pod> DispatchChunker<'a, T> {
    /// `region` is this frame's ring buffer allocation of
    /// `layout.region_bytes()` bytes
    pub fn new(
        arena: &'a mut BatchArena<T>,
        layout: ChunkLayout,
        region: RingOffset,
        stage: ComputeStage,
    ) -> VisibilityResult<Self> {
        if arena.capacity() < layout.region_records() || region.size < layout.region_bytes() {
            return Err(VisibilityError::BatchCapacityExceeded {
                stage: stage.label().to_string(),
                requested: layout.region_records(),
                capacity: arena.capacity().min((region.size / layout.record_stride) as u32),
            });
        }

        Ok(Self {
            arena,
            layout,
            region,
            stage,
            chunk_base: 0,
            current_count: 0,
            dispatches: 0,
            records: 0,
        })
    }

    /// Records in the open chunk
    pub fn current_count(&self) -> u32 {
        self.current_count
    }

    pub fn is_full(&self) -> bool {
        self.current_count >= self.layout.max_records_per_dispatch
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Appends a record to the open chunk; returns true when the chunk is
    /// full and must be flushed before the next append
    pub fn append(&mut self, record: T) -> VisibilityResult<bool> {
        if self.is_full() {
            return Err(VisibilityError::BatchCapacityExceeded {
                stage: self.stage.label().to_string(),
                requested: self.current_count + 1,
                capacity: self.layout.max_records_per_dispatch,
            });
        }

        // A chunk may only be opened when a full window fits in the region
        if self.current_count == 0
            && self.chunk_base + self.layout.max_records_per_dispatch > self.layout.region_records()
        {
            return Err(VisibilityError::BatchCapacityExceeded {
                stage: self.stage.label().to_string(),
                requested: self.chunk_base + self.layout.max_records_per_dispatch,
                capacity: self.layout.region_records(),
            });
        }

        self.arena.write(self.chunk_base + self.current_count, record);
        self.current_count += 1;
        self.records += 1;

        Ok(self.is_full())
    }

    /// Uploads and dispatches the open chunk. Returns the flushed record
    /// count; an empty chunk records nothing.
    pub fn flush(&mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<u32> {
        let count = self.current_count;
        if count == 0 {
            return Ok(0);
        }

        let stride = self.layout.record_stride;
        let offset = self.region.offset + self.chunk_base as u64 * stride;

        cmd.update_buffer(
            self.region.buffer,
            offset,
            self.arena.as_bytes(self.chunk_base..self.chunk_base + count),
        )?;
        cmd.bind_batch_data(BatchDataRange {
            buffer: self.region.buffer,
            offset,
            size: self.layout.window_bytes(),
        })?;
        cmd.dispatch(count, 1, 1)?;

        log::trace!(
            "[DispatchChunker::flush] {} records at offset {} ({})",
            count,
            offset,
            self.stage.label()
        );

        self.chunk_base += round_up_u32(count, self.layout.align_records);
        self.current_count = 0;
        self.dispatches += 1;

        Ok(count)
    }

    /// Flushes the trailing partial chunk
    pub fn finish(mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<ChunkerSummary> {
        self.flush(cmd)?;
        Ok(ChunkerSummary {
            dispatches: self.dispatches,
            records: self.records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{BufferId, FilterBatchData, RecordingRecorder};

    fn layout(max_records: u32, num_chunks: u32) -> ChunkLayout {
        ChunkLayout::new(32, max_records, num_chunks, 256).unwrap()
    }

    fn region(layout: &ChunkLayout, offset: u64) -> RingOffset {
        RingOffset {
            buffer: BufferId(1),
            offset,
            size: layout.region_bytes(),
        }
    }

    #[test]
    fn test_layout_alignment() {
        let layout = layout(5, 4);
        assert_eq!(layout.align_records, 8);
        assert_eq!(layout.chunk_stride_records, 8);
        assert_eq!(layout.region_records(), 32);
        assert_eq!(layout.window_bytes(), 160);

        // Strides larger than the alignment need no padding records
        let wide = ChunkLayout::new(512, 3, 2, 256).unwrap();
        assert_eq!(wide.align_records, 1);
        assert_eq!(wide.chunk_stride_records, 3);

        assert!(ChunkLayout::new(24, 4, 2, 256).is_err());
        assert!(ChunkLayout::new(32, 0, 2, 256).is_err());
    }

    #[test]
    fn test_chunk_offsets_are_uniform_aligned() {
        let layout = layout(4, 8);
        let mut arena = BatchArena::<FilterBatchData>::new(layout.region_records());
        let mut cmd = RecordingRecorder::new();
        cmd.bind_pipeline(ComputeStage::TriangleFiltering, Default::default()).unwrap();

        let mut chunker =
            DispatchChunker::new(&mut arena, layout, region(&layout, 512), ComputeStage::TriangleFiltering).unwrap();

        for flush_after in [3, 4, 1] {
            for _ in 0..flush_after {
                chunker.append(FilterBatchData::default()).unwrap();
            }
            chunker.flush(&mut cmd).unwrap();
        }
        let summary = chunker.finish(&mut cmd).unwrap();
        assert_eq!(summary, ChunkerSummary { dispatches: 3, records: 8 });

        let dispatches = cmd.dispatches(ComputeStage::TriangleFiltering);
        let groups: Vec<u32> = dispatches.iter().map(|(groups, _)| groups[0]).collect();
        assert_eq!(groups, vec![3, 4, 1]);

        for (_, window) in &dispatches {
            let window = window.unwrap();
            assert_eq!(window.offset % 256, 0);
            assert_eq!(window.size, 4 * 32);
        }
    }

    #[test]
    fn test_full_chunk_reported_and_enforced() {
        let layout = layout(2, 4);
        let mut arena = BatchArena::<FilterBatchData>::new(layout.region_records());
        let mut chunker =
            DispatchChunker::new(&mut arena, layout, region(&layout, 0), ComputeStage::TriangleFiltering).unwrap();

        assert!(!chunker.append(FilterBatchData::default()).unwrap());
        assert!(chunker.append(FilterBatchData::default()).unwrap());
        assert!(chunker.append(FilterBatchData::default()).is_err());
    }

    #[test]
    fn test_region_exhaustion_is_an_error() {
        let layout = layout(8, 2);
        let mut arena = BatchArena::<FilterBatchData>::new(layout.region_records());
        let mut cmd = RecordingRecorder::new();
        let mut chunker =
            DispatchChunker::new(&mut arena, layout, region(&layout, 0), ComputeStage::TriangleFiltering).unwrap();

        for _ in 0..2 {
            chunker.append(FilterBatchData::default()).unwrap();
            chunker.flush(&mut cmd).unwrap();
        }

        assert!(matches!(
            chunker.append(FilterBatchData::default()),
            Err(VisibilityError::BatchCapacityExceeded { requested: 24, capacity: 16, .. })
        ));
    }

    #[test]
    fn test_empty_flush_records_nothing() {
        let layout = layout(4, 2);
        let mut arena = BatchArena::<FilterBatchData>::new(layout.region_records());
        let mut cmd = RecordingRecorder::new();
        let chunker =
            DispatchChunker::new(&mut arena, layout, region(&layout, 0), ComputeStage::TriangleFiltering).unwrap();

        assert_eq!(chunker.finish(&mut cmd).unwrap().dispatches, 0);
        assert!(cmd.commands.is_empty());
    }

    #[test]
    fn test_uploads_match_dispatched_window() {
        let layout = layout(4, 2);
        let mut arena = BatchArena::<FilterBatchData>::new(layout.region_records());
        let mut cmd = RecordingRecorder::new();
        let mut chunker =
            DispatchChunker::new(&mut arena, layout, region(&layout, 256), ComputeStage::TriangleFiltering).unwrap();

        for mesh_index in 0..3 {
            chunker
                .append(FilterBatchData { mesh_index, ..Default::default() })
                .unwrap();
        }
        chunker.finish(&mut cmd).unwrap();

        let uploaded = cmd.uploaded_records::<FilterBatchData>(BufferId(1), 256, 3);
        let meshes: Vec<u32> = uploaded.iter().map(|r| r.mesh_index).collect();
        assert_eq!(meshes, vec![0, 1, 2]);
    }
}
