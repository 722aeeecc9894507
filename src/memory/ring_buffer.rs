/// GPU Ring Buffer
///
/// Monotonic, wrap-around byte allocator over one GPU buffer. There is no
/// free operation: a region is reused once the cursor wraps around to it,
/// and frame pacing guarantees the GPU finished reading it by then.

use crate::error::{check_index, VisibilityError, VisibilityResult};
use crate::gpu::{BufferDesc, BufferId, BufferUsage, GpuDevice};
use crate::memory::round_up;

/// Region handed out by `GpuRingBuffer::allocate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingOffset {
    pub buffer: BufferId,
    pub offset: u64,
    /// Allocated bytes after rounding
    pub size: u64,
}

pub struct GpuRingBuffer {
    label: String,
    buffer: BufferId,
    capacity: u64,
    alignment: u64,
    current_offset: u64,
}

impl GpuRingBuffer {
    /// Bookkeeping over an existing buffer
    pub fn new(label: impl Into<String>, buffer: BufferId, capacity: u64, alignment: u64) -> Self {
        Self {
            label: label.into(),
            buffer,
            capacity,
            alignment: alignment.max(1),
            current_offset: 0,
        }
    }

    /// Creates the backing buffer on `device`
    pub fn create(
        device: &mut dyn GpuDevice,
        label: &str,
        capacity: u64,
        alignment: u64,
    ) -> VisibilityResult<Self> {
        let buffer = device.create_buffer(&BufferDesc::new(label, capacity, BufferUsage::BatchDataRing))?;
        log::debug!(
            "[GpuRingBuffer::create] '{}' {} bytes, alignment {}",
            label,
            capacity,
            alignment
        );
        Ok(Self::new(label, buffer, capacity, alignment))
    }

    /// Hands out `size` bytes aligned to `alignment` (or the buffer default).
    ///
    /// The cursor wraps to zero when the rounded request does not fit in the
    /// remaining space. A request larger than the whole buffer is an error.
    pub fn allocate(&mut self, size: u64, alignment: Option<u64>) -> VisibilityResult<RingOffset> {
        let alignment = alignment.unwrap_or(self.alignment).max(1);
        let aligned_size = round_up(size, alignment);

        if aligned_size > self.capacity {
            return Err(VisibilityError::RingBufferExhausted {
                buffer: self.label.clone(),
                requested: aligned_size,
                capacity: self.capacity,
            });
        }

        let mut offset = round_up(self.current_offset, alignment);
        if offset + aligned_size > self.capacity {
            log::trace!("[GpuRingBuffer::allocate] '{}' wrapped at offset {}", self.label, offset);
            offset = 0;
        }

        self.current_offset = offset + aligned_size;

        Ok(RingOffset {
            buffer: self.buffer,
            offset,
            size: aligned_size,
        })
    }

    /// Allocates from the slot of `frame_index` when the buffer is split into
    /// `num_frames` equal, alignment-rounded slots.
    ///
    /// The cursor is moved to the start of the slot first, so a frame never
    /// lands on the slot of another frame regardless of earlier requests.
    pub fn allocate_for_frame(
        &mut self,
        frame_index: u32,
        num_frames: u32,
        size: u64,
        alignment: Option<u64>,
    ) -> VisibilityResult<RingOffset> {
        check_index("frame", frame_index, num_frames)?;
        let alignment = alignment.unwrap_or(self.alignment).max(1);
        let slot_size = self.capacity / num_frames as u64 / alignment * alignment;

        let aligned_size = round_up(size, alignment);
        if aligned_size > slot_size {
            return Err(VisibilityError::RingBufferExhausted {
                buffer: format!("{} frame {}", self.label, frame_index),
                requested: aligned_size,
                capacity: slot_size,
            });
        }

        self.current_offset = frame_index as u64 * slot_size;
        self.allocate(size, Some(alignment))
    }

    /// Rewinds the cursor; only valid once the GPU is idle
    pub fn reset(&mut self) {
        self.current_offset = 0;
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) -> VisibilityResult<()> {
        device.destroy_buffer(self.buffer)
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: u64, alignment: u64) -> GpuRingBuffer {
        GpuRingBuffer::new("test ring", BufferId(0), capacity, alignment)
    }

    #[test]
    fn test_wraps_when_request_does_not_fit() {
        let mut ring = ring(1024, 256);
        let offsets: Vec<u64> = (0..3)
            .map(|_| ring.allocate(300, Some(256)).unwrap().offset)
            .collect();
        assert_eq!(offsets, vec![0, 512, 0]);
    }

    #[test]
    fn test_rounds_size_to_alignment() {
        let mut ring = ring(4096, 256);
        let first = ring.allocate(1, None).unwrap();
        assert_eq!(first.size, 256);
        assert_eq!(ring.current_offset(), 256);
    }

    #[test]
    fn test_offsets_stay_aligned_with_mixed_alignments() {
        let mut ring = ring(8192, 16);
        let requests = [(20, 16), (100, 256), (3, 64), (700, 512), (1, 16), (4000, 256), (17, 128)];

        for _ in 0..10 {
            for &(size, alignment) in &requests {
                let allocation = ring.allocate(size, Some(alignment)).unwrap();
                assert_eq!(allocation.offset % alignment, 0);
                assert!(allocation.offset + allocation.size <= ring.capacity());
            }
        }
    }

    #[test]
    fn test_cumulative_overflow_returns_zero() {
        let capacity = 1000;
        let mut ring = ring(capacity, 8);
        let mut since_wrap = 0;

        for size in [96u64, 200, 8, 400, 304, 128, 512, 8, 600] {
            let allocation = ring.allocate(size, None).unwrap();
            if since_wrap + allocation.size > capacity {
                assert_eq!(allocation.offset, 0);
                since_wrap = allocation.size;
            } else {
                assert_eq!(allocation.offset, since_wrap);
                since_wrap += allocation.size;
            }
        }
    }

    #[test]
    fn test_exact_fit_does_not_wrap() {
        let mut ring = ring(512, 256);
        assert_eq!(ring.allocate(256, None).unwrap().offset, 0);
        assert_eq!(ring.allocate(256, None).unwrap().offset, 256);
        assert_eq!(ring.allocate(256, None).unwrap().offset, 0);
    }

    #[test]
    fn test_request_larger_than_capacity_fails() {
        let mut ring = ring(1024, 256);
        match ring.allocate(1025, None) {
            Err(VisibilityError::RingBufferExhausted { requested, capacity, .. }) => {
                assert_eq!(requested, 1280);
                assert_eq!(capacity, 1024);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // Failed requests leave the cursor untouched
        assert_eq!(ring.current_offset(), 0);
    }

    #[test]
    fn test_frame_slots_ignore_earlier_requests() {
        // Two slots of 512 bytes
        let mut ring = ring(1024, 256);
        assert_eq!(ring.allocate_for_frame(0, 2, 300, None).unwrap().offset, 0);
        // A second request for frame 0 reuses frame 0's slot
        assert_eq!(ring.allocate_for_frame(0, 2, 300, None).unwrap().offset, 0);
        assert_eq!(ring.allocate_for_frame(1, 2, 512, None).unwrap().offset, 512);
        assert_eq!(ring.allocate_for_frame(0, 2, 10, None).unwrap().offset, 0);
    }

    #[test]
    fn test_frame_slot_limits() {
        let mut ring = ring(1024, 256);
        assert!(matches!(
            ring.allocate_for_frame(0, 2, 513, None),
            Err(VisibilityError::RingBufferExhausted { requested: 768, capacity: 512, .. })
        ));
        assert!(matches!(
            ring.allocate_for_frame(2, 2, 10, None),
            Err(VisibilityError::IndexOutOfRange { kind: "frame", .. })
        ));
    }

    #[test]
    fn test_reset_rewinds() {
        let mut ring = ring(1024, 256);
        ring.allocate(300, None).unwrap();
        ring.reset();
        assert_eq!(ring.allocate(10, None).unwrap().offset, 0);
    }
}
