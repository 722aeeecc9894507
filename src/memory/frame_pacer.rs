/// Frame Pacing
///
/// Tracks which frame slot (CPU-generated data) and which buffer slot
/// (GPU-generated data) the next frame records into, and the fence value
/// each frame slot was submitted with. Reusing a slot first waits for its
/// previous submission, which is what makes ring buffer wrap-around safe.

use crate::error::{check_index, VisibilityResult};
use crate::gpu::PassBinding;

pub struct FramePacer {
    num_frames: u32,
    num_buffers: u32,
    frame_index: u32,
    buffers_index: u32,
    submitted: Vec<Option<u64>>,
    next_fence_value: u64,
}

impl FramePacer {
    pub fn new(num_frames: u32, num_buffers: u32) -> Self {
        let num_frames = num_frames.max(1);
        Self {
            num_frames,
            num_buffers: num_buffers.max(1),
            frame_index: 0,
            buffers_index: 0,
            submitted: vec![None; num_frames as usize],
            next_fence_value: 1,
        }
    }

    /// Waits for the oldest submission using the current frame slot, then
    /// returns the indices to record with
    pub fn begin_frame<F>(&mut self, mut wait_for_fence: F) -> VisibilityResult<PassBinding>
    where
        F: FnMut(u64) -> VisibilityResult<()>,
    {
        check_index("frame", self.frame_index, self.num_frames)?;

        if let Some(fence_value) = self.submitted[self.frame_index as usize].take() {
            log::trace!(
                "[FramePacer::begin_frame] Waiting for fence {} (frame slot {})",
                fence_value,
                self.frame_index
            );
            wait_for_fence(fence_value)?;
        }

        Ok(self.binding())
    }

    /// Marks the current frame as submitted and advances both slots.
    /// Returns the fence value the caller must signal on submission.
    pub fn end_frame(&mut self) -> u64 {
        let fence_value = self.next_fence_value;
        self.next_fence_value += 1;
        self.submitted[self.frame_index as usize] = Some(fence_value);

        self.frame_index = (self.frame_index + 1) % self.num_frames;
        self.buffers_index = (self.buffers_index + 1) % self.num_buffers;
        fence_value
    }

    pub fn binding(&self) -> PassBinding {
        PassBinding {
            frame_index: self.frame_index,
            buffers_index: self.buffers_index,
        }
    }

    pub fn pending_fence(&self, frame_index: u32) -> Option<u64> {
        self.submitted.get(frame_index as usize).copied().flatten()
    }
}
