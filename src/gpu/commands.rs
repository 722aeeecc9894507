//! Command recording seam of the visibility buffer
//!
//! The passes record through `CommandRecorder`. Pipelines and descriptor sets
//! are owned by the renderer; the subsystem only selects them by stage and
//! by frame/buffer index.

use crate::error::VisibilityResult;
use crate::gpu::BufferId;

/// Compute stages recorded by the visibility buffer passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeStage {
    ClearBuffers,
    TriangleFiltering,
    BatchCompaction,
    PreSkinVertexes,
}

impl ComputeStage {
    pub fn label(&self) -> &'static str {
        match self {
            ComputeStage::ClearBuffers => "Clear Buffers",
            ComputeStage::TriangleFiltering => "Filter Triangles",
            ComputeStage::BatchCompaction => "Batch Compaction",
            ComputeStage::PreSkinVertexes => "Pre Skin Vertexes",
        }
    }
}

/// Descriptor set selection for a bound pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassBinding {
    /// CPU frame index (ring buffer region, dispatch group data)
    pub frame_index: u32,
    /// GPU-generated data index (filtered indices, draw arguments)
    pub buffers_index: u32,
}

/// Byte window of the ring buffer bound as the current batch data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchDataRange {
    pub buffer: BufferId,
    pub offset: u64,
    pub size: u64,
}

/// Logical buffer states used for barriers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    UnorderedAccess,
    ShaderResource,
    IndirectArgument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: BufferId,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl BufferBarrier {
    pub fn new(buffer: BufferId, before: ResourceState, after: ResourceState) -> Self {
        Self { buffer, before, after }
    }

    /// Orders two unordered-access stages on the same buffer
    pub fn uav(buffer: BufferId) -> Self {
        Self::new(buffer, ResourceState::UnorderedAccess, ResourceState::UnorderedAccess)
    }
}

/// Records GPU work for one command buffer
pub trait CommandRecorder {
    fn begin_marker(&mut self, label: &str);

    fn end_marker(&mut self);

    fn bind_pipeline(&mut self, stage: ComputeStage, binding: PassBinding) -> VisibilityResult<()>;

    /// Binds a ring buffer window as the batch data of the next dispatches
    fn bind_batch_data(&mut self, range: BatchDataRange) -> VisibilityResult<()>;

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> VisibilityResult<()>;

    fn buffer_barriers(&mut self, barriers: &[BufferBarrier]);

    fn reset_indirect_command_buffer(&mut self, buffer: BufferId, max_commands: u32) -> VisibilityResult<()>;

    /// Uploads CPU data ahead of the recorded work
    fn update_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> VisibilityResult<()>;
}
