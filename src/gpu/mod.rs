//! Graphics API seam
//!
//! The visibility buffer records GPU work through two traits: `GpuDevice`
//! for buffer lifetimes and `CommandRecorder` for command streams. A wgpu
//! implementation and an in-memory recording implementation are provided.

pub mod buffer_layouts;
pub mod commands;
pub mod device;
pub mod recording;
pub mod wgpu_backend;

pub use buffer_layouts::{
    initial_indirect_arguments, pack_face_count_geometry_set, unpack_face_count, unpack_geometry_set,
    FilterBatchData, FilterDispatchGroupData, IndirectDrawIndexArguments, PreSkinBatchData,
    PreSkinBufferOffsets, UncompactedDrawArguments, VisibilityBufferConstants,
    INDIRECT_DRAW_INDEX_ELEMENTS,
};
pub use commands::{
    BatchDataRange, BufferBarrier, CommandRecorder, ComputeStage, PassBinding, ResourceState,
};
pub use device::{BufferDesc, BufferId, BufferUsage, DeviceCapabilities, GpuDevice};
pub use recording::{RecordedBuffer, RecordedCommand, RecordingDevice, RecordingRecorder};
pub use wgpu_backend::{ComputePipelineSet, StagePipeline, WgpuDevice, WgpuRecorder};
