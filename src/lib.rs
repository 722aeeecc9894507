//! GPU-driven visibility buffer triangle filtering
//!
//! Filters the triangles of every drawable on the GPU once per frame, writes
//! the surviving indices to compacted index buffers and generates the
//! indirect draw arguments of the visibility buffer geometry pass.
//!
//! Commands are recorded through the `gpu::GpuDevice` and
//! `gpu::CommandRecorder` traits, implemented for wgpu and for an in-memory
//! recording backend.

pub mod config;
pub mod constants;
pub mod error;
pub mod gpu;
pub mod memory;
pub mod visibility;

pub use config::{VisibilityBufferConfig, VisibilitySettings};
pub use error::{VisibilityError, VisibilityResult};
pub use gpu::{CommandRecorder, DeviceCapabilities, GpuDevice, PassBinding};
pub use memory::{FramePacer, GpuRingBuffer};
pub use visibility::{
    FilterContainerDesc, FilterPassStats, FilterWorkload, PreSkinPassDesc, PreSkinStats, TriangleFilteringPassDesc,
    VisibilityBuffer,
};
