//! Device-side seam of the visibility buffer
//!
//! The subsystem never talks to a graphics API directly. Buffers are created
//! through `GpuDevice` and referred to by `BufferId` afterwards.

use crate::constants::layout::UNIFORM_BUFFER_ALIGNMENT;
use crate::error::VisibilityResult;

/// Opaque handle to a buffer owned by a `GpuDevice`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Buffer usage patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Ring buffer of batch data bound as uniform windows
    BatchDataRing,
    /// Small uniform constants written once
    Uniform,
    /// CPU-written storage data read by compute shaders
    StorageUpload,
    /// GPU-only storage written and read by compute shaders
    Storage,
    /// Indirect draw arguments written by compute shaders
    IndirectArguments,
    /// Index buffer written by compute shaders
    FilteredIndices,
    /// Vertex buffer also written by compute shaders
    VertexStorage,
}

impl BufferUsage {
    pub fn to_wgpu_usage(&self) -> wgpu::BufferUsages {
        match self {
            BufferUsage::BatchDataRing => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUsage::StorageUpload => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Storage => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferUsage::IndirectArguments => {
                wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
            }
            BufferUsage::FilteredIndices => {
                wgpu::BufferUsages::INDEX | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
            }
            BufferUsage::VertexStorage => {
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
            }
        }
    }
}

/// Creation parameters of one buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn new(label: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: label.into(),
            size,
            usage,
        }
    }
}

/// Backend features the encoding strategy depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Required alignment of uniform buffer binding offsets
    pub uniform_buffer_alignment: u64,

    /// Indirect command buffers (encoded draw commands) are available
    pub indirect_command_buffer: bool,

    /// Indirect draws can set a root constant per draw
    pub indirect_root_constant: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            uniform_buffer_alignment: UNIFORM_BUFFER_ALIGNMENT,
            indirect_command_buffer: false,
            indirect_root_constant: false,
        }
    }
}

/// Buffer lifetime management
pub trait GpuDevice {
    fn capabilities(&self) -> DeviceCapabilities;

    fn create_buffer(&mut self, desc: &BufferDesc) -> VisibilityResult<BufferId>;

    /// Immediate upload, used for initial contents
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> VisibilityResult<()>;

    /// Releases the buffer; may wait for the GPU to stop using it
    fn destroy_buffer(&mut self, buffer: BufferId) -> VisibilityResult<()>;
}
