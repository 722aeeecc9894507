//! Vertex pre-skinning pass and its aliased output buffers
//!
//! Skinned vertices are written by a compute pass (possibly on the async
//! compute queue) into the tail of the main vertex buffers. The tail is
//! partitioned per buffer index so the pass can write frame N while the
//! graphics queue still reads frame N-1.

use std::ops::Range;

use crate::config::VisibilitySettings;
use crate::constants::layout::{PRE_SKIN_NORMAL_STRIDE, PRE_SKIN_POSITION_STRIDE};
use crate::constants::limits::MAX_NUM_BUFFERS;
use crate::error::{check_index, config_error, VisibilityError, VisibilityResult};
use crate::gpu::{
    BufferBarrier, BufferDesc, BufferId, BufferUsage, CommandRecorder, ComputeStage, GpuDevice, PassBinding,
    PreSkinBatchData, PreSkinBufferOffsets, ResourceState,
};
use crate::memory::{AliasedRegion, BatchArena, GpuRingBuffer, ViewAccess};
use crate::visibility::chunker::{ChunkLayout, DispatchChunker};

/// Vertex range of one skinned mesh instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreSkinContainer {
    pub vertex_count: u32,

    /// First output vertex, absolute in the pre-skinned vertex buffers
    pub output_vertex_offset: u32,

    pub vertex_position_offset: u32,
    pub joint_offset: u32,
    pub joint_matrix_offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PreSkinPassDesc<'a> {
    pub binding: PassBinding,
    pub containers: &'a [PreSkinContainer],

    /// When set, every output range is checked against the writable region
    /// of `binding.buffers_index` and the outputs are transitioned for reading
    pub output: Option<&'a PreSkinVertexBuffers>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreSkinStats {
    pub total_vertex_batches: u32,
    pub total_vertexes: u32,
    pub total_shader_dispatches: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreSkinPassState {
    Idle,
    SkinDispatches,
    OutputBarrier,
}

impl PreSkinPassState {
    pub fn next(self) -> Self {
        match self {
            PreSkinPassState::Idle => PreSkinPassState::SkinDispatches,
            PreSkinPassState::SkinDispatches => PreSkinPassState::OutputBarrier,
            PreSkinPassState::OutputBarrier => PreSkinPassState::Idle,
        }
    }
}

pub struct PreSkinVertexesPass<'a> {
    state: PreSkinPassState,
    started: bool,

    settings: &'a VisibilitySettings,
    layout: ChunkLayout,
    ring: &'a mut GpuRingBuffer,
    arena: &'a mut BatchArena<PreSkinBatchData>,

    binding: PassBinding,
    containers: &'a [PreSkinContainer],
    output: Option<&'a PreSkinVertexBuffers>,

    stats: PreSkinStats,
}

impl<'a> PreSkinVertexesPass<'a> {
    pub(crate) fn new(
        settings: &'a VisibilitySettings,
        ring: &'a mut GpuRingBuffer,
        arena: &'a mut BatchArena<PreSkinBatchData>,
        desc: &PreSkinPassDesc<'a>,
    ) -> VisibilityResult<Self> {
        let layout = settings.pre_skin_layout.ok_or(VisibilityError::PreSkinDisabled)?;
        let config = settings.config();
        check_index("frame", desc.binding.frame_index, config.num_frames)?;
        check_index("buffer", desc.binding.buffers_index, config.num_buffers)?;

        Ok(Self {
            state: PreSkinPassState::Idle,
            started: false,
            settings,
            layout,
            ring,
            arena,
            binding: desc.binding,
            containers: desc.containers,
            output: desc.output,
            stats: PreSkinStats::default(),
        })
    }

    pub fn state(&self) -> PreSkinPassState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.started && self.state == PreSkinPassState::Idle
    }

    pub fn advance(&mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<PreSkinPassState> {
        if self.is_complete() {
            return Ok(self.state);
        }

        match self.state {
            PreSkinPassState::Idle => {
                self.started = true;
                cmd.begin_marker(ComputeStage::PreSkinVertexes.label());
            }
            PreSkinPassState::SkinDispatches => self.skin_dispatches(cmd)?,
            PreSkinPassState::OutputBarrier => {
                self.output_barrier(cmd);
                cmd.end_marker();
            }
        }

        self.state = self.state.next();
        Ok(self.state)
    }

    pub fn run(mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<PreSkinStats> {
        while !self.is_complete() {
            self.advance(cmd)?;
        }

        log::debug!(
            "[PreSkinVertexesPass::run] {} vertexes in {} batches, {} dispatches",
            self.stats.total_vertexes,
            self.stats.total_vertex_batches,
            self.stats.total_shader_dispatches
        );
        Ok(self.stats)
    }

    fn skin_dispatches(&mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<()> {
        if self.containers.is_empty() {
            return Ok(());
        }

        if let Some(output) = self.output {
            for container in self.containers.iter().filter(|c| c.vertex_count > 0) {
                let first = container.output_vertex_offset;
                output.check_output(self.binding.buffers_index, first..first + container.vertex_count)?;
            }
        }

        let batch_size = self.settings.config().pre_skin_batch_size;
        let region = self.ring.allocate_for_frame(
            self.binding.frame_index,
            self.settings.config().num_frames,
            self.layout.region_bytes(),
            Some(self.settings.uniform_buffer_alignment),
        )?;

        cmd.bind_pipeline(ComputeStage::PreSkinVertexes, self.binding)?;
        let mut chunker = DispatchChunker::new(self.arena, self.layout, region, ComputeStage::PreSkinVertexes)?;

        for container in self.containers {
            for first_vertex in (0..container.vertex_count).step_by(batch_size as usize) {
                let vertex_count = batch_size.min(container.vertex_count - first_vertex);

                let full = chunker.append(PreSkinBatchData {
                    output_vertex_offset: container.output_vertex_offset + first_vertex,
                    vertex_count,
                    vertex_position_offset: container.vertex_position_offset + first_vertex,
                    vertex_joints_offset: container.joint_offset + first_vertex,
                    joint_matrix_offset: container.joint_matrix_offset,
                    _pad: [0; 3],
                })?;

                self.stats.total_vertex_batches += 1;
                self.stats.total_vertexes += vertex_count;

                if full {
                    chunker.flush(cmd)?;
                }
            }
        }

        self.stats.total_shader_dispatches = chunker.finish(cmd)?.dispatches;
        Ok(())
    }

    fn output_barrier(&mut self, cmd: &mut dyn CommandRecorder) {
        if let Some(output) = self.output {
            cmd.buffer_barriers(&[
                BufferBarrier::new(output.positions.buffer, ResourceState::UnorderedAccess, ResourceState::ShaderResource),
                BufferBarrier::new(output.normals.buffer, ResourceState::UnorderedAccess, ResourceState::ShaderResource),
            ]);
        }
    }
}

/// Sizing of the pre-skinned vertex buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreSkinVertexBuffersDesc {
    pub num_buffers: u32,
    pub max_static_vertex_count: u32,
    pub max_pre_skinned_vertex_count_per_frame: u32,
}

/// One vertex attribute: static vertices followed by one skinned output
/// region per buffer index
#[derive(Debug, Clone)]
pub struct PreSkinAttributeBuffer {
    pub buffer: BufferId,
    pub stride: u64,
    pub region: AliasedRegion,
}

impl PreSkinAttributeBuffer {
    fn create(
        device: &mut dyn GpuDevice,
        desc: &PreSkinVertexBuffersDesc,
        stride: u64,
        label: &str,
    ) -> VisibilityResult<Self> {
        let static_vertices = desc.max_static_vertex_count as u64;
        let per_frame = desc.max_pre_skinned_vertex_count_per_frame as u64;
        let size = (static_vertices + per_frame * desc.num_buffers as u64) * stride;

        let mut region = AliasedRegion::new(label, size);
        region.add_view(format!("{} static", label), 0..static_vertices * stride, ViewAccess::Static)?;
        for i in 0..desc.num_buffers {
            let start = (static_vertices + per_frame * i as u64) * stride;
            region.add_view(
                format!("{} buffer {}", label, i),
                start..start + per_frame * stride,
                ViewAccess::PerBuffer(i),
            )?;
        }

        let buffer = device.create_buffer(&BufferDesc::new(label, size, BufferUsage::VertexStorage))?;
        Ok(Self { buffer, stride, region })
    }

    /// Writable byte range of `buffers_index`
    pub fn output_range(&self, buffers_index: u32) -> Option<Range<u64>> {
        self.region.per_buffer_view(buffers_index).map(|view| view.range.clone())
    }
}

/// Position and normal buffers shared by static and pre-skinned vertices
#[derive(Debug, Clone)]
pub struct PreSkinVertexBuffers {
    desc: PreSkinVertexBuffersDesc,
    pub positions: PreSkinAttributeBuffer,
    pub normals: PreSkinAttributeBuffer,

    /// `PreSkinBufferOffsets` uniform of each buffer index
    pub shader_offsets: Vec<BufferId>,
}

impl PreSkinVertexBuffers {
    pub fn create(device: &mut dyn GpuDevice, desc: PreSkinVertexBuffersDesc) -> VisibilityResult<Self> {
        if desc.num_buffers == 0 || desc.num_buffers > MAX_NUM_BUFFERS {
            return Err(config_error(format!(
                "pre-skin buffer count {} is outside [1, {}]",
                desc.num_buffers, MAX_NUM_BUFFERS
            )));
        }
        if desc.max_static_vertex_count == 0 || desc.max_pre_skinned_vertex_count_per_frame == 0 {
            return Err(config_error("pre-skin vertex buffers need positive vertex counts"));
        }

        let total_vertices = desc.max_static_vertex_count as u64
            + desc.max_pre_skinned_vertex_count_per_frame as u64 * desc.num_buffers as u64;
        if total_vertices > u32::MAX as u64 {
            return Err(config_error(format!("{} vertices overflow 32-bit vertex offsets", total_vertices)));
        }

        let positions = PreSkinAttributeBuffer::create(device, &desc, PRE_SKIN_POSITION_STRIDE, "Pre Skin Positions")?;
        let normals = PreSkinAttributeBuffer::create(device, &desc, PRE_SKIN_NORMAL_STRIDE, "Pre Skin Normals")?;

        let mut shader_offsets = Vec::with_capacity(desc.num_buffers as usize);
        for i in 0..desc.num_buffers {
            let offsets = PreSkinBufferOffsets {
                vertex_offset: desc.max_static_vertex_count + desc.max_pre_skinned_vertex_count_per_frame * i,
                _pad: [0; 3],
            };
            let buffer = device.create_buffer(&BufferDesc::new(
                format!("Pre Skin Buffer Offsets {}", i),
                std::mem::size_of::<PreSkinBufferOffsets>() as u64,
                BufferUsage::Uniform,
            ))?;
            device.write_buffer(buffer, 0, bytemuck::bytes_of(&offsets))?;
            shader_offsets.push(buffer);
        }

        log::info!(
            "[PreSkinVertexBuffers::create] {} static + {} x {} skinned vertices",
            desc.max_static_vertex_count,
            desc.num_buffers,
            desc.max_pre_skinned_vertex_count_per_frame
        );

        Ok(Self {
            desc,
            positions,
            normals,
            shader_offsets,
        })
    }

    pub fn destroy(self, device: &mut dyn GpuDevice) -> VisibilityResult<()> {
        for buffer in self.shader_offsets.into_iter().rev() {
            device.destroy_buffer(buffer)?;
        }
        device.destroy_buffer(self.normals.buffer)?;
        device.destroy_buffer(self.positions.buffer)
    }

    pub fn desc(&self) -> &PreSkinVertexBuffersDesc {
        &self.desc
    }

    /// First vertex of the skinned output region of `buffers_index`
    pub fn vertex_offset(&self, buffers_index: u32) -> VisibilityResult<u32> {
        check_index("buffer", buffers_index, self.desc.num_buffers)?;
        Ok(self.desc.max_static_vertex_count + self.desc.max_pre_skinned_vertex_count_per_frame * buffers_index)
    }

    /// Vertices writable while `buffers_index` is recorded
    pub fn output_vertex_range(&self, buffers_index: u32) -> VisibilityResult<Range<u32>> {
        let start = self.vertex_offset(buffers_index)?;
        Ok(start..start + self.desc.max_pre_skinned_vertex_count_per_frame)
    }

    /// Fails when writing `vertices` could touch data in use by another frame
    pub fn check_output(&self, buffers_index: u32, vertices: Range<u32>) -> VisibilityResult<()> {
        for attribute in [&self.positions, &self.normals] {
            let range = vertices.start as u64 * attribute.stride..vertices.end as u64 * attribute.stride;
            attribute.region.check_write(range, buffers_index)?;
        }
        Ok(())
    }
}
