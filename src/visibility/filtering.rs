//! Triangle filtering pass
//!
//! The pass is a state machine stepped by `advance`. Every state records one
//! stage of the pass and the barriers that order it against the next one:
//!
//! ```text
//! Idle -> ClearBuffers -> [ResetIndirectCommandBuffer] -> ClearBarrier
//!      -> FilterDispatches -> FilterBarrier -> BatchCompaction -> Idle
//! ```
//!
//! Outside the pass the filtered index buffers of a buffer index are in the
//! `ShaderResource` state and its filtered indirect arguments in the
//! `IndirectArgument` state. `ClearBuffers` moves both to unordered access
//! and `BatchCompaction` hands them back to the draws.

use glam::Vec3;

use crate::config::VisibilitySettings;
use crate::constants::limits::MAX_GEOMETRY_SETS;
use crate::error::{check_index, config_error, VisibilityError, VisibilityResult};
use crate::gpu::{
    BufferBarrier, BufferId, CommandRecorder, ComputeStage, FilterBatchData, PassBinding, ResourceState,
};
use crate::memory::{BatchArena, GpuRingBuffer};
use crate::visibility::chunker::DispatchChunker;
use crate::visibility::container::FilterContainer;
use crate::visibility::encoder::BatchEncoder;
use crate::visibility::mesh_groups::PreFilterStats;
use crate::visibility::resources::VisibilityBufferResources;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPassState {
    Idle,
    ClearBuffers,
    ResetIndirectCommandBuffer,
    ClearBarrier,
    FilterDispatches,
    FilterBarrier,
    BatchCompaction,
}

impl FilterPassState {
    /// State recorded after this one
    pub fn next(self, use_indirect_command_buffer: bool) -> Self {
        match self {
            FilterPassState::Idle => FilterPassState::ClearBuffers,
            FilterPassState::ClearBuffers if use_indirect_command_buffer => {
                FilterPassState::ResetIndirectCommandBuffer
            }
            FilterPassState::ClearBuffers => FilterPassState::ClearBarrier,
            FilterPassState::ResetIndirectCommandBuffer => FilterPassState::ClearBarrier,
            FilterPassState::ClearBarrier => FilterPassState::FilterDispatches,
            FilterPassState::FilterDispatches => FilterPassState::FilterBarrier,
            FilterPassState::FilterBarrier => FilterPassState::BatchCompaction,
            FilterPassState::BatchCompaction => FilterPassState::Idle,
        }
    }
}

/// Statistics of one triangle filtering pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterPassStats {
    pub total_draw_count: u32,
    pub geomset_draw_counts: [u32; MAX_GEOMETRY_SETS as usize],

    /// Flat batches and clusters considered
    pub total_processed_batches: u32,
    /// Records handed to the GPU
    pub total_submitted_batches: u32,
    pub total_submitted_triangles: u32,

    pub total_processed_clusters: u32,
    pub total_culled_clusters: u32,

    pub filter_dispatches: u32,
    /// Clear, filter and compaction dispatches
    pub total_shader_dispatches: u32,
}

/// Source of the filtering work of one pass
#[derive(Debug, Clone, Copy)]
pub enum FilterWorkload<'a> {
    /// Containers registered on the `VisibilityBuffer`
    Registered,
    /// Containers owned by the caller, filtered in order
    Containers(&'a [FilterContainer]),
    /// Dispatch groups written by `update_mesh_filter_groups` for this frame
    MeshFilterGroups(PreFilterStats),
}

#[derive(Debug, Clone, Copy)]
pub struct TriangleFilteringPassDesc<'a> {
    pub binding: PassBinding,
    pub workload: FilterWorkload<'a>,

    /// Object space eye position of every view; empty disables cluster culling
    pub view_eyes: &'a [Vec3],
}

impl<'a> TriangleFilteringPassDesc<'a> {
    pub fn new(binding: PassBinding, workload: FilterWorkload<'a>) -> Self {
        Self {
            binding,
            workload,
            view_eyes: &[],
        }
    }
}

/// Workload with registered containers resolved
#[derive(Debug, Clone, Copy)]
pub(crate) enum ResolvedWorkload<'a> {
    Containers(&'a [FilterContainer]),
    MeshFilterGroups(PreFilterStats),
}

pub struct TriangleFilteringPass<'a> {
    state: FilterPassState,
    started: bool,

    settings: &'a VisibilitySettings,
    resources: &'a VisibilityBufferResources,
    ring: &'a mut GpuRingBuffer,
    arena: &'a mut BatchArena<FilterBatchData>,

    binding: PassBinding,
    workload: ResolvedWorkload<'a>,
    view_eyes: &'a [Vec3],

    stats: FilterPassStats,
}

impl<'a> TriangleFilteringPass<'a> {
    pub(crate) fn new(
        settings: &'a VisibilitySettings,
        resources: &'a VisibilityBufferResources,
        ring: &'a mut GpuRingBuffer,
        arena: &'a mut BatchArena<FilterBatchData>,
        binding: PassBinding,
        workload: ResolvedWorkload<'a>,
        view_eyes: &'a [Vec3],
    ) -> VisibilityResult<Self> {
        let config = settings.config();
        check_index("frame", binding.frame_index, config.num_frames)?;
        check_index("buffer", binding.buffers_index, config.num_buffers)?;

        if !view_eyes.is_empty() && view_eyes.len() != config.num_views as usize {
            return Err(config_error(format!(
                "{} eye positions given for {} views",
                view_eyes.len(),
                config.num_views
            )));
        }

        Ok(Self {
            state: FilterPassState::Idle,
            started: false,
            settings,
            resources,
            ring,
            arena,
            binding,
            workload,
            view_eyes,
            stats: FilterPassStats::default(),
        })
    }

    pub fn state(&self) -> FilterPassState {
        self.state
    }

    /// True once the pass went through every state and returned to `Idle`
    pub fn is_complete(&self) -> bool {
        self.started && self.state == FilterPassState::Idle
    }

    pub fn stats(&self) -> &FilterPassStats {
        &self.stats
    }

    /// Records the current state and moves to the next one
    pub fn advance(&mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<FilterPassState> {
        if self.is_complete() {
            return Ok(self.state);
        }

        match self.state {
            FilterPassState::Idle => {
                self.started = true;
                cmd.begin_marker("Triangle Filtering Pass");
            }
            FilterPassState::ClearBuffers => self.clear_buffers(cmd)?,
            FilterPassState::ResetIndirectCommandBuffer => self.reset_indirect_command_buffers(cmd)?,
            FilterPassState::ClearBarrier => self.clear_barrier(cmd),
            FilterPassState::FilterDispatches => self.filter_dispatches(cmd)?,
            FilterPassState::FilterBarrier => self.filter_barrier(cmd),
            FilterPassState::BatchCompaction => {
                self.batch_compaction(cmd)?;
                cmd.end_marker();
            }
        }

        self.state = self.state.next(self.settings.use_indirect_command_buffer);
        Ok(self.state)
    }

    /// Records every remaining state
    pub fn run(mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<FilterPassStats> {
        while !self.is_complete() {
            self.advance(cmd)?;
        }

        log::debug!(
            "[TriangleFilteringPass::run] {} draws, {} batches, {} dispatches",
            self.stats.total_draw_count,
            self.stats.total_submitted_batches,
            self.stats.total_shader_dispatches
        );
        Ok(self.stats)
    }

    fn uncompacted_draw_args(&self) -> &[BufferId] {
        &self.resources.uncompacted_draw_args[self.binding.buffers_index as usize]
    }

    fn filtered_index(&self) -> &[BufferId] {
        &self.resources.filtered_index[self.binding.buffers_index as usize]
    }

    /// Every geometry set and view
    fn filtered_indirect_args(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.resources.filtered_indirect_args[self.binding.buffers_index as usize]
            .iter()
            .flatten()
            .copied()
    }

    fn clear_buffers(&mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<()> {
        cmd.begin_marker(ComputeStage::ClearBuffers.label());

        let mut barriers: Vec<BufferBarrier> = self
            .uncompacted_draw_args()
            .iter()
            .map(|&buffer| BufferBarrier::new(buffer, ResourceState::ShaderResource, ResourceState::UnorderedAccess))
            .collect();
        // Last read by the draws of the previous frame on this buffer index
        barriers.extend(
            self.filtered_index()
                .iter()
                .map(|&buffer| BufferBarrier::new(buffer, ResourceState::ShaderResource, ResourceState::UnorderedAccess)),
        );
        barriers.extend(
            self.filtered_indirect_args()
                .map(|buffer| BufferBarrier::new(buffer, ResourceState::IndirectArgument, ResourceState::UnorderedAccess)),
        );
        cmd.buffer_barriers(&barriers);

        cmd.bind_pipeline(ComputeStage::ClearBuffers, self.binding)?;
        cmd.dispatch(self.settings.clear_dispatch_groups(), 1, 1)?;
        self.stats.total_shader_dispatches += 1;

        cmd.end_marker();
        Ok(())
    }

    fn reset_indirect_command_buffers(&mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<()> {
        let max_draws = self.settings.config().max_draws_indirect;
        for per_view in &self.resources.filtered_indirect_args[self.binding.buffers_index as usize] {
            for &buffer in per_view {
                cmd.reset_indirect_command_buffer(buffer, max_draws)?;
            }
        }
        Ok(())
    }

    fn clear_barrier(&mut self, cmd: &mut dyn CommandRecorder) {
        let buffers_index = self.binding.buffers_index as usize;

        let mut barriers: Vec<BufferBarrier> =
            self.uncompacted_draw_args().iter().map(|&buffer| BufferBarrier::uav(buffer)).collect();
        barriers.extend(self.filtered_indirect_args().map(BufferBarrier::uav));
        if let Some(&bin) = self.resources.bin.get(buffers_index) {
            barriers.push(BufferBarrier::uav(bin));
        }
        if let ResolvedWorkload::MeshFilterGroups(_) = self.workload {
            barriers.push(BufferBarrier::uav(
                self.resources.filter_dispatch_group_data[self.binding.frame_index as usize],
            ));
        }

        cmd.buffer_barriers(&barriers);
    }

    fn filter_dispatches(&mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<()> {
        match self.workload {
            ResolvedWorkload::Containers(containers) => self.filter_containers(cmd, containers),
            ResolvedWorkload::MeshFilterGroups(prefilter) => self.filter_mesh_groups(cmd, &prefilter),
        }
    }

    fn filter_containers(
        &mut self,
        cmd: &mut dyn CommandRecorder,
        containers: &[FilterContainer],
    ) -> VisibilityResult<()> {
        if containers.is_empty() {
            log::trace!("[TriangleFilteringPass::filter_containers] No containers, skipping filter dispatches");
            return Ok(());
        }

        let settings = self.settings;
        for container in containers {
            container.validate(settings)?;
        }

        let config = settings.config();
        let layout = settings.filter_layout;
        let region = self.ring.allocate_for_frame(
            self.binding.frame_index,
            config.num_frames,
            layout.region_bytes(),
            Some(settings.uniform_buffer_alignment),
        )?;

        cmd.begin_marker(ComputeStage::TriangleFiltering.label());
        cmd.bind_pipeline(ComputeStage::TriangleFiltering, self.binding)?;

        let chunker = DispatchChunker::new(self.arena, layout, region, ComputeStage::TriangleFiltering)?;
        let mut encoder = BatchEncoder::new(
            chunker,
            config.filter_batch_size,
            config.max_draws_indirect,
            config.max_primitives_per_draw_indirect,
        );
        for container in containers {
            encoder.encode_container(cmd, container, self.view_eyes)?;
        }
        let encoded = encoder.finish(cmd)?;

        cmd.end_marker();

        self.stats = FilterPassStats {
            total_shader_dispatches: self.stats.total_shader_dispatches + encoded.filter_dispatches,
            ..encoded
        };
        Ok(())
    }

    fn filter_mesh_groups(&mut self, cmd: &mut dyn CommandRecorder, prefilter: &PreFilterStats) -> VisibilityResult<()> {
        if prefilter.frame_index != self.binding.frame_index {
            return Err(config_error(format!(
                "dispatch groups were written for frame {}, pass runs frame {}",
                prefilter.frame_index, self.binding.frame_index
            )));
        }
        if prefilter.num_dispatch_groups > self.settings.max_filter_batches {
            return Err(VisibilityError::DispatchGroupCapacityExceeded {
                requested: prefilter.num_dispatch_groups,
                maximum: self.settings.max_filter_batches,
            });
        }

        self.stats.geomset_draw_counts = prefilter.geomset_max_draw_counts;
        self.stats.total_draw_count = prefilter.geomset_max_draw_counts.iter().sum();
        self.stats.total_processed_batches = prefilter.num_dispatch_groups;
        self.stats.total_submitted_batches = prefilter.num_dispatch_groups;

        if prefilter.num_dispatch_groups == 0 {
            return Ok(());
        }

        cmd.begin_marker(ComputeStage::TriangleFiltering.label());
        cmd.bind_pipeline(ComputeStage::TriangleFiltering, self.binding)?;
        cmd.dispatch(prefilter.num_dispatch_groups, 1, 1)?;
        cmd.end_marker();

        self.stats.filter_dispatches = 1;
        self.stats.total_shader_dispatches += 1;
        Ok(())
    }

    fn filter_barrier(&mut self, cmd: &mut dyn CommandRecorder) {
        let barriers: Vec<BufferBarrier> = self
            .uncompacted_draw_args()
            .iter()
            .map(|&buffer| BufferBarrier::new(buffer, ResourceState::UnorderedAccess, ResourceState::ShaderResource))
            .collect();
        cmd.buffer_barriers(&barriers);
    }

    fn batch_compaction(&mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<()> {
        cmd.begin_marker(ComputeStage::BatchCompaction.label());
        cmd.bind_pipeline(ComputeStage::BatchCompaction, self.binding)?;
        cmd.dispatch(self.settings.clear_dispatch_groups(), 1, 1)?;
        cmd.end_marker();
        self.stats.total_shader_dispatches += 1;

        let mut barriers: Vec<BufferBarrier> = self
            .filtered_indirect_args()
            .map(|buffer| BufferBarrier::new(buffer, ResourceState::UnorderedAccess, ResourceState::IndirectArgument))
            .collect();
        barriers.extend(
            self.filtered_index()
                .iter()
                .map(|&buffer| BufferBarrier::new(buffer, ResourceState::UnorderedAccess, ResourceState::ShaderResource)),
        );
        cmd.buffer_barriers(&barriers);
        Ok(())
    }
}
