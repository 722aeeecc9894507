//! Visibility buffer resource manager
//!
//! `VisibilityBuffer` owns every buffer of the subsystem, the batch data
//! ring buffers and their CPU staging arenas, and the registered filter
//! containers. Passes borrow from it for the duration of one recording.

use crate::config::{VisibilityBufferConfig, VisibilitySettings};
use crate::constants::layout::INDEX_SIZE;
use crate::error::{check_index, VisibilityError, VisibilityResult};
use crate::gpu::{
    initial_indirect_arguments, BufferDesc, BufferId, BufferUsage, CommandRecorder, FilterDispatchGroupData,
    GpuDevice, PreSkinBatchData, UncompactedDrawArguments, VisibilityBufferConstants, FilterBatchData,
};
use crate::memory::{BatchArena, GpuRingBuffer};
use crate::visibility::container::{FilterContainer, FilterContainerDesc, FilterContainerId, FilterContainerSet};
use crate::visibility::filtering::{
    FilterPassStats, FilterWorkload, ResolvedWorkload, TriangleFilteringPass, TriangleFilteringPassDesc,
};
use crate::visibility::mesh_groups::{encode_mesh_filter_groups, PreFilterStats, UpdateMeshFilterGroupsDesc};
use crate::visibility::pre_skin::{PreSkinPassDesc, PreSkinStats, PreSkinVertexesPass};

/// Byte size of every buffer kind, derived from the settings alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSizes {
    /// Per frame
    pub filter_dispatch_group_data: u64,
    /// Per frame
    pub indirect_data_index: u64,
    /// Per buffer and view
    pub filtered_index: u64,
    /// Per buffer, geometry set and view
    pub filtered_indirect_args: u64,
    /// Per buffer and view
    pub uncompacted_draw_args: u64,
    /// Per buffer, when triangle binning is enabled
    pub bin: Option<u64>,
    pub constants: u64,
    pub filter_ring: u64,
    pub pre_skin_ring: Option<u64>,
}

impl ResourceSizes {
    pub fn new(settings: &VisibilitySettings) -> Self {
        let config = settings.config();
        let max_indices = config.total_max_index_count();
        let max_draws = config.max_draws_indirect as u64;

        Self {
            filter_dispatch_group_data: settings.max_filter_batches as u64
                * std::mem::size_of::<FilterDispatchGroupData>() as u64,
            indirect_data_index: max_indices * INDEX_SIZE,
            filtered_index: max_indices * INDEX_SIZE,
            filtered_indirect_args: max_draws * config.indirect_element_count as u64 * 4,
            uncompacted_draw_args: max_draws * std::mem::size_of::<UncompactedDrawArguments>() as u64,
            bin: config.enable_triangle_binning.then(|| max_indices * 2 * INDEX_SIZE),
            constants: config.num_geometry_sets as u64 * std::mem::size_of::<VisibilityBufferConstants>() as u64,
            filter_ring: settings.filter_ring_buffer_size(),
            pre_skin_ring: settings.pre_skin_ring_buffer_size(),
        }
    }

    /// Device memory of the whole subsystem
    pub fn total_bytes(&self, config: &VisibilityBufferConfig) -> u64 {
        let frames = config.num_frames as u64;
        let buffers = config.num_buffers as u64;
        let views = config.num_views as u64;
        let sets = config.num_geometry_sets as u64;

        frames * (self.filter_dispatch_group_data + self.indirect_data_index)
            + buffers * views * (self.filtered_index + self.uncompacted_draw_args)
            + buffers * sets * views * self.filtered_indirect_args
            + buffers * self.bin.unwrap_or(0)
            + self.constants
            + self.filter_ring
            + self.pre_skin_ring.unwrap_or(0)
    }
}

/// Buffers owned by a `VisibilityBuffer`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityBufferResources {
    /// `[frame]`
    pub filter_dispatch_group_data: Vec<BufferId>,
    /// `[frame]`
    pub indirect_data_index: Vec<BufferId>,
    /// `[buffer][view]`
    pub filtered_index: Vec<Vec<BufferId>>,
    /// `[buffer][geometry set][view]`
    pub filtered_indirect_args: Vec<Vec<Vec<BufferId>>>,
    /// `[buffer][view]`
    pub uncompacted_draw_args: Vec<Vec<BufferId>>,
    /// `[buffer]`, empty without triangle binning
    pub bin: Vec<BufferId>,
    pub constants: BufferId,
}

impl VisibilityBufferResources {
    fn create(
        device: &mut dyn GpuDevice,
        settings: &VisibilitySettings,
        sizes: &ResourceSizes,
    ) -> VisibilityResult<Self> {
        let config = settings.config();
        let mut resources = Self::default();

        for frame in 0..config.num_frames {
            resources.filter_dispatch_group_data.push(device.create_buffer(&BufferDesc::new(
                format!("Filter Dispatch Group Data {}", frame),
                sizes.filter_dispatch_group_data,
                BufferUsage::StorageUpload,
            ))?);
            resources.indirect_data_index.push(device.create_buffer(&BufferDesc::new(
                format!("Indirect Data Index {}", frame),
                sizes.indirect_data_index,
                BufferUsage::Storage,
            ))?);
        }

        let initial_args = initial_indirect_arguments(
            config.max_draws_indirect,
            config.indirect_element_count,
            settings.use_indirect_root_constant,
        );

        for buffer in 0..config.num_buffers {
            let mut filtered_index = Vec::with_capacity(config.num_views as usize);
            let mut uncompacted = Vec::with_capacity(config.num_views as usize);
            for view in 0..config.num_views {
                filtered_index.push(device.create_buffer(&BufferDesc::new(
                    format!("Filtered Index {} View {}", buffer, view),
                    sizes.filtered_index,
                    BufferUsage::FilteredIndices,
                ))?);
                uncompacted.push(device.create_buffer(&BufferDesc::new(
                    format!("Uncompacted Draw Arguments {} View {}", buffer, view),
                    sizes.uncompacted_draw_args,
                    BufferUsage::Storage,
                ))?);
            }
            resources.filtered_index.push(filtered_index);
            resources.uncompacted_draw_args.push(uncompacted);

            let mut per_set = Vec::with_capacity(config.num_geometry_sets as usize);
            for set in 0..config.num_geometry_sets {
                let mut per_view = Vec::with_capacity(config.num_views as usize);
                for view in 0..config.num_views {
                    let args = device.create_buffer(&BufferDesc::new(
                        format!("Filtered Indirect Arguments {} Set {} View {}", buffer, set, view),
                        sizes.filtered_indirect_args,
                        BufferUsage::IndirectArguments,
                    ))?;
                    device.write_buffer(args, 0, bytemuck::cast_slice(&initial_args))?;
                    per_view.push(args);
                }
                per_set.push(per_view);
            }
            resources.filtered_indirect_args.push(per_set);

            if let Some(bin_size) = sizes.bin {
                resources.bin.push(device.create_buffer(&BufferDesc::new(
                    format!("Bin Buffer {}", buffer),
                    bin_size,
                    BufferUsage::Storage,
                ))?);
            }
        }

        let mut index_offset = 0;
        let constants: Vec<VisibilityBufferConstants> = config
            .max_index_count_per_geometry_set
            .iter()
            .map(|&count| {
                let entry = VisibilityBufferConstants {
                    index_offset,
                    _pad: [0; 3],
                };
                index_offset += count;
                entry
            })
            .collect();
        resources.constants =
            device.create_buffer(&BufferDesc::new("Visibility Buffer Constants", sizes.constants, BufferUsage::Uniform))?;
        device.write_buffer(resources.constants, 0, bytemuck::cast_slice(&constants))?;

        Ok(resources)
    }

    /// Every buffer in creation order
    pub fn all_buffers(&self) -> Vec<BufferId> {
        let mut buffers = Vec::new();
        for (groups, index) in self.filter_dispatch_group_data.iter().zip(&self.indirect_data_index) {
            buffers.push(*groups);
            buffers.push(*index);
        }
        for buffer in 0..self.filtered_index.len() {
            for (filtered, uncompacted) in self.filtered_index[buffer].iter().zip(&self.uncompacted_draw_args[buffer]) {
                buffers.push(*filtered);
                buffers.push(*uncompacted);
            }
            buffers.extend(self.filtered_indirect_args[buffer].iter().flatten());
            buffers.extend(self.bin.get(buffer));
        }
        buffers.push(self.constants);
        buffers
    }
}

/// The visibility buffer subsystem
pub struct VisibilityBuffer {
    settings: VisibilitySettings,
    sizes: ResourceSizes,
    resources: VisibilityBufferResources,

    filter_ring: GpuRingBuffer,
    filter_arena: BatchArena<FilterBatchData>,
    dispatch_group_arena: BatchArena<FilterDispatchGroupData>,

    pre_skin_ring: Option<GpuRingBuffer>,
    pre_skin_arena: Option<BatchArena<PreSkinBatchData>>,

    containers: FilterContainerSet,
}

impl VisibilityBuffer {
    /// Validates `config` and allocates every buffer
    pub fn init(device: &mut dyn GpuDevice, config: VisibilityBufferConfig) -> VisibilityResult<Self> {
        let settings = VisibilitySettings::new(config, &device.capabilities())?;
        let sizes = ResourceSizes::new(&settings);

        let resources = VisibilityBufferResources::create(device, &settings, &sizes)?;

        let filter_ring = GpuRingBuffer::create(
            device,
            "Filter Batch Data Ring",
            sizes.filter_ring,
            settings.uniform_buffer_alignment,
        )?;
        let filter_arena = BatchArena::new(settings.filter_layout.region_records());
        let dispatch_group_arena = BatchArena::new(settings.max_filter_batches);

        let (pre_skin_ring, pre_skin_arena) = match (settings.pre_skin_layout, sizes.pre_skin_ring) {
            (Some(layout), Some(ring_size)) => (
                Some(GpuRingBuffer::create(
                    device,
                    "Pre Skin Batch Data Ring",
                    ring_size,
                    settings.uniform_buffer_alignment,
                )?),
                Some(BatchArena::new(layout.region_records())),
            ),
            _ => (None, None),
        };

        log::info!(
            "[VisibilityBuffer::init] {} buffers, {:.2} MB ({} frames, {} buffers, {} geometry sets, {} views)",
            resources.all_buffers().len() + 1 + usize::from(pre_skin_ring.is_some()),
            sizes.total_bytes(settings.config()) as f64 / (1024.0 * 1024.0),
            settings.config().num_frames,
            settings.config().num_buffers,
            settings.config().num_geometry_sets,
            settings.config().num_views
        );

        Ok(Self {
            settings,
            sizes,
            resources,
            filter_ring,
            filter_arena,
            dispatch_group_arena,
            pre_skin_ring,
            pre_skin_arena,
            containers: FilterContainerSet::new(),
        })
    }

    /// Releases every buffer; ring buffers go last
    pub fn exit(self, device: &mut dyn GpuDevice) -> VisibilityResult<()> {
        for buffer in self.resources.all_buffers().into_iter().rev() {
            device.destroy_buffer(buffer)?;
        }

        self.filter_ring.destroy(device)?;
        if let Some(ring) = self.pre_skin_ring {
            ring.destroy(device)?;
        }

        log::info!("[VisibilityBuffer::exit] Released all buffers");
        Ok(())
    }

    pub fn settings(&self) -> &VisibilitySettings {
        &self.settings
    }

    pub fn sizes(&self) -> &ResourceSizes {
        &self.sizes
    }

    pub fn resources(&self) -> &VisibilityBufferResources {
        &self.resources
    }

    pub fn filter_ring(&self) -> &GpuRingBuffer {
        &self.filter_ring
    }

    pub fn pre_skin_ring(&self) -> Option<&GpuRingBuffer> {
        self.pre_skin_ring.as_ref()
    }

    pub fn filtered_index_buffer(&self, buffers_index: u32, view: u32) -> VisibilityResult<BufferId> {
        let config = self.settings.config();
        check_index("buffer", buffers_index, config.num_buffers)?;
        check_index("view", view, config.num_views)?;
        Ok(self.resources.filtered_index[buffers_index as usize][view as usize])
    }

    pub fn filtered_indirect_args_buffer(
        &self,
        buffers_index: u32,
        geometry_set: u32,
        view: u32,
    ) -> VisibilityResult<BufferId> {
        let config = self.settings.config();
        check_index("buffer", buffers_index, config.num_buffers)?;
        check_index("view", view, config.num_views)?;
        if geometry_set >= config.num_geometry_sets {
            return Err(VisibilityError::GeometrySetOutOfRange {
                geometry_set,
                num_geometry_sets: config.num_geometry_sets,
            });
        }
        Ok(self.resources.filtered_indirect_args[buffers_index as usize][geometry_set as usize][view as usize])
    }

    /// Builds a container without registering it
    pub fn create_filter_container(&self, desc: FilterContainerDesc) -> VisibilityResult<FilterContainer> {
        FilterContainer::new(desc, &self.settings)
    }

    /// Registers a container; registered containers are filtered in
    /// registration order by `FilterWorkload::Registered`
    pub fn add_filter_container(&mut self, desc: FilterContainerDesc) -> VisibilityResult<FilterContainerId> {
        let container = FilterContainer::new(desc, &self.settings)?;
        let id = self.containers.insert(container);
        log::trace!("[VisibilityBuffer::add_filter_container] {:?}", id);
        Ok(id)
    }

    pub fn remove_filter_container(&mut self, id: FilterContainerId) -> VisibilityResult<FilterContainer> {
        self.containers.remove(id)
    }

    pub fn filter_containers(&self) -> &[FilterContainer] {
        self.containers.as_slice()
    }

    /// Writes the dispatch groups of every mesh instance into the frame's
    /// dispatch group buffer
    pub fn update_mesh_filter_groups(
        &mut self,
        cmd: &mut dyn CommandRecorder,
        desc: &UpdateMeshFilterGroupsDesc<'_>,
    ) -> VisibilityResult<PreFilterStats> {
        let stats = encode_mesh_filter_groups(&self.settings, &mut self.dispatch_group_arena, desc)?;

        if stats.num_dispatch_groups > 0 {
            let buffer = self.resources.filter_dispatch_group_data[desc.frame_index as usize];
            cmd.update_buffer(buffer, 0, self.dispatch_group_arena.as_bytes(0..stats.num_dispatch_groups))?;
        }

        log::debug!(
            "[VisibilityBuffer::update_mesh_filter_groups] {} instances -> {} dispatch groups",
            desc.instances.len(),
            stats.num_dispatch_groups
        );
        Ok(stats)
    }

    /// Starts a filtering pass to be stepped with `advance`
    pub fn triangle_filtering_pass<'a>(
        &'a mut self,
        desc: &TriangleFilteringPassDesc<'a>,
    ) -> VisibilityResult<TriangleFilteringPass<'a>> {
        let workload = match desc.workload {
            FilterWorkload::Registered => ResolvedWorkload::Containers(self.containers.as_slice()),
            FilterWorkload::Containers(containers) => ResolvedWorkload::Containers(containers),
            FilterWorkload::MeshFilterGroups(prefilter) => ResolvedWorkload::MeshFilterGroups(prefilter),
        };

        TriangleFilteringPass::new(
            &self.settings,
            &self.resources,
            &mut self.filter_ring,
            &mut self.filter_arena,
            desc.binding,
            workload,
            desc.view_eyes,
        )
    }

    /// Records a whole filtering pass.
    ///
    /// Batch records go to the ring buffer slot of `desc.binding.frame_index`.
    /// One filtering pass per frame index is supported: a second pass recorded
    /// for the same frame index overwrites the batch records of the first.
    pub fn run_triangle_filtering_pass(
        &mut self,
        cmd: &mut dyn CommandRecorder,
        desc: &TriangleFilteringPassDesc<'_>,
    ) -> VisibilityResult<FilterPassStats> {
        self.triangle_filtering_pass(desc)?.run(cmd)
    }

    /// Starts a pre-skin pass to be stepped with `advance`
    pub fn pre_skin_vertexes_pass<'a>(
        &'a mut self,
        desc: &PreSkinPassDesc<'a>,
    ) -> VisibilityResult<PreSkinVertexesPass<'a>> {
        match (self.pre_skin_ring.as_mut(), self.pre_skin_arena.as_mut()) {
            (Some(ring), Some(arena)) => PreSkinVertexesPass::new(&self.settings, ring, arena, desc),
            _ => Err(VisibilityError::PreSkinDisabled),
        }
    }

    /// Records a whole pre-skin pass; like the filtering pass it owns the ring
    /// buffer slot of its frame index
    pub fn run_pre_skin_vertexes_pass(
        &mut self,
        cmd: &mut dyn CommandRecorder,
        desc: &PreSkinPassDesc<'_>,
    ) -> VisibilityResult<PreSkinStats> {
        self.pre_skin_vertexes_pass(desc)?.run(cmd)
    }
}
