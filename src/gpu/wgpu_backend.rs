//! wgpu implementation of the device and recording seams
//!
//! Each dispatch is recorded in its own compute pass; wgpu synchronizes
//! storage writes between passes, so explicit barriers only end the pass
//! scope and are logged. Batch data windows are bound through a uniform bind
//! group with a dynamic offset into the ring buffer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{backend_error, VisibilityError, VisibilityResult};
use crate::gpu::buffer_layouts::bindings;
use crate::gpu::{
    BatchDataRange, BufferBarrier, BufferDesc, BufferId, CommandRecorder, ComputeStage,
    DeviceCapabilities, GpuDevice, PassBinding,
};

/// `GpuDevice` over a wgpu device and queue
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    next_id: u32,
}

impl WgpuDevice {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            buffers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Requests a headless adapter and device
    pub async fn request_headless() -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("No suitable GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Visibility Buffer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await?;

        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    /// Blocking variant of `request_headless`
    pub fn request_headless_blocking() -> anyhow::Result<Self> {
        pollster::block_on(Self::request_headless())
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn buffer(&self, id: BufferId) -> VisibilityResult<&wgpu::Buffer> {
        self.buffers.get(&id).ok_or(VisibilityError::UnknownBuffer(id))
    }

    /// Layout entry of the batch data window binding
    pub fn batch_data_layout_entry(window_size: u64) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding: bindings::BATCH_DATA,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(window_size),
            },
            count: None,
        }
    }

    /// Bind group exposing a `window_size` byte window of the ring buffer
    pub fn create_batch_data_bind_group(
        &self,
        layout: &wgpu::BindGroupLayout,
        ring_buffer: BufferId,
        window_size: u64,
    ) -> VisibilityResult<wgpu::BindGroup> {
        let buffer = self.buffer(ring_buffer)?;
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Batch Data Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: bindings::BATCH_DATA,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(window_size),
                }),
            }],
        }))
    }

    /// Starts recording into `encoder` with the given pipelines
    pub fn recorder<'a>(
        &'a self,
        encoder: &'a mut wgpu::CommandEncoder,
        pipelines: &'a ComputePipelineSet,
    ) -> WgpuRecorder<'a> {
        WgpuRecorder {
            device: self,
            encoder,
            pipelines,
            bound: None,
            batch_offset: None,
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        let limits = self.device.limits();
        DeviceCapabilities {
            uniform_buffer_alignment: limits.min_uniform_buffer_offset_alignment as u64,
            indirect_command_buffer: false,
            indirect_root_constant: false,
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> VisibilityResult<BufferId> {
        let limit = self.device.limits().max_buffer_size;
        if desc.size > limit {
            return Err(backend_error(
                "create_buffer",
                format!("'{}' needs {} bytes, device limit is {}", desc.label, desc.size, limit),
            ));
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size,
            usage: desc.usage.to_wgpu_usage(),
            mapped_at_creation: false,
        });

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, buffer);

        log::trace!("[WgpuDevice::create_buffer] {:?} '{}' ({} bytes)", id, desc.label, desc.size);
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> VisibilityResult<()> {
        let target = self.buffer(buffer)?;
        self.queue.write_buffer(target, offset, data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> VisibilityResult<()> {
        let removed = self.buffers.remove(&buffer).ok_or(VisibilityError::UnknownBuffer(buffer))?;
        removed.destroy();
        Ok(())
    }
}

/// Pipeline and bind groups of one compute stage
pub struct StagePipeline {
    pub pipeline: wgpu::ComputePipeline,

    /// `bindings::groups::PER_BUFFER`, indexed by buffers index
    pub buffer_groups: Vec<wgpu::BindGroup>,

    /// `bindings::groups::PER_FRAME`, indexed by frame index
    pub frame_groups: Vec<wgpu::BindGroup>,

    /// `bindings::groups::BATCH_DATA`, the dynamic-offset ring buffer window
    pub batch_data_group: Option<wgpu::BindGroup>,
}

/// Pipelines of every stage the renderer supports
#[derive(Default)]
pub struct ComputePipelineSet {
    stages: HashMap<ComputeStage, StagePipeline>,
}

impl ComputePipelineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: ComputeStage, pipeline: StagePipeline) {
        self.stages.insert(stage, pipeline);
    }

    pub fn get(&self, stage: ComputeStage) -> Option<&StagePipeline> {
        self.stages.get(&stage)
    }
}

/// `CommandRecorder` over a wgpu command encoder
pub struct WgpuRecorder<'a> {
    device: &'a WgpuDevice,
    encoder: &'a mut wgpu::CommandEncoder,
    pipelines: &'a ComputePipelineSet,
    bound: Option<(ComputeStage, PassBinding)>,
    batch_offset: Option<u32>,
}

impl<'a> CommandRecorder for WgpuRecorder<'a> {
    fn begin_marker(&mut self, label: &str) {
        self.encoder.push_debug_group(label);
    }

    fn end_marker(&mut self) {
        self.encoder.pop_debug_group();
    }

    fn bind_pipeline(&mut self, stage: ComputeStage, binding: PassBinding) -> VisibilityResult<()> {
        if self.pipelines.get(stage).is_none() {
            return Err(backend_error("bind_pipeline", format!("no pipeline registered for {:?}", stage)));
        }
        self.bound = Some((stage, binding));
        self.batch_offset = None;
        Ok(())
    }

    fn bind_batch_data(&mut self, range: BatchDataRange) -> VisibilityResult<()> {
        let offset = u32::try_from(range.offset)
            .map_err(|_| backend_error("bind_batch_data", format!("offset {} exceeds u32", range.offset)))?;
        self.batch_offset = Some(offset);
        Ok(())
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> VisibilityResult<()> {
        let (stage, binding) = self
            .bound
            .ok_or_else(|| backend_error("dispatch", "no pipeline bound"))?;
        let pipelines = self.pipelines;
        let stage_pipeline = pipelines
            .get(stage)
            .ok_or_else(|| backend_error("dispatch", format!("no pipeline registered for {:?}", stage)))?;

        let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(stage.label()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&stage_pipeline.pipeline);

        if let Some(group) = stage_pipeline.buffer_groups.get(binding.buffers_index as usize) {
            pass.set_bind_group(bindings::groups::PER_BUFFER, group, &[]);
        }
        if let Some(group) = stage_pipeline.frame_groups.get(binding.frame_index as usize) {
            pass.set_bind_group(bindings::groups::PER_FRAME, group, &[]);
        }
        if let (Some(group), Some(offset)) = (&stage_pipeline.batch_data_group, self.batch_offset) {
            pass.set_bind_group(bindings::groups::BATCH_DATA, group, &[offset]);
        }

        pass.dispatch_workgroups(groups_x, groups_y, groups_z);
        Ok(())
    }

    fn buffer_barriers(&mut self, barriers: &[BufferBarrier]) {
        // Pass boundaries already order storage accesses in wgpu
        log::trace!("[WgpuRecorder::buffer_barriers] {} transitions", barriers.len());
    }

    fn reset_indirect_command_buffer(&mut self, buffer: BufferId, max_commands: u32) -> VisibilityResult<()> {
        let target = self.device.buffer(buffer)?;
        self.encoder.clear_buffer(target, 0, None);
        log::trace!("[WgpuRecorder::reset_indirect_command_buffer] {:?} ({} commands)", buffer, max_commands);
        Ok(())
    }

    fn update_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> VisibilityResult<()> {
        let target = self.device.buffer(buffer)?;
        self.device.queue.write_buffer(target, offset, data);
        Ok(())
    }
}
