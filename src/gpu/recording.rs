//! Recording backend
//!
//! Keeps every created buffer and every recorded command in memory. Used for
//! headless validation of the command streams produced by the passes.

use std::collections::BTreeMap;

use bytemuck::Pod;

use crate::error::{VisibilityError, VisibilityResult};
use crate::gpu::{
    BatchDataRange, BufferBarrier, BufferDesc, BufferId, CommandRecorder, ComputeStage,
    DeviceCapabilities, GpuDevice, PassBinding,
};

/// One buffer created through a `RecordingDevice`
#[derive(Debug, Clone)]
pub struct RecordedBuffer {
    pub desc: BufferDesc,
    pub contents: Vec<u8>,
}

/// In-memory `GpuDevice`
#[derive(Debug, Default)]
pub struct RecordingDevice {
    capabilities: DeviceCapabilities,
    buffers: BTreeMap<BufferId, RecordedBuffer>,
    next_id: u32,
    destroyed: Vec<BufferId>,
}

impl RecordingDevice {
    pub fn new(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            ..Default::default()
        }
    }

    pub fn buffer(&self, id: BufferId) -> Option<&RecordedBuffer> {
        self.buffers.get(&id)
    }

    /// Live buffers in creation order
    pub fn live_buffers(&self) -> impl Iterator<Item = (BufferId, &RecordedBuffer)> {
        self.buffers.iter().map(|(id, buffer)| (*id, buffer))
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Destroyed buffers in destruction order
    pub fn destroyed(&self) -> &[BufferId] {
        &self.destroyed
    }

    /// Buffer contents decoded as `T` records
    pub fn read<T: Pod>(&self, id: BufferId) -> VisibilityResult<Vec<T>> {
        let buffer = self.buffers.get(&id).ok_or(VisibilityError::UnknownBuffer(id))?;
        Ok(buffer
            .contents
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

impl GpuDevice for RecordingDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> VisibilityResult<BufferId> {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            id,
            RecordedBuffer {
                desc: desc.clone(),
                contents: vec![0; desc.size as usize],
            },
        );
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> VisibilityResult<()> {
        let target = self.buffers.get_mut(&buffer).ok_or(VisibilityError::UnknownBuffer(buffer))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > target.contents.len() {
            return Err(crate::error::backend_error(
                "write_buffer",
                format!("write [{}, {}) past end of '{}' ({} bytes)", start, end, target.desc.label, target.contents.len()),
            ));
        }
        target.contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> VisibilityResult<()> {
        self.buffers.remove(&buffer).ok_or(VisibilityError::UnknownBuffer(buffer))?;
        self.destroyed.push(buffer);
        Ok(())
    }
}

/// One command captured by a `RecordingRecorder`
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginMarker(String),
    EndMarker,
    BindPipeline {
        stage: ComputeStage,
        binding: PassBinding,
    },
    BindBatchData(BatchDataRange),
    Dispatch {
        stage: Option<ComputeStage>,
        groups: [u32; 3],
        batch_data: Option<BatchDataRange>,
    },
    Barriers(Vec<BufferBarrier>),
    ResetIndirectCommandBuffer {
        buffer: BufferId,
        max_commands: u32,
    },
    UpdateBuffer {
        buffer: BufferId,
        offset: u64,
        data: Vec<u8>,
    },
}

/// In-memory `CommandRecorder`
#[derive(Debug, Default)]
pub struct RecordingRecorder {
    pub commands: Vec<RecordedCommand>,
    stage: Option<ComputeStage>,
    batch_data: Option<BatchDataRange>,
}

impl RecordingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches of one stage as `(groups, batch data window)`
    pub fn dispatches(&self, stage: ComputeStage) -> Vec<([u32; 3], Option<BatchDataRange>)> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Dispatch { stage: Some(s), groups, batch_data } if *s == stage => {
                    Some((*groups, *batch_data))
                }
                _ => None,
            })
            .collect()
    }

    /// Stage of every dispatch in recording order
    pub fn dispatch_stages(&self) -> Vec<Option<ComputeStage>> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Dispatch { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    pub fn barrier_batches(&self) -> Vec<&[BufferBarrier]> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Barriers(barriers) => Some(barriers.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Records uploaded to `buffer` at `[offset, offset + count * stride)`
    pub fn uploaded_records<T: Pod>(&self, buffer: BufferId, offset: u64, count: usize) -> Vec<T> {
        let stride = std::mem::size_of::<T>() as u64;
        let mut records = Vec::with_capacity(count);
        for index in 0..count as u64 {
            let wanted = offset + index * stride;
            let found = self.commands.iter().rev().find_map(|command| match command {
                RecordedCommand::UpdateBuffer { buffer: b, offset: o, data }
                    if *b == buffer && *o <= wanted && wanted + stride <= *o + data.len() as u64 =>
                {
                    let start = (wanted - *o) as usize;
                    Some(bytemuck::pod_read_unaligned::<T>(&data[start..start + stride as usize]))
                }
                _ => None,
            });
            if let Some(record) = found {
                records.push(record);
            }
        }
        records
    }
}

impl CommandRecorder for RecordingRecorder {
    fn begin_marker(&mut self, label: &str) {
        self.commands.push(RecordedCommand::BeginMarker(label.to_string()));
    }

    fn end_marker(&mut self) {
        self.commands.push(RecordedCommand::EndMarker);
    }

    fn bind_pipeline(&mut self, stage: ComputeStage, binding: PassBinding) -> VisibilityResult<()> {
        self.stage = Some(stage);
        self.batch_data = None;
        self.commands.push(RecordedCommand::BindPipeline { stage, binding });
        Ok(())
    }

    fn bind_batch_data(&mut self, range: BatchDataRange) -> VisibilityResult<()> {
        self.batch_data = Some(range);
        self.commands.push(RecordedCommand::BindBatchData(range));
        Ok(())
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> VisibilityResult<()> {
        self.commands.push(RecordedCommand::Dispatch {
            stage: self.stage,
            groups: [groups_x, groups_y, groups_z],
            batch_data: self.batch_data,
        });
        Ok(())
    }

    fn buffer_barriers(&mut self, barriers: &[BufferBarrier]) {
        self.commands.push(RecordedCommand::Barriers(barriers.to_vec()));
    }

    fn reset_indirect_command_buffer(&mut self, buffer: BufferId, max_commands: u32) -> VisibilityResult<()> {
        self.commands.push(RecordedCommand::ResetIndirectCommandBuffer { buffer, max_commands });
        Ok(())
    }

    fn update_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> VisibilityResult<()> {
        self.commands.push(RecordedCommand::UpdateBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }
}
