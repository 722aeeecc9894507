//! Indirect draw argument layouts
//!
//! Defines the records the filtering shaders write and the indirect draw
//! calls consume.

use bytemuck::{Pod, Zeroable};

/// u32 elements of one `IndirectDrawIndexArguments`
pub const INDIRECT_DRAW_INDEX_ELEMENTS: u32 = 5;

/// Indexed indirect draw arguments
/// Matches wgpu's DrawIndexedIndirect command layout exactly
/// Total size: 20 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectDrawIndexArguments {
    /// Number of indices to draw
    pub index_count: u32,

    /// Number of instances to draw
    pub instance_count: u32,

    /// Offset into the index buffer
    pub start_index: u32,

    /// Value added to each index before fetching vertex
    pub base_vertex: i32,

    /// Offset into the instance buffer, doubles as draw id without root constants
    pub start_instance: u32,
}

impl IndirectDrawIndexArguments {
    /// Element index of `instance_count` inside the record
    pub const INSTANCE_COUNT_ELEMENT: usize = 1;

    /// Element index of `start_instance` inside the record
    pub const START_INSTANCE_ELEMENT: usize = 4;

    /// Create an indexed draw with offsets
    pub fn with_offsets(
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) -> Self {
        Self {
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        }
    }
}

/// Per-draw triangle counters written by the filtering shader and read by
/// batch compaction
/// Total size: 16 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UncompactedDrawArguments {
    /// First index of the draw in the filtered index buffer
    pub start_index: u32,

    /// Surviving triangles (atomically incremented)
    pub num_indices: u32,

    /// Instance data index of the draw
    pub instance_data_index: u32,

    /// Material id used for draw sorting
    pub material_id: u32,
}

/// Builds the initial contents of a filtered indirect argument buffer.
///
/// Every slot draws zero indices so the first frame is valid before any
/// filtering ran. With root constants element 0 holds the draw id and the
/// draw arguments follow it; otherwise the draw id is carried in
/// `start_instance`.
pub fn initial_indirect_arguments(
    max_draws: u32,
    element_count: u32,
    root_constant_draw_id: bool,
) -> Vec<u32> {
    let element_count = element_count as usize;
    let arg_offset = usize::from(root_constant_draw_id);
    let mut dwords = vec![0u32; max_draws as usize * element_count];

    for (draw, record) in dwords.chunks_exact_mut(element_count).enumerate() {
        if root_constant_draw_id {
            record[0] = draw as u32;
        } else {
            record[arg_offset + IndirectDrawIndexArguments::START_INSTANCE_ELEMENT] = draw as u32;
        }
        record[arg_offset + IndirectDrawIndexArguments::INSTANCE_COUNT_ELEMENT] = 1;
    }

    dwords
}
