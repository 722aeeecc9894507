//! Batch data records consumed by the filtering and skinning shaders
//!
//! Records are uploaded into the batch data ring buffer and bound one chunk
//! at a time as a uniform window, so their strides must divide the uniform
//! buffer offset alignment.

use bytemuck::{Pod, Zeroable};

use crate::constants::packing::{
    BATCH_FACE_COUNT_LOW_BIT, BATCH_FACE_COUNT_MASK, BATCH_GEOMETRY_LOW_BIT, BATCH_GEOMETRY_MASK,
};

/// Pack a face count and a geometry set into one bitfield
#[inline]
pub fn pack_face_count_geometry_set(face_count: u32, geometry_set: u32) -> u32 {
    ((face_count << BATCH_FACE_COUNT_LOW_BIT) & BATCH_FACE_COUNT_MASK)
        | ((geometry_set << BATCH_GEOMETRY_LOW_BIT) & BATCH_GEOMETRY_MASK)
}

#[inline]
pub fn unpack_face_count(packed: u32) -> u32 {
    (packed & BATCH_FACE_COUNT_MASK) >> BATCH_FACE_COUNT_LOW_BIT
}

#[inline]
pub fn unpack_geometry_set(packed: u32) -> u32 {
    (packed & BATCH_GEOMETRY_MASK) >> BATCH_GEOMETRY_LOW_BIT
}

/// One unit of triangle filtering work
/// Total size: 32 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FilterBatchData {
    /// Draw slot this batch contributes to
    pub accum_draw_index: u32,

    /// Face count and geometry set, see `pack_face_count_geometry_set`
    pub face_count_geometry_set: u32,

    pub mesh_index: u32,
    pub instance_data_index: u32,

    /// First index of the batch, relative to the start of the mesh
    pub index_offset: u32,

    /// Triangles emitted by earlier batches of the same draw
    pub output_index_offset: u32,

    /// Record index inside the chunk where the draw's batches begin
    pub draw_batch_start: u32,

    pub _pad: u32,
}

impl FilterBatchData {
    pub fn face_count(&self) -> u32 {
        unpack_face_count(self.face_count_geometry_set)
    }

    pub fn geometry_set(&self) -> u32 {
        unpack_geometry_set(self.face_count_geometry_set)
    }
}

/// One mesh-instance dispatch group of the pre-filtered path
/// Total size: 16 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FilterDispatchGroupData {
    pub mesh_index: u32,
    pub instance_data_index: u32,
    pub face_count_geometry_set: u32,

    /// First index of the group, relative to the start of the mesh
    pub index_offset: u32,
}

/// One unit of vertex skinning work
/// Total size: 32 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PreSkinBatchData {
    pub output_vertex_offset: u32,
    pub vertex_count: u32,
    pub vertex_position_offset: u32,
    pub vertex_joints_offset: u32,
    pub joint_matrix_offset: u32,
    pub _pad: [u32; 3],
}

/// Start of each geometry set inside the filtered index buffer
/// Total size: 16 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct VisibilityBufferConstants {
    pub index_offset: u32,
    pub _pad: [u32; 3],
}

/// Vertex offset of one pre-skin output region
/// Total size: 16 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PreSkinBufferOffsets {
    pub vertex_offset: u32,
    pub _pad: [u32; 3],
}
