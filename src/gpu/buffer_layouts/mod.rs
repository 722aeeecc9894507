//! Centralized GPU buffer layout definitions
//!
//! This module provides a single source of truth for every record shared
//! between the CPU encoder and the visibility buffer shaders.

pub mod batch;
pub mod commands;

#[cfg(test)]
mod tests;

pub use batch::{
    pack_face_count_geometry_set, unpack_face_count, unpack_geometry_set, FilterBatchData,
    FilterDispatchGroupData, PreSkinBatchData, PreSkinBufferOffsets, VisibilityBufferConstants,
};
pub use commands::{
    initial_indirect_arguments, IndirectDrawIndexArguments, UncompactedDrawArguments,
    INDIRECT_DRAW_INDEX_ELEMENTS,
};

/// Buffer binding indices for consistency across shaders
pub mod bindings {
    /// Bind group slots used by every visibility buffer compute stage
    pub mod groups {
        /// Resources selected by the GPU-generated buffer index
        pub const PER_BUFFER: u32 = 0;
        /// Resources selected by the CPU frame index
        pub const PER_FRAME: u32 = 1;
        /// Batch data window inside the ring buffer (dynamic offset)
        pub const BATCH_DATA: u32 = 2;
    }

    /// Batch data binding inside `groups::BATCH_DATA`
    pub const BATCH_DATA: u32 = 0;
}
