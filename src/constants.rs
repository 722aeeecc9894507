// Visibility Buffer Constants - SINGLE SOURCE OF TRUTH
//
// Compile-time limits and GPU record layouts shared by the CPU encoder and
// the filtering shaders. Shader code must mirror the bitfield layouts below.

/// Subsystem limits
pub mod limits {
    /// Maximum number of geometry sets (opaque, alpha tested, transparent, ...)
    pub const MAX_GEOMETRY_SETS: u32 = 4;

    /// Maximum frames in flight for CPU-generated data
    pub const MAX_NUM_FRAMES: u32 = 4;

    /// Maximum buffering depth for GPU-generated data
    pub const MAX_NUM_BUFFERS: u32 = 4;

    /// Maximum number of simultaneously filtered views
    pub const MAX_NUM_VIEWS: u32 = 8;

    /// Upper bound for triangles per filter batch (one thread per triangle)
    pub const MAX_FILTER_BATCH_SIZE: u32 = 1024;

    /// Batch data chunks per frame are derived from a 512 triangle budget
    pub const FILTER_CHUNK_TRIANGLE_BUDGET: u32 = 512;

    /// Chunk multiplier applied to the triangle budget above
    pub const FILTER_CHUNKS_PER_BUDGET: u32 = 16;
}

/// Default thread group sizes
pub mod threads {
    /// Threads per group of the clear and compaction shaders
    pub const CLEAR_THREAD_COUNT: u32 = 256;

    /// Triangles per filter batch (and threads per filter group)
    pub const DEFAULT_FILTER_BATCH_SIZE: u32 = 256;

    /// Vertices per pre-skin batch
    pub const DEFAULT_PRE_SKIN_BATCH_SIZE: u32 = 256;
}

/// Bit layout of the packed `face_count_geometry_set` field
pub mod packing {
    pub const BATCH_FACE_COUNT_LOW_BIT: u32 = 0;
    pub const BATCH_FACE_COUNT_MASK: u32 = 0x0000_FFFF;
    pub const BATCH_GEOMETRY_LOW_BIT: u32 = 16;
    pub const BATCH_GEOMETRY_MASK: u32 = 0x0003_0000;
}

/// Buffer layout sizes
pub mod layout {
    /// Default uniform buffer offset alignment when the device reports none
    pub const UNIFORM_BUFFER_ALIGNMENT: u64 = 256;

    /// WGSL storage buffer alignment
    pub const STORAGE_BUFFER_ALIGNMENT: u64 = 16;

    /// Index element size (u32 indices)
    pub const INDEX_SIZE: u64 = 4;

    /// Position attribute stride of the pre-skinned vertex buffer (float3)
    pub const PRE_SKIN_POSITION_STRIDE: u64 = 12;

    /// Normal attribute stride of the pre-skinned vertex buffer (packed 10:10:10:2)
    pub const PRE_SKIN_NORMAL_STRIDE: u64 = 4;

    /// Elements of one indirect draw argument record
    pub const DEFAULT_INDIRECT_ELEMENT_COUNT: u32 = 8;
}

/// Cluster construction
pub mod clusters {
    /// Triangles per cluster used by scene preprocessing
    pub const CLUSTER_SIZE: u32 = 256;

    /// Cone apex farther than this multiple of the AABB diagonal is rejected
    pub const MAX_CONE_APEX_DISTANCE_SCALE: f32 = 16.0;
}

// Compile-time validation
const _: () = {
    assert!(limits::MAX_GEOMETRY_SETS <= (packing::BATCH_GEOMETRY_MASK >> packing::BATCH_GEOMETRY_LOW_BIT) + 1);
    assert!(limits::MAX_FILTER_BATCH_SIZE <= packing::BATCH_FACE_COUNT_MASK);
    assert!(threads::DEFAULT_FILTER_BATCH_SIZE <= limits::MAX_FILTER_BATCH_SIZE);
};
