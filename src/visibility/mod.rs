/// GPU-driven visibility buffer triangle filtering
///
/// Every frame the CPU describes the drawable geometry as filter batches;
/// compute shaders cull the triangles of each batch, write the survivors
/// to filtered index buffers and build the indirect draw arguments.
///
/// Key components:
/// - Filter containers (flat or clustered triangle ranges)
/// - Batch encoder and dispatch chunker over the batch data ring buffer
/// - Triangle filtering pass (clear, filter, compact)
/// - Vertex pre-skinning pass with per-frame aliased output regions
/// - Resource manager owning every buffer of the subsystem

pub mod chunker;
pub mod clusters;
pub mod container;
pub mod encoder;
pub mod filtering;
pub mod mesh_groups;
pub mod pre_skin;
pub mod resources;


pub use chunker::{ChunkLayout, ChunkerSummary, DispatchChunker};
pub use clusters::{build_clusters, cull_cluster, Cluster};
pub use container::{FilterContainer, FilterContainerDesc, FilterContainerId, FilterContainerKind, FilterContainerSet};
pub use encoder::BatchEncoder;
pub use filtering::{
    FilterPassState, FilterPassStats, FilterWorkload, TriangleFilteringPass, TriangleFilteringPassDesc,
};
pub use mesh_groups::{MeshInstance, PreFilterStats, UpdateMeshFilterGroupsDesc};
pub use pre_skin::{
    PreSkinAttributeBuffer, PreSkinContainer, PreSkinPassDesc, PreSkinPassState, PreSkinStats,
    PreSkinVertexBuffers, PreSkinVertexBuffersDesc, PreSkinVertexesPass,
};
pub use resources::{ResourceSizes, VisibilityBuffer, VisibilityBufferResources};
