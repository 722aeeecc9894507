//! Mesh filter groups
//!
//! Alternative to container encoding: every mesh instance is cut into
//! dispatch groups of `filter_batch_size` triangles which are written to the
//! frame's dispatch group buffer and filtered by one single dispatch.

use crate::config::VisibilitySettings;
use crate::constants::limits::MAX_GEOMETRY_SETS;
use crate::error::{check_index, VisibilityError, VisibilityResult};
use crate::gpu::{pack_face_count_geometry_set, FilterDispatchGroupData};
use crate::memory::BatchArena;

/// One drawable mesh instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshInstance {
    pub mesh_index: u32,
    pub instance_index: u32,
    pub geometry_set: u32,
    pub triangle_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateMeshFilterGroupsDesc<'a> {
    pub frame_index: u32,
    pub instances: &'a [MeshInstance],
}

/// Result of `update_mesh_filter_groups`, consumed by the filtering pass of
/// the same frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreFilterStats {
    pub frame_index: u32,
    pub num_dispatch_groups: u32,

    /// Upper bound of the draws of each geometry set, one per instance
    pub geomset_max_draw_counts: [u32; MAX_GEOMETRY_SETS as usize],
}

/// Writes the dispatch groups of `desc` into `arena`
pub(crate) fn encode_mesh_filter_groups(
    settings: &VisibilitySettings,
    arena: &mut BatchArena<FilterDispatchGroupData>,
    desc: &UpdateMeshFilterGroupsDesc<'_>,
) -> VisibilityResult<PreFilterStats> {
    let config = settings.config();
    let batch_size = config.filter_batch_size;
    check_index("frame", desc.frame_index, config.num_frames)?;

    let mut required: u64 = 0;
    for instance in desc.instances {
        if instance.geometry_set >= config.num_geometry_sets {
            return Err(VisibilityError::GeometrySetOutOfRange {
                geometry_set: instance.geometry_set,
                num_geometry_sets: config.num_geometry_sets,
            });
        }
        required += instance.triangle_count.div_ceil(batch_size) as u64;
    }

    let capacity = settings.max_filter_batches.min(arena.capacity());
    if required > capacity as u64 {
        return Err(VisibilityError::DispatchGroupCapacityExceeded {
            requested: u32::try_from(required).unwrap_or(u32::MAX),
            maximum: capacity,
        });
    }

    let mut stats = PreFilterStats {
        frame_index: desc.frame_index,
        ..Default::default()
    };

    for instance in desc.instances.iter().filter(|instance| instance.triangle_count > 0) {
        for first_triangle in (0..instance.triangle_count).step_by(batch_size as usize) {
            let face_count = batch_size.min(instance.triangle_count - first_triangle);
            arena.write(
                stats.num_dispatch_groups,
                FilterDispatchGroupData {
                    mesh_index: instance.mesh_index,
                    instance_data_index: instance.instance_index,
                    face_count_geometry_set: pack_face_count_geometry_set(face_count, instance.geometry_set),
                    index_offset: first_triangle * 3,
                },
            );
            stats.num_dispatch_groups += 1;
        }
        stats.geomset_max_draw_counts[instance.geometry_set as usize] += 1;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisibilityBufferConfig;
    use crate::gpu::{unpack_face_count, unpack_geometry_set, DeviceCapabilities};

    fn settings(filter_batch_size: u32) -> VisibilitySettings {
        let config = VisibilityBufferConfig {
            filter_batch_size,
            max_index_count_per_geometry_set: vec![3 * 64, 3 * 64],
            ..Default::default()
        };
        VisibilitySettings::new(config, &DeviceCapabilities::default()).unwrap()
    }

    #[test]
    fn test_groups_per_instance() {
        let settings = settings(4);
        let mut arena = BatchArena::new(settings.max_filter_batches);
        let instances = [
            MeshInstance { mesh_index: 1, instance_index: 10, geometry_set: 0, triangle_count: 10 },
            MeshInstance { mesh_index: 2, instance_index: 11, geometry_set: 1, triangle_count: 0 },
            MeshInstance { mesh_index: 3, instance_index: 12, geometry_set: 1, triangle_count: 4 },
        ];
        let desc = UpdateMeshFilterGroupsDesc { frame_index: 1, instances: &instances };

        let stats = encode_mesh_filter_groups(&settings, &mut arena, &desc).unwrap();
        assert_eq!(stats.num_dispatch_groups, 4);
        assert_eq!(stats.geomset_max_draw_counts[..2], [1, 1]);

        let groups = arena.records(0..4);
        let faces: Vec<u32> = groups.iter().map(|g| unpack_face_count(g.face_count_geometry_set)).collect();
        let offsets: Vec<u32> = groups.iter().map(|g| g.index_offset).collect();
        assert_eq!(faces, vec![4, 4, 2, 4]);
        assert_eq!(offsets, vec![0, 12, 24, 0]);
        assert_eq!(unpack_geometry_set(groups[3].face_count_geometry_set), 1);
        assert_eq!(groups[3].instance_data_index, 12);
    }

    #[test]
    fn test_capacity_is_checked_before_writing() {
        let settings = settings(4);
        let mut arena = BatchArena::new(settings.max_filter_batches);
        // (384 indices / 3) / 2 = 64 groups of at most 4 triangles
        assert_eq!(settings.max_filter_batches, 64);

        let instances = [MeshInstance { triangle_count: 257, ..Default::default() }];
        let desc = UpdateMeshFilterGroupsDesc { frame_index: 0, instances: &instances };
        assert!(matches!(
            encode_mesh_filter_groups(&settings, &mut arena, &desc),
            Err(VisibilityError::DispatchGroupCapacityExceeded { requested: 65, maximum: 64 })
        ));
    }

    #[test]
    fn test_rejects_unknown_geometry_set() {
        let settings = settings(4);
        let mut arena = BatchArena::new(settings.max_filter_batches);
        let instances = [MeshInstance { geometry_set: 3, triangle_count: 1, ..Default::default() }];
        let desc = UpdateMeshFilterGroupsDesc { frame_index: 0, instances: &instances };
        assert!(encode_mesh_filter_groups(&settings, &mut arena, &desc).is_err());
    }
}
