//! Filter containers
//!
//! A filter container describes the triangle range of one mesh instance as
//! seen by the triangle filtering pass: either a flat triangle list cut into
//! fixed-size batches, or a precomputed list of clusters.

use std::sync::Arc;

use crate::config::VisibilitySettings;
use crate::error::{config_error, VisibilityError, VisibilityResult};
use crate::visibility::clusters::Cluster;

/// Registration parameters of a filter container
#[derive(Debug, Clone, Default)]
pub struct FilterContainerDesc {
    pub geometry_set: u32,
    pub mesh_index: u32,
    pub instance_index: u32,

    /// Indices of the mesh range; a multiple of 3
    pub index_count: u32,

    /// Precomputed clusters, see `build_clusters`. `None` filters the mesh
    /// as a flat triangle list.
    pub clusters: Option<Arc<[Cluster]>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterContainerKind {
    /// Consecutive `filter_batch_size` triangle ranges
    Flat,
    /// One batch per cluster that survives culling
    Clusters(Arc<[Cluster]>),
}

/// A validated filter container.
///
/// Built by `FilterContainer::new` (or `VisibilityBuffer::create_filter_container`);
/// the filtering pass checks it again against its own settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterContainer {
    pub(crate) kind: FilterContainerKind,
    pub(crate) geometry_set: u32,
    pub(crate) mesh_index: u32,
    pub(crate) instance_index: u32,
    pub(crate) triangle_count: u32,

    /// Batches emitted when nothing is culled
    pub(crate) filter_batch_count: u32,
}

impl FilterContainer {
    /// Validates `desc` against the settings and derives the batch count
    pub fn new(desc: FilterContainerDesc, settings: &VisibilitySettings) -> VisibilityResult<Self> {
        if desc.index_count % 3 != 0 {
            return Err(config_error(format!(
                "container index count {} is not a multiple of 3",
                desc.index_count
            )));
        }

        let triangle_count = desc.index_count / 3;
        let (kind, filter_batch_count) = match desc.clusters {
            None => (
                FilterContainerKind::Flat,
                triangle_count.div_ceil(settings.config().filter_batch_size),
            ),
            Some(clusters) => {
                let count = clusters.len() as u32;
                (FilterContainerKind::Clusters(clusters), count)
            }
        };

        let container = Self {
            kind,
            geometry_set: desc.geometry_set,
            mesh_index: desc.mesh_index,
            instance_index: desc.instance_index,
            triangle_count,
            filter_batch_count,
        };
        container.validate(settings)?;

        if triangle_count == 0 {
            log::warn!(
                "[FilterContainer::new] Mesh {} instance {} has no triangles",
                desc.mesh_index,
                desc.instance_index
            );
        }

        Ok(container)
    }

    /// Checks the container against `settings`.
    ///
    /// A container built for another `VisibilityBuffer` may name a geometry
    /// set without buffers here or be batched with a different batch size.
    pub fn validate(&self, settings: &VisibilitySettings) -> VisibilityResult<()> {
        let config = settings.config();

        if self.geometry_set >= config.num_geometry_sets {
            return Err(VisibilityError::GeometrySetOutOfRange {
                geometry_set: self.geometry_set,
                num_geometry_sets: config.num_geometry_sets,
            });
        }

        let batch_size = config.filter_batch_size;
        let expected_batches = match &self.kind {
            FilterContainerKind::Flat => self.triangle_count.div_ceil(batch_size),
            FilterContainerKind::Clusters(clusters) => {
                for cluster in clusters.iter() {
                    if cluster.triangle_count > batch_size {
                        return Err(config_error(format!(
                            "cluster of {} triangles exceeds the filter batch size {}",
                            cluster.triangle_count, batch_size
                        )));
                    }
                    let end = cluster.start_triangle as u64 + cluster.triangle_count as u64;
                    if end > self.triangle_count as u64 {
                        return Err(config_error(format!(
                            "cluster [{}, {}) lies outside the {} triangles of mesh {}",
                            cluster.start_triangle, end, self.triangle_count, self.mesh_index
                        )));
                    }
                }
                clusters.len() as u32
            }
        };

        if self.filter_batch_count != expected_batches {
            return Err(config_error(format!(
                "mesh {} has {} filter batches, {} triangles need {} batches of {}",
                self.mesh_index, self.filter_batch_count, self.triangle_count, expected_batches, batch_size
            )));
        }

        Ok(())
    }

    pub fn kind(&self) -> &FilterContainerKind {
        &self.kind
    }

    pub fn geometry_set(&self) -> u32 {
        self.geometry_set
    }

    pub fn mesh_index(&self) -> u32 {
        self.mesh_index
    }

    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    pub fn filter_batch_count(&self) -> u32 {
        self.filter_batch_count
    }

    pub fn is_clustered(&self) -> bool {
        matches!(self.kind, FilterContainerKind::Clusters(_))
    }
}

/// Handle returned by container registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterContainerId(pub u32);

/// Registered containers in registration order
#[derive(Debug, Default)]
pub struct FilterContainerSet {
    ids: Vec<FilterContainerId>,
    containers: Vec<FilterContainer>,
    next_id: u32,
}

impl FilterContainerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, container: FilterContainer) -> FilterContainerId {
        let id = FilterContainerId(self.next_id);
        self.next_id += 1;
        self.ids.push(id);
        self.containers.push(container);
        id
    }

    /// Removes a container, keeping the order of the others
    pub fn remove(&mut self, id: FilterContainerId) -> VisibilityResult<FilterContainer> {
        let position = self
            .ids
            .iter()
            .position(|&registered| registered == id)
            .ok_or(VisibilityError::UnknownContainer(id.0))?;
        self.ids.remove(position);
        Ok(self.containers.remove(position))
    }

    pub fn get(&self, id: FilterContainerId) -> Option<&FilterContainer> {
        self.ids
            .iter()
            .position(|&registered| registered == id)
            .map(|position| &self.containers[position])
    }

    pub fn as_slice(&self) -> &[FilterContainer] {
        &self.containers
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisibilityBufferConfig;
    use crate::gpu::DeviceCapabilities;

    fn settings() -> VisibilitySettings {
        let config = VisibilityBufferConfig {
            filter_batch_size: 4,
            ..Default::default()
        };
        VisibilitySettings::new(config, &DeviceCapabilities::default()).unwrap()
    }

    fn flat(index_count: u32) -> FilterContainerDesc {
        FilterContainerDesc {
            index_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_flat_batch_count() {
        let settings = settings();
        assert_eq!(FilterContainer::new(flat(30), &settings).unwrap().filter_batch_count, 3);
        assert_eq!(FilterContainer::new(flat(24), &settings).unwrap().filter_batch_count, 2);
        assert_eq!(FilterContainer::new(flat(0), &settings).unwrap().filter_batch_count, 0);
    }

    #[test]
    fn test_rejects_invalid_descriptors() {
        let settings = settings();
        assert!(FilterContainer::new(flat(10), &settings).is_err());

        let desc = FilterContainerDesc { geometry_set: 2, ..flat(3) };
        assert!(matches!(
            FilterContainer::new(desc, &settings),
            Err(VisibilityError::GeometrySetOutOfRange { geometry_set: 2, .. })
        ));

        let clusters: Arc<[Cluster]> = vec![Cluster::unculled(0, 5)].into();
        let desc = FilterContainerDesc { clusters: Some(clusters), ..flat(15) };
        assert!(FilterContainer::new(desc, &settings).is_err());

        let clusters: Arc<[Cluster]> = vec![Cluster::unculled(4, 4)].into();
        let desc = FilterContainerDesc { clusters: Some(clusters), ..flat(15) };
        assert!(FilterContainer::new(desc, &settings).is_err());
    }

    #[test]
    fn test_cluster_batch_count() {
        let settings = settings();
        let clusters: Arc<[Cluster]> = vec![Cluster::unculled(0, 4), Cluster::unculled(4, 1)].into();
        let desc = FilterContainerDesc { clusters: Some(clusters), ..flat(15) };
        let container = FilterContainer::new(desc, &settings).unwrap();

        assert!(container.is_clustered());
        assert_eq!(container.filter_batch_count, 2);
    }

    #[test]
    fn test_validate_against_other_settings() {
        let container = FilterContainer::new(FilterContainerDesc { geometry_set: 1, ..flat(30) }, &settings()).unwrap();
        assert_eq!(container.filter_batch_count(), 3);

        let wider = VisibilitySettings::new(
            VisibilityBufferConfig { filter_batch_size: 8, ..Default::default() },
            &DeviceCapabilities::default(),
        )
        .unwrap();
        assert!(matches!(container.validate(&wider), Err(VisibilityError::InvalidConfig(_))));

        let single_set = VisibilitySettings::new(
            VisibilityBufferConfig {
                filter_batch_size: 4,
                num_geometry_sets: 1,
                max_index_count_per_geometry_set: vec![3000],
                ..Default::default()
            },
            &DeviceCapabilities::default(),
        )
        .unwrap();
        assert!(matches!(
            container.validate(&single_set),
            Err(VisibilityError::GeometrySetOutOfRange { geometry_set: 1, num_geometry_sets: 1 })
        ));
    }

    #[test]
    fn test_registry_keeps_order_on_removal() {
        let settings = settings();
        let mut set = FilterContainerSet::new();
        let ids: Vec<FilterContainerId> = (0..3)
            .map(|mesh_index| {
                let desc = FilterContainerDesc { mesh_index, ..flat(3) };
                set.insert(FilterContainer::new(desc, &settings).unwrap())
            })
            .collect();

        let removed = set.remove(ids[1]).unwrap();
        assert_eq!(removed.mesh_index, 1);
        assert!(set.get(ids[1]).is_none());
        assert!(matches!(set.remove(ids[1]), Err(VisibilityError::UnknownContainer(1))));

        let meshes: Vec<u32> = set.as_slice().iter().map(|c| c.mesh_index).collect();
        assert_eq!(meshes, vec![0, 2]);
    }
}
