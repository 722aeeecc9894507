//! Triangle clusters and cone based backface culling
//!
//! A cluster is a run of consecutive triangles of one mesh. Clusters whose
//! triangles all face away from every view can be rejected on the CPU
//! before any filter record is emitted for them.

use glam::Vec3;

use crate::constants::clusters::MAX_CONE_APEX_DISTANCE_SCALE;
use crate::error::{config_error, VisibilityError, VisibilityResult};

/// Cluster bounds and visibility cone, in object space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cluster {
    /// First triangle of the cluster, relative to the start of the mesh
    pub start_triangle: u32,
    pub triangle_count: u32,

    pub aabb_min: Vec3,
    pub aabb_max: Vec3,

    /// Apex of the cone enclosing every back-facing view direction
    pub cone_apex: Vec3,
    pub cone_axis: Vec3,
    pub cone_angle_cosine: f32,

    /// Invalid clusters are never culled
    pub valid: bool,
}

impl Cluster {
    /// Cluster that is always considered visible
    pub fn unculled(start_triangle: u32, triangle_count: u32) -> Self {
        Self {
            start_triangle,
            triangle_count,
            aabb_min: Vec3::ZERO,
            aabb_max: Vec3::ZERO,
            cone_apex: Vec3::ZERO,
            cone_axis: Vec3::ZERO,
            cone_angle_cosine: 0.0,
            valid: false,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.aabb_min + self.aabb_max) * 0.5
    }
}

/// Splits an indexed triangle list into clusters of `cluster_size` triangles
/// and computes their culling cones.
///
/// Two-sided meshes produce invalid (never culled) clusters.
pub fn build_clusters(
    positions: &[Vec3],
    indices: &[u32],
    cluster_size: u32,
    two_sided: bool,
) -> VisibilityResult<Vec<Cluster>> {
    if cluster_size == 0 {
        return Err(config_error("cluster size must be positive"));
    }
    if indices.len() % 3 != 0 {
        return Err(config_error(format!(
            "index count {} is not a multiple of 3",
            indices.len()
        )));
    }
    if let Some(&index) = indices.iter().find(|&&index| index as usize >= positions.len()) {
        return Err(VisibilityError::IndexOutOfRange {
            kind: "vertex",
            index,
            count: positions.len() as u32,
        });
    }

    let triangles: Vec<[Vec3; 3]> = indices
        .chunks_exact(3)
        .map(|tri| [positions[tri[0] as usize], positions[tri[1] as usize], positions[tri[2] as usize]])
        .collect();

    let clusters = triangles
        .chunks(cluster_size as usize)
        .enumerate()
        .map(|(i, chunk)| build_cluster(i as u32 * cluster_size, chunk, two_sided))
        .collect::<Vec<_>>();

    log::debug!(
        "[build_clusters] {} triangles -> {} clusters ({} valid)",
        triangles.len(),
        clusters.len(),
        clusters.iter().filter(|c| c.valid).count()
    );

    Ok(clusters)
}

fn build_cluster(start_triangle: u32, triangles: &[[Vec3; 3]], two_sided: bool) -> Cluster {
    let mut aabb_min = Vec3::splat(f32::INFINITY);
    let mut aabb_max = Vec3::splat(f32::NEG_INFINITY);
    let mut cone_axis = Vec3::ZERO;

    for triangle in triangles {
        for vertex in triangle {
            aabb_min = aabb_min.min(*vertex);
            aabb_max = aabb_max.max(*vertex);
        }
        cone_axis -= triangle_normal(triangle).normalize_or_zero();
    }

    let center = (aabb_min + aabb_max) * 0.5;
    let mut valid = !two_sided && cone_axis != Vec3::ZERO;
    let cone_axis = cone_axis.normalize_or_zero();

    // Cosine of the opening angle, minimized over the cluster
    let mut cone_opening = 1.0f32;
    let mut t = f32::NEG_INFINITY;

    if valid {
        // Intersect center + t * axis with every triangle plane, keep the max t
        for triangle in triangles {
            let normal = triangle_normal(triangle).normalize_or_zero();
            let directional_part = cone_axis.dot(-normal);

            if directional_part <= 0.0 {
                // Two triangles facing each other
                valid = false;
                break;
            }

            let td = (center - triangle[0]).dot(normal) / -directional_part;
            t = t.max(td);
            cone_opening = cone_opening.min(directional_part);
        }
    }

    let cone_apex = if valid { center + cone_axis * t } else { center };
    let cone_angle_cosine = (1.0 - cone_opening * cone_opening).max(0.0).sqrt();

    if valid {
        let aabb_size = (aabb_max - aabb_min).length();
        if (cone_apex - center).length() > MAX_CONE_APEX_DISTANCE_SCALE * aabb_size {
            valid = false;
        }
    }

    Cluster {
        start_triangle,
        triangle_count: triangles.len() as u32,
        aabb_min,
        aabb_max,
        cone_apex,
        cone_axis,
        cone_angle_cosine,
        valid,
    }
}

#[inline]
fn triangle_normal(triangle: &[Vec3; 3]) -> Vec3 {
    (triangle[1] - triangle[0]).cross(triangle[2] - triangle[0])
}

/// True when every eye lies inside the back-facing cone of the cluster.
///
/// `eyes` are camera positions in the object space of the cluster. Invalid
/// clusters and an empty eye list are never culled.
pub fn cull_cluster(cluster: &Cluster, eyes: &[Vec3]) -> bool {
    if !cluster.valid || eyes.is_empty() {
        return false;
    }

    !eyes.iter().any(|eye| {
        let direction = (*eye - cluster.cone_apex).normalize_or_zero();
        direction.dot(cluster.cone_axis) < cluster.cone_angle_cosine
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two triangles in the z = 0 plane, counter-clockwise seen from +z
    fn quad() -> (Vec<Vec3>, Vec<u32>) {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        (positions, vec![0, 1, 2, 0, 2, 3])
    }

    #[test]
    fn test_splits_into_cluster_size_runs() {
        let positions = vec![Vec3::X, Vec3::Y, Vec3::Z];
        let indices: Vec<u32> = std::iter::repeat([0, 1, 2]).take(10).flatten().collect();

        let clusters = build_clusters(&positions, &indices, 4, false).unwrap();
        let runs: Vec<(u32, u32)> = clusters.iter().map(|c| (c.start_triangle, c.triangle_count)).collect();
        assert_eq!(runs, vec![(0, 4), (4, 4), (8, 2)]);
    }

    #[test]
    fn test_flat_cluster_cone_points_away_from_front() {
        let (positions, indices) = quad();
        let clusters = build_clusters(&positions, &indices, 256, false).unwrap();
        let cluster = &clusters[0];

        assert!(cluster.valid);
        assert!((cluster.cone_axis - Vec3::NEG_Z).length() < 1e-5);
        assert!(cluster.cone_angle_cosine.abs() < 1e-5);
    }

    #[test]
    fn test_back_facing_cluster_is_culled() {
        let (positions, indices) = quad();
        let cluster = build_clusters(&positions, &indices, 256, false).unwrap()[0];

        assert!(!cull_cluster(&cluster, &[Vec3::new(0.5, 0.5, 5.0)]));
        assert!(cull_cluster(&cluster, &[Vec3::new(0.5, 0.5, -5.0)]));
        // Visible from any one of the views is enough
        assert!(!cull_cluster(
            &cluster,
            &[Vec3::new(0.5, 0.5, -5.0), Vec3::new(0.5, 0.5, 5.0)]
        ));
    }

    #[test]
    fn test_two_sided_clusters_are_never_culled() {
        let (positions, indices) = quad();
        let cluster = build_clusters(&positions, &indices, 256, true).unwrap()[0];

        assert!(!cluster.valid);
        assert!(!cull_cluster(&cluster, &[Vec3::new(0.5, 0.5, -5.0)]));
    }

    #[test]
    fn test_opposing_triangles_invalidate_cluster() {
        let (positions, _) = quad();
        // Same quad, second triangle wound the other way
        let indices = vec![0, 1, 2, 0, 3, 2, 0, 1, 3];
        let cluster = build_clusters(&positions, &indices, 256, false).unwrap()[0];
        assert!(!cluster.valid);
    }

    #[test]
    fn test_rejects_malformed_input() {
        let (positions, _) = quad();
        assert!(build_clusters(&positions, &[0, 1], 256, false).is_err());
        assert!(build_clusters(&positions, &[0, 1, 9], 256, false).is_err());
        assert!(build_clusters(&positions, &[0, 1, 2], 0, false).is_err());
    }
}
