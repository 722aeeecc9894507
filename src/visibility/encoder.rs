//! Batch encoder
//!
//! Turns an ordered list of filter containers into `FilterBatchData` records
//! and keeps track of which indirect draw every record contributes to. A
//! draw never spans two chunks or two containers; it is closed when its
//! chunk fills, when its container ends, or when it would exceed the
//! primitive limit of one indirect draw.

use glam::Vec3;

use crate::error::{VisibilityError, VisibilityResult};
use crate::gpu::{pack_face_count_geometry_set, CommandRecorder, FilterBatchData};
use crate::visibility::chunker::{ChunkerSummary, DispatchChunker};
use crate::visibility::clusters::cull_cluster;
use crate::visibility::container::{FilterContainer, FilterContainerKind};
use crate::visibility::filtering::FilterPassStats;

pub struct BatchEncoder<'a> {
    chunker: DispatchChunker<'a, FilterBatchData>,
    batch_size: u32,
    max_draws: u32,
    max_primitives_per_draw: u32,

    /// Draws closed so far, also the draw slot of the open draw
    draw_index: u32,
    /// Chunk record where the open draw began
    draw_batch_start: u32,
    draw_triangles: u32,
    draw_records: u32,
    draw_geometry_set: u32,

    stats: FilterPassStats,
}

impl<'a> BatchEncoder<'a> {
    pub fn new(
        chunker: DispatchChunker<'a, FilterBatchData>,
        batch_size: u32,
        max_draws: u32,
        max_primitives_per_draw: u32,
    ) -> Self {
        Self {
            chunker,
            batch_size,
            max_draws,
            max_primitives_per_draw,
            draw_index: 0,
            draw_batch_start: 0,
            draw_triangles: 0,
            draw_records: 0,
            draw_geometry_set: 0,
            stats: FilterPassStats::default(),
        }
    }

    /// Emits every batch of `container` and closes its last draw.
    ///
    /// `eyes` are the object space view positions used by cluster culling.
    pub fn encode_container(
        &mut self,
        cmd: &mut dyn CommandRecorder,
        container: &FilterContainer,
        eyes: &[Vec3],
    ) -> VisibilityResult<()> {
        match &container.kind {
            FilterContainerKind::Flat => {
                for batch in 0..container.filter_batch_count {
                    let first_triangle = batch * self.batch_size;
                    let last_triangle = (first_triangle + self.batch_size).min(container.triangle_count);
                    self.stats.total_processed_batches += 1;
                    self.emit(cmd, container, first_triangle, last_triangle - first_triangle)?;
                }
            }
            FilterContainerKind::Clusters(clusters) => {
                for cluster in clusters.iter() {
                    self.stats.total_processed_batches += 1;
                    self.stats.total_processed_clusters += 1;

                    if cull_cluster(cluster, eyes) {
                        self.stats.total_culled_clusters += 1;
                        continue;
                    }
                    if cluster.triangle_count == 0 {
                        continue;
                    }
                    self.emit(cmd, container, cluster.start_triangle, cluster.triangle_count)?;
                }
            }
        }

        self.close_draw()
    }

    fn emit(
        &mut self,
        cmd: &mut dyn CommandRecorder,
        container: &FilterContainer,
        first_triangle: u32,
        face_count: u32,
    ) -> VisibilityResult<()> {
        if self.draw_records > 0 && self.draw_triangles + face_count > self.max_primitives_per_draw {
            log::trace!(
                "[BatchEncoder::emit] Splitting draw {} at {} triangles",
                self.draw_index,
                self.draw_triangles
            );
            self.close_draw()?;
            self.flush(cmd)?;
        }

        let record = FilterBatchData {
            accum_draw_index: self.draw_index,
            face_count_geometry_set: pack_face_count_geometry_set(face_count, container.geometry_set),
            mesh_index: container.mesh_index,
            instance_data_index: container.instance_index,
            index_offset: first_triangle * 3,
            output_index_offset: self.draw_triangles,
            draw_batch_start: self.draw_batch_start,
            _pad: 0,
        };

        let full = self.chunker.append(record)?;

        self.draw_records += 1;
        self.draw_triangles += face_count;
        self.draw_geometry_set = container.geometry_set;
        self.stats.total_submitted_batches += 1;
        self.stats.total_submitted_triangles += face_count;

        if full {
            self.close_draw()?;
            self.flush(cmd)?;
        }
        Ok(())
    }

    fn close_draw(&mut self) -> VisibilityResult<()> {
        if self.draw_records == 0 {
            return Ok(());
        }
        if self.draw_index >= self.max_draws {
            return Err(VisibilityError::DrawCapacityExceeded {
                requested: self.draw_index + 1,
                maximum: self.max_draws,
            });
        }

        self.draw_index += 1;
        self.stats.geomset_draw_counts[self.draw_geometry_set as usize] += 1;
        self.stats.total_draw_count += 1;

        self.draw_records = 0;
        self.draw_triangles = 0;
        self.draw_batch_start = self.chunker.current_count();
        Ok(())
    }

    fn flush(&mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<()> {
        self.chunker.flush(cmd)?;
        self.draw_batch_start = 0;
        Ok(())
    }

    /// Flushes the trailing chunk and returns the accumulated statistics
    pub fn finish(mut self, cmd: &mut dyn CommandRecorder) -> VisibilityResult<FilterPassStats> {
        self.close_draw()?;
        let ChunkerSummary { dispatches, .. } = self.chunker.finish(cmd)?;
        self.stats.filter_dispatches = dispatches;
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gpu::{BufferId, ComputeStage, RecordingRecorder};
    use crate::memory::{BatchArena, RingOffset};
    use crate::visibility::chunker::ChunkLayout;
    use crate::visibility::clusters::Cluster;

    const REGION: RingOffset = RingOffset {
        buffer: BufferId(0),
        offset: 0,
        size: 1 << 20,
    };

    fn flat(triangle_count: u32, batch_size: u32, geometry_set: u32) -> FilterContainer {
        FilterContainer {
            kind: FilterContainerKind::Flat,
            geometry_set,
            mesh_index: 0,
            instance_index: 0,
            triangle_count,
            filter_batch_count: triangle_count.div_ceil(batch_size),
        }
    }

    /// Encodes `containers` and returns the uploaded records with the stats
    fn encode(
        containers: &[FilterContainer],
        batch_size: u32,
        max_records: u32,
        max_primitives: u32,
    ) -> VisibilityResult<(Vec<FilterBatchData>, FilterPassStats, RecordingRecorder)> {
        let layout = ChunkLayout::new(32, max_records, 64, 256)?;
        let mut arena = BatchArena::<FilterBatchData>::new(layout.region_records());
        let mut cmd = RecordingRecorder::new();
        cmd.bind_pipeline(ComputeStage::TriangleFiltering, Default::default())?;

        let chunker = DispatchChunker::new(&mut arena, layout, REGION, ComputeStage::TriangleFiltering)?;
        let mut encoder = BatchEncoder::new(chunker, batch_size, 4096, max_primitives);
        for container in containers {
            encoder.encode_container(&mut cmd, container, &[])?;
        }
        let stats = encoder.finish(&mut cmd)?;

        let mut records = Vec::new();
        for (groups, window) in cmd.dispatches(ComputeStage::TriangleFiltering) {
            let window = window.expect("filter dispatch without batch data");
            records.extend(cmd.uploaded_records::<FilterBatchData>(window.buffer, window.offset, groups[0] as usize));
        }
        Ok((records, stats, cmd))
    }

    #[test]
    fn test_flat_container_batches() {
        let (records, stats, _) = encode(&[flat(10, 4, 0)], 4, 64, u32::MAX).unwrap();

        let faces: Vec<u32> = records.iter().map(|r| r.face_count()).collect();
        let output: Vec<u32> = records.iter().map(|r| r.output_index_offset).collect();
        let index: Vec<u32> = records.iter().map(|r| r.index_offset).collect();
        assert_eq!(faces, vec![4, 4, 2]);
        assert_eq!(output, vec![0, 4, 8]);
        assert_eq!(index, vec![0, 12, 24]);
        assert!(records.iter().all(|r| r.accum_draw_index == 0 && r.draw_batch_start == 0));
        assert_eq!(stats.total_draw_count, 1);
    }

    #[test]
    fn test_batch_completeness() {
        for (triangles, batch_size) in [(1, 4), (4, 4), (5, 4), (1000, 64), (255, 256), (257, 256)] {
            let (records, _, _) = encode(&[flat(triangles, batch_size, 0)], batch_size, 8, u32::MAX).unwrap();
            assert_eq!(records.len() as u32, triangles.div_ceil(batch_size));
            assert_eq!(records.iter().map(|r| r.face_count()).sum::<u32>(), triangles);
        }
    }

    #[test]
    fn test_full_chunk_starts_new_draw() {
        let (records, stats, _) = encode(&[flat(20, 4, 1)], 4, 3, u32::MAX).unwrap();

        let draws: Vec<u32> = records.iter().map(|r| r.accum_draw_index).collect();
        let output: Vec<u32> = records.iter().map(|r| r.output_index_offset).collect();
        assert_eq!(draws, vec![0, 0, 0, 1, 1]);
        assert_eq!(output, vec![0, 4, 8, 0, 4]);
        assert_eq!(stats.total_draw_count, 2);
        assert_eq!(stats.geomset_draw_counts[1], 2);
        assert_eq!(stats.filter_dispatches, 2);
    }

    #[test]
    fn test_container_end_closes_draw_inside_chunk() {
        let containers = [flat(8, 4, 0), flat(4, 4, 1)];
        let (records, stats, _) = encode(&containers, 4, 8, u32::MAX).unwrap();

        let draws: Vec<u32> = records.iter().map(|r| r.accum_draw_index).collect();
        let starts: Vec<u32> = records.iter().map(|r| r.draw_batch_start).collect();
        assert_eq!(draws, vec![0, 0, 1]);
        assert_eq!(starts, vec![0, 0, 2]);
        assert_eq!(stats.geomset_draw_counts[..2], [1, 1]);
        assert_eq!(stats.filter_dispatches, 1);
    }

    #[test]
    fn test_empty_container_adds_nothing() {
        let containers = [flat(4, 4, 0), flat(0, 4, 0), flat(4, 4, 0)];
        let (records, stats, _) = encode(&containers, 4, 8, u32::MAX).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(stats.total_draw_count, 2);
    }

    #[test]
    fn test_primitive_limit_splits_draw() {
        let (records, stats, _) = encode(&[flat(12, 4, 0)], 4, 8, 8).unwrap();

        let draws: Vec<u32> = records.iter().map(|r| r.accum_draw_index).collect();
        let output: Vec<u32> = records.iter().map(|r| r.output_index_offset).collect();
        assert_eq!(draws, vec![0, 0, 1]);
        assert_eq!(output, vec![0, 4, 0]);
        assert_eq!(stats.total_draw_count, 2);
        // The split flushes the chunk early
        assert_eq!(stats.filter_dispatches, 2);
    }

    #[test]
    fn test_culled_clusters_emit_nothing() {
        let mut back_facing = Cluster::unculled(4, 4);
        back_facing.valid = true;
        back_facing.cone_axis = Vec3::Z;
        back_facing.cone_angle_cosine = 0.5;

        let clusters: Arc<[Cluster]> = vec![Cluster::unculled(0, 4), back_facing, Cluster::unculled(8, 2)].into();
        let container = FilterContainer {
            kind: FilterContainerKind::Clusters(clusters),
            geometry_set: 0,
            mesh_index: 3,
            instance_index: 7,
            triangle_count: 10,
            filter_batch_count: 3,
        };

        let layout = ChunkLayout::new(32, 8, 4, 256).unwrap();
        let mut arena = BatchArena::<FilterBatchData>::new(layout.region_records());
        let mut cmd = RecordingRecorder::new();
        let chunker = DispatchChunker::new(&mut arena, layout, REGION, ComputeStage::TriangleFiltering).unwrap();
        let mut encoder = BatchEncoder::new(chunker, 4, 16, u32::MAX);
        encoder.encode_container(&mut cmd, &container, &[Vec3::new(0.0, 0.0, 10.0)]).unwrap();
        let stats = encoder.finish(&mut cmd).unwrap();

        assert_eq!(stats.total_processed_clusters, 3);
        assert_eq!(stats.total_culled_clusters, 1);
        assert_eq!(stats.total_submitted_batches, 2);

        let records = cmd.uploaded_records::<FilterBatchData>(BufferId(0), 0, 2);
        let index: Vec<u32> = records.iter().map(|r| r.index_offset).collect();
        assert_eq!(index, vec![0, 24]);
        assert!(records.iter().all(|r| r.mesh_index == 3 && r.instance_data_index == 7));
    }

    #[test]
    fn test_draw_capacity_exceeded() {
        let layout = ChunkLayout::new(32, 1, 16, 256).unwrap();
        let mut arena = BatchArena::<FilterBatchData>::new(layout.region_records());
        let mut cmd = RecordingRecorder::new();
        let chunker = DispatchChunker::new(&mut arena, layout, REGION, ComputeStage::TriangleFiltering).unwrap();
        let mut encoder = BatchEncoder::new(chunker, 4, 2, u32::MAX);

        let result = encoder.encode_container(&mut cmd, &flat(12, 4, 0), &[]);
        assert!(matches!(
            result,
            Err(VisibilityError::DrawCapacityExceeded { requested: 3, maximum: 2 })
        ));
    }
}
