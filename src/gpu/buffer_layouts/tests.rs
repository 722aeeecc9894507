//! Tests for GPU buffer layouts

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::mem;

    #[test]
    fn test_buffer_sizes() {
        assert_eq!(mem::size_of::<FilterBatchData>(), 32);
        assert_eq!(mem::size_of::<FilterDispatchGroupData>(), 16);
        assert_eq!(mem::size_of::<PreSkinBatchData>(), 32);
        assert_eq!(mem::size_of::<IndirectDrawIndexArguments>(), 20);
        assert_eq!(mem::size_of::<UncompactedDrawArguments>(), 16);
        assert_eq!(mem::size_of::<VisibilityBufferConstants>(), 16);
        assert_eq!(mem::size_of::<PreSkinBufferOffsets>(), 16);

        assert_eq!(
            INDIRECT_DRAW_INDEX_ELEMENTS as usize * 4,
            mem::size_of::<IndirectDrawIndexArguments>()
        );
    }

    #[test]
    fn test_face_count_geometry_set_packing() {
        let packed = pack_face_count_geometry_set(200, 3);
        assert_eq!(unpack_face_count(packed), 200);
        assert_eq!(unpack_geometry_set(packed), 3);

        let record = FilterBatchData {
            face_count_geometry_set: pack_face_count_geometry_set(1024, 1),
            ..Default::default()
        };
        assert_eq!(record.face_count(), 1024);
        assert_eq!(record.geometry_set(), 1);
    }

    #[test]
    fn test_packing_masks_out_of_range_geometry_set() {
        // Geometry set bits never leak into the face count
        let packed = pack_face_count_geometry_set(7, 0xFF);
        assert_eq!(unpack_face_count(packed), 7);
        assert_eq!(unpack_geometry_set(packed), 3);
    }

    #[test]
    fn test_initial_arguments_start_instance_draw_id() {
        let dwords = initial_indirect_arguments(3, 8, false);
        assert_eq!(dwords.len(), 24);

        for draw in 0..3 {
            let record = &dwords[draw * 8..draw * 8 + 5];
            let args: &IndirectDrawIndexArguments = bytemuck::from_bytes(bytemuck::cast_slice(record));
            assert_eq!(args.index_count, 0);
            assert_eq!(args.instance_count, 1);
            assert_eq!(args.start_instance, draw as u32);
        }
    }

    #[test]
    fn test_initial_arguments_root_constant_draw_id() {
        let dwords = initial_indirect_arguments(2, 8, true);

        assert_eq!(dwords[0], 0);
        assert_eq!(dwords[8], 1);
        // Draw arguments follow the root constant
        assert_eq!(dwords[1 + IndirectDrawIndexArguments::INSTANCE_COUNT_ELEMENT], 1);
        assert_eq!(dwords[9 + IndirectDrawIndexArguments::START_INSTANCE_ELEMENT], 0);
    }
}
