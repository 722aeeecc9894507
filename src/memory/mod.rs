/// Memory primitives of the visibility buffer
///
/// Ring allocation of per-frame batch data, checked CPU staging arenas,
/// aliased allocation bookkeeping and frame pacing.

pub mod aliased_region;
pub mod batch_arena;
pub mod frame_pacer;
pub mod ring_buffer;

pub use aliased_region::{AliasedRegion, AliasedView, ViewAccess};
pub use batch_arena::BatchArena;
pub use frame_pacer::FramePacer;
pub use ring_buffer::{GpuRingBuffer, RingOffset};

/// Rounds `value` up to a multiple of `multiple`
#[inline]
pub fn round_up(value: u64, multiple: u64) -> u64 {
    let multiple = multiple.max(1);
    value.div_ceil(multiple) * multiple
}

/// `round_up` for record counts
#[inline]
pub fn round_up_u32(value: u32, multiple: u32) -> u32 {
    let multiple = multiple.max(1);
    value.div_ceil(multiple) * multiple
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 256), 0);
        assert_eq!(round_up(1, 256), 256);
        assert_eq!(round_up(256, 256), 256);
        assert_eq!(round_up(300, 256), 512);
        assert_eq!(round_up_u32(3, 8), 8);
        assert_eq!(round_up_u32(5, 1), 5);
    }
}
