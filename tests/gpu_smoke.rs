/// GPU Smoke Tests
///
/// Creates the visibility buffer resources on a real wgpu device. Skipped
/// when no adapter is available.

use visibility_buffer::gpu::{GpuDevice, WgpuDevice};
use visibility_buffer::{VisibilityBuffer, VisibilityBufferConfig};

/// Initialize GPU context for tests
fn init_gpu() -> Option<WgpuDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    WgpuDevice::request_headless_blocking().ok()
}

fn small_config() -> VisibilityBufferConfig {
    VisibilityBufferConfig {
        max_draws_indirect: 1024,
        filter_batch_count: 16,
        max_index_count_per_geometry_set: vec![3 * 65_536, 3 * 16_384],
        enable_pre_skin_pass: true,
        ..Default::default()
    }
}

#[test]
fn test_init_allocates_buffers_on_device() {
    let Some(mut device) = init_gpu() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let caps = device.capabilities();
    assert!(caps.uniform_buffer_alignment.is_power_of_two());

    let visibility = VisibilityBuffer::init(&mut device, small_config()).unwrap();
    let sizes = *visibility.sizes();

    let ring = device.buffer(visibility.filter_ring().buffer()).unwrap();
    assert_eq!(ring.size(), sizes.filter_ring);

    let filtered = visibility.filtered_index_buffer(0, 0).unwrap();
    assert_eq!(device.buffer(filtered).unwrap().size(), sizes.filtered_index);

    let args = visibility.filtered_indirect_args_buffer(1, 1, 0).unwrap();
    assert_eq!(device.buffer(args).unwrap().size(), sizes.filtered_indirect_args);

    visibility.exit(&mut device).unwrap();
    assert!(device.buffer(filtered).is_err());
    println!("✅ Visibility buffer resources created on {:?}", device.device().features());
}

#[test]
fn test_reinit_on_device() {
    let Some(mut device) = init_gpu() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    for _ in 0..2 {
        let visibility = VisibilityBuffer::init(&mut device, small_config()).unwrap();
        visibility.exit(&mut device).unwrap();
    }

    println!("✅ Repeated init and exit on the GPU device");
}
