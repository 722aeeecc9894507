/// Configuration Loading Tests
///
/// Loads visibility buffer configurations from disk and initializes the
/// subsystem from them.

use std::io::Write;

use visibility_buffer::gpu::{DeviceCapabilities, RecordingDevice};
use visibility_buffer::{VisibilityBuffer, VisibilityBufferConfig, VisibilityError};

#[test]
fn test_load_and_init_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
num_frames = 3
num_buffers = 2
max_draws_indirect = 512
filter_batch_size = 128
filter_batch_count = 32
num_geometry_sets = 2
max_index_count_per_geometry_set = [30000, 6000]
enable_pre_skin_pass = true
pre_skin_batch_size = 64
"#
    )
    .unwrap();

    let config = VisibilityBufferConfig::load(file.path()).unwrap();
    assert_eq!(config.num_frames, 3);
    assert_eq!(config.filter_batch_size, 128);
    assert!(config.enable_pre_skin_pass);
    assert_eq!(config.total_max_index_count(), 36000);

    let mut device = RecordingDevice::new(DeviceCapabilities::default());
    let visibility = VisibilityBuffer::init(&mut device, config).unwrap();
    assert_eq!(visibility.resources().filter_dispatch_group_data.len(), 3);
    assert!(visibility.pre_skin_ring().is_some());

    visibility.exit(&mut device).unwrap();
    assert_eq!(device.live_buffer_count(), 0);
    println!("✅ Configuration loaded from {}", file.path().display());
}

#[test]
fn test_saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("visibility_buffer.toml");

    let config = VisibilityBufferConfig {
        num_views: 2,
        enable_triangle_binning: true,
        ..Default::default()
    };
    std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

    assert_eq!(VisibilityBufferConfig::load(&path).unwrap(), config);
    println!("✅ Saved configuration loads back unchanged");
}

#[test]
fn test_load_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.toml");
    assert!(matches!(
        VisibilityBufferConfig::load(&missing),
        Err(VisibilityError::ConfigIo { .. })
    ));

    let malformed = dir.path().join("malformed.toml");
    std::fs::write(&malformed, "num_frames = \"two\"").unwrap();
    assert!(matches!(
        VisibilityBufferConfig::load(&malformed),
        Err(VisibilityError::ConfigParse(_))
    ));

    // Parses, but the index budgets do not match the geometry sets
    let inconsistent = dir.path().join("inconsistent.toml");
    std::fs::write(&inconsistent, "num_geometry_sets = 3\nmax_index_count_per_geometry_set = [300]").unwrap();
    assert!(matches!(
        VisibilityBufferConfig::load(&inconsistent),
        Err(VisibilityError::InvalidConfig(_))
    ));
    println!("✅ Missing, malformed and inconsistent files are rejected");
}
