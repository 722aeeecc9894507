//! Visibility buffer configuration
//!
//! `VisibilityBufferConfig` is the user-facing, serializable description of
//! the subsystem. `VisibilitySettings` is derived from it once at init
//! together with the device capabilities and is handed by reference to every
//! pass; nothing in the subsystem reads global state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{limits, threads, layout};
use crate::error::{config_error, VisibilityError, VisibilityResult};
use crate::gpu::{DeviceCapabilities, FilterBatchData, PreSkinBatchData, INDIRECT_DRAW_INDEX_ELEMENTS};
use crate::visibility::ChunkLayout;

/// Configuration consumed by `VisibilityBuffer::init`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityBufferConfig {
    /// Frames in flight for CPU-generated data (ring buffers, dispatch groups)
    pub num_frames: u32,

    /// Buffering depth for GPU-generated data (filtered indices, draw arguments)
    pub num_buffers: u32,

    pub max_draws_indirect: u32,
    pub max_primitives_per_draw_indirect: u32,

    /// u32 elements per indirect draw argument record
    pub indirect_element_count: u32,

    /// Records per filter dispatch
    pub filter_batch_count: u32,

    /// Triangles per filter record
    pub filter_batch_size: u32,

    pub num_geometry_sets: u32,
    pub num_views: u32,

    /// Index budget of each geometry set, used to size filtered index buffers
    pub max_index_count_per_geometry_set: Vec<u32>,

    /// Threads per group of the clear and compaction shaders
    pub clear_thread_count: u32,

    /// Allocate the per-buffer triangle bin buffer
    pub enable_triangle_binning: bool,

    pub enable_pre_skin_pass: bool,
    pub pre_skin_batch_size: u32,
    pub pre_skin_batch_count: u32,

    pub use_indirect_command_buffer: bool,
    pub use_indirect_root_constant: bool,
}

impl Default for VisibilityBufferConfig {
    fn default() -> Self {
        Self {
            num_frames: 2,
            num_buffers: 2,
            max_draws_indirect: 4096,
            max_primitives_per_draw_indirect: 1 << 23,
            indirect_element_count: layout::DEFAULT_INDIRECT_ELEMENT_COUNT,
            filter_batch_count: 64,
            filter_batch_size: threads::DEFAULT_FILTER_BATCH_SIZE,
            num_geometry_sets: 2,
            num_views: 1,
            max_index_count_per_geometry_set: vec![3 * 1_048_576, 3 * 262_144],
            clear_thread_count: threads::CLEAR_THREAD_COUNT,
            enable_triangle_binning: false,
            enable_pre_skin_pass: false,
            pre_skin_batch_size: threads::DEFAULT_PRE_SKIN_BATCH_SIZE,
            pre_skin_batch_count: 32,
            use_indirect_command_buffer: false,
            use_indirect_root_constant: false,
        }
    }
}

impl VisibilityBufferConfig {
    /// Parse a TOML document; missing keys take their default value
    pub fn from_toml_str(source: &str) -> VisibilityResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> VisibilityResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|error| VisibilityError::ConfigIo {
            path: path.display().to_string(),
            error,
        })?;

        log::info!("[VisibilityBufferConfig::load] Loading {}", path.display());
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> VisibilityResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every init-time invariant
    pub fn validate(&self) -> VisibilityResult<()> {
        check_range("num_frames", self.num_frames, 1, limits::MAX_NUM_FRAMES)?;
        check_range("num_buffers", self.num_buffers, 1, limits::MAX_NUM_BUFFERS)?;
        check_range("num_geometry_sets", self.num_geometry_sets, 1, limits::MAX_GEOMETRY_SETS)?;
        check_range("num_views", self.num_views, 1, limits::MAX_NUM_VIEWS)?;
        check_range("filter_batch_size", self.filter_batch_size, 1, limits::MAX_FILTER_BATCH_SIZE)?;
        check_range("filter_batch_count", self.filter_batch_count, 1, u32::MAX)?;
        check_range("max_draws_indirect", self.max_draws_indirect, 1, u32::MAX)?;
        check_range("max_primitives_per_draw_indirect", self.max_primitives_per_draw_indirect, 1, u32::MAX)?;
        check_range("clear_thread_count", self.clear_thread_count, 1, u32::MAX)?;

        let min_elements = INDIRECT_DRAW_INDEX_ELEMENTS + u32::from(self.use_indirect_root_constant);
        if self.indirect_element_count < min_elements {
            return Err(config_error(format!(
                "indirect_element_count {} is smaller than the {} elements of one draw record",
                self.indirect_element_count, min_elements
            )));
        }

        if self.max_index_count_per_geometry_set.len() != self.num_geometry_sets as usize {
            return Err(config_error(format!(
                "max_index_count_per_geometry_set has {} entries for {} geometry sets",
                self.max_index_count_per_geometry_set.len(),
                self.num_geometry_sets
            )));
        }
        if let Some(set) = self.max_index_count_per_geometry_set.iter().position(|&count| count == 0) {
            return Err(config_error(format!("geometry set {} has a zero index budget", set)));
        }

        if self.enable_pre_skin_pass {
            check_range("pre_skin_batch_size", self.pre_skin_batch_size, 1, limits::MAX_FILTER_BATCH_SIZE)?;
            check_range("pre_skin_batch_count", self.pre_skin_batch_count, 1, u32::MAX)?;
        }

        Ok(())
    }

    /// Sum of the per geometry set index budgets
    pub fn total_max_index_count(&self) -> u64 {
        self.max_index_count_per_geometry_set.iter().map(|&count| count as u64).sum()
    }
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> VisibilityResult<()> {
    if value < min || value > max {
        return Err(config_error(format!("{} = {} is outside [{}, {}]", name, value, min, max)));
    }
    Ok(())
}

/// Batch data chunks per frame: `max(1, 512 / batch_size) * 16`
pub fn batch_chunks_per_frame(batch_size: u32) -> u32 {
    (limits::FILTER_CHUNK_TRIANGLE_BUDGET / batch_size).max(1) * limits::FILTER_CHUNKS_PER_BUDGET
}

/// Runtime settings derived from the configuration and the device
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilitySettings {
    config: VisibilityBufferConfig,
    pub uniform_buffer_alignment: u64,
    pub use_indirect_command_buffer: bool,
    pub use_indirect_root_constant: bool,
    pub filter_layout: ChunkLayout,
    pub pre_skin_layout: Option<ChunkLayout>,
    /// Capacity of the per-frame dispatch group buffer
    pub max_filter_batches: u32,
}

impl VisibilitySettings {
    pub fn new(config: VisibilityBufferConfig, caps: &DeviceCapabilities) -> VisibilityResult<Self> {
        config.validate()?;

        let uniform_buffer_alignment = caps.uniform_buffer_alignment.max(1);

        let filter_layout = ChunkLayout::new(
            std::mem::size_of::<FilterBatchData>() as u64,
            config.filter_batch_count,
            batch_chunks_per_frame(config.filter_batch_size),
            uniform_buffer_alignment,
        )?;

        let pre_skin_layout = if config.enable_pre_skin_pass {
            Some(ChunkLayout::new(
                std::mem::size_of::<PreSkinBatchData>() as u64,
                config.pre_skin_batch_count,
                batch_chunks_per_frame(config.pre_skin_batch_size),
                uniform_buffer_alignment,
            )?)
        } else {
            None
        };

        // Assume at least half of every batch is filled
        let half_batch = (config.filter_batch_size >> 1).max(1) as u64;
        let max_filter_batches = ((config.total_max_index_count() / 3) / half_batch).max(1);
        let max_filter_batches = u32::try_from(max_filter_batches)
            .map_err(|_| config_error("index budget overflows the dispatch group buffer"))?;

        if config.use_indirect_command_buffer && !caps.indirect_command_buffer {
            log::warn!("[VisibilitySettings::new] Indirect command buffers unsupported, falling back to argument buffers");
        }
        if config.use_indirect_root_constant && !caps.indirect_root_constant {
            log::warn!("[VisibilitySettings::new] Indirect root constants unsupported, draw ids go through start instance");
        }

        Ok(Self {
            uniform_buffer_alignment,
            use_indirect_command_buffer: config.use_indirect_command_buffer && caps.indirect_command_buffer,
            use_indirect_root_constant: config.use_indirect_root_constant && caps.indirect_root_constant,
            filter_layout,
            pre_skin_layout,
            max_filter_batches,
            config,
        })
    }

    pub fn config(&self) -> &VisibilityBufferConfig {
        &self.config
    }

    /// Groups of the clear and compaction dispatches
    pub fn clear_dispatch_groups(&self) -> u32 {
        self.config.max_draws_indirect.div_ceil(self.config.clear_thread_count)
    }

    /// `frames * (alignment padding + per frame batch region)`
    pub fn filter_ring_buffer_size(&self) -> u64 {
        self.config.num_frames as u64 * (self.uniform_buffer_alignment + self.filter_layout.region_bytes())
    }

    pub fn pre_skin_ring_buffer_size(&self) -> Option<u64> {
        self.pre_skin_layout.as_ref().map(|layout| {
            self.config.num_frames as u64 * (self.uniform_buffer_alignment + layout.region_bytes())
        })
    }
}
