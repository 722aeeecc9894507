//! Visibility buffer error handling
//!
//! Every configuration or capacity violation surfaces as a `VisibilityError`.
//! None of them are recoverable mid-frame; callers are expected to abort the
//! frame (or the process) and fix the configuration.

use thiserror::Error;

use crate::gpu::BufferId;

#[derive(Debug, Error)]
pub enum VisibilityError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Failed to read configuration file '{path}': {error}")]
    ConfigIo { path: String, error: std::io::Error },

    #[error("Ring buffer '{buffer}' cannot hold {requested} bytes (capacity {capacity})")]
    RingBufferExhausted {
        buffer: String,
        requested: u64,
        capacity: u64,
    },

    #[error("Batch capacity exceeded for {stage}: {requested} records requested, {capacity} available")]
    BatchCapacityExceeded {
        stage: String,
        requested: u32,
        capacity: u32,
    },

    #[error("Draw capacity exceeded: {requested} draws requested, maximum is {maximum}")]
    DrawCapacityExceeded { requested: u32, maximum: u32 },

    #[error("Dispatch group capacity exceeded: {requested} groups requested, maximum is {maximum}")]
    DispatchGroupCapacityExceeded { requested: u32, maximum: u32 },

    #[error("{kind} index {index} out of range (count {count})")]
    IndexOutOfRange {
        kind: &'static str,
        index: u32,
        count: u32,
    },

    #[error("Geometry set {geometry_set} out of range ({num_geometry_sets} configured)")]
    GeometrySetOutOfRange {
        geometry_set: u32,
        num_geometry_sets: u32,
    },

    #[error("Aliased region '{region}' overlaps [{start}, {end}) owned by '{owner}'")]
    AliasOverlap {
        region: String,
        owner: String,
        start: u64,
        end: u64,
    },

    #[error("Unknown buffer handle {0:?}")]
    UnknownBuffer(BufferId),

    #[error("Unknown filter container {0}")]
    UnknownContainer(u32),

    #[error("Pre-skin pass is disabled in the configuration")]
    PreSkinDisabled,

    #[error("GPU operation '{operation}' failed: {error}")]
    Backend { operation: String, error: String },
}

/// Type alias for visibility buffer operation results
pub type VisibilityResult<T> = Result<T, VisibilityError>;

/// Helper trait for adapting foreign errors
pub trait VisibilityErrorContext<T> {
    fn visibility_context(self, operation: &str) -> VisibilityResult<T>;
}

impl<T, E> VisibilityErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn visibility_context(self, operation: &str) -> VisibilityResult<T> {
        self.map_err(|e| backend_error(operation, e))
    }
}

/// Create a GPU backend error
pub fn backend_error(operation: &str, error: impl std::fmt::Display) -> VisibilityError {
    VisibilityError::Backend {
        operation: operation.to_string(),
        error: error.to_string(),
    }
}

/// Create a configuration error
pub fn config_error(message: impl Into<String>) -> VisibilityError {
    VisibilityError::InvalidConfig(message.into())
}

/// Check `index < count`
pub fn check_index(kind: &'static str, index: u32, count: u32) -> VisibilityResult<()> {
    if index < count {
        Ok(())
    } else {
        Err(VisibilityError::IndexOutOfRange { kind, index, count })
    }
}
