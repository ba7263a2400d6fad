use burn::record::RecorderError;
use thiserror::Error;

/// Raised while resolving configuration into modules. Every variant is fatal
/// for the model being built.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid kernel initializer: {0:?}")]
    UnknownInitializer(String),

    #[error("invalid kernel regularizer: {0:?}")]
    UnknownRegularizer(String),

    #[error("invalid activation: {0:?}")]
    UnknownActivation(String),

    #[error("invalid upscale method: {0:?} (expected espcn, nearest or deconv)")]
    UnknownUpscaleMethod(String),

    #[error("invalid residual placement: {0:?} (expected front or behind)")]
    UnknownPlacement(String),

    #[error("no layer pattern matches {0:?}")]
    UnknownLayerName(String),

    #[error("layer name {name:?} resolves to {found}, expected {expected}")]
    LayerKindMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("scale factor must be positive on both axes, got ({x}, {y})")]
    InvalidScale { x: usize, y: usize },

    #[error("{layer}: strides {strides:?} do not fit a {rank}-d kernel")]
    InvalidStride {
        layer: &'static str,
        strides: Vec<usize>,
        rank: usize,
    },

    #[error("{layer}: kernel {kernel} with dilation {dilation} has an even extent, 'same' padding is ambiguous")]
    EvenKernel {
        layer: &'static str,
        kernel: usize,
        dilation: usize,
    },

    #[error("{layer} does not support {option}")]
    Unsupported {
        layer: &'static str,
        option: &'static str,
    },

    #[error("group norm needs channels divisible by {groups}, got {channels}")]
    GroupNormChannels { channels: usize, groups: usize },

    #[error("initializer produced {actual} values for a kernel of {expected}")]
    InitializerShape { expected: usize, actual: usize },

    #[error("{layer}: {what} must be positive")]
    ZeroExtent {
        layer: &'static str,
        what: &'static str,
    },

    #[error("custom regularizer was registered for a different backend")]
    RegularizerBackend,

    #[error("unknown feature layer: {0:?}")]
    UnknownFeatureLayer(String),
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("batch {what}: expected {expected:?}, got {actual:?}")]
    BatchShape {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Record(#[from] RecorderError),
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
