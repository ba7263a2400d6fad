pub mod data;
pub mod error;
pub mod model;
pub mod registry;
pub mod training;
pub mod utils;

pub use error::{ConfigError, TrainError};
pub use model::{
    layers::{LayerBuilder, LayerConfig, Padding},
    residual::{Placement, ResidualBlockConfig},
    upscale::{ScaleFactor, UpscaleConfig, UpscaleMethod},
    Model, ModelConfig,
};
pub use registry::{ActivationSpec, InitializerSpec, RegularizerSpec};
pub use training::{train, AdversarialTrainer, TrainingConfig, TrainingPhase};
