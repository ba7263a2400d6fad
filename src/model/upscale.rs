use std::str::FromStr;

use burn::prelude::*;

use crate::{
    error::{ConfigError, Result},
    model::layers::{
        total_penalty, Activation, Conv2dLayer, Deconv2dLayer, LayerBuilder, LayerConfig,
        Regularized,
    },
    registry::{ActivationSpec, InitializerSpec, RegularizerSpec},
};

/// Integer upscaling factor along width (`x`) and height (`y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFactor {
    x: usize,
    y: usize,
}

impl ScaleFactor {
    pub fn new(x: usize, y: usize) -> Result<Self> {
        if x == 0 || y == 0 {
            return Err(ConfigError::InvalidScale { x, y });
        }
        Ok(Self { x, y })
    }

    pub fn uniform(scale: usize) -> Result<Self> {
        Self::new(scale, scale)
    }

    pub fn x(&self) -> usize {
        self.x
    }

    pub fn y(&self) -> usize {
        self.y
    }
}

#[derive(Config, Debug, PartialEq)]
pub enum UpscaleMethod {
    /// Convolution to `features * fx * fy` channels, then pixel shuffle.
    PixelShuffleConv,
    /// Channel replication, then pixel shuffle.
    NearestReplicate,
    /// One strided transposed convolution per stage.
    TransposedConv,
}

impl FromStr for UpscaleMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "espcn" => Ok(Self::PixelShuffleConv),
            "nearest" => Ok(Self::NearestReplicate),
            "deconv" => Ok(Self::TransposedConv),
            _ => Err(ConfigError::UnknownUpscaleMethod(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscaleStage {
    /// Factor 2 on both axes.
    Binary,
    /// Whatever factor remains, in one go.
    Terminal { x: usize, y: usize },
}

impl UpscaleStage {
    /// `(x, y)`
    pub fn factor(&self) -> (usize, usize) {
        match self {
            Self::Binary => (2, 2),
            Self::Terminal { x, y } => (*x, *y),
        }
    }
}

/// Splits a scale into stages: halve both axes while both are even, then
/// finish with a single stage for the rest.
///
/// The even test is joint, so `(4, 2)` becomes one binary stage followed by a
/// terminal `(2, 1)` stage.
pub fn plan(scale: ScaleFactor) -> Vec<UpscaleStage> {
    let (mut x, mut y) = (scale.x, scale.y);
    let mut stages = Vec::new();

    while x > 1 || y > 1 {
        if x % 2 == 1 || y % 2 == 1 {
            stages.push(UpscaleStage::Terminal { x, y });
            break;
        }
        x /= 2;
        y /= 2;
        stages.push(UpscaleStage::Binary);
    }
    stages
}

/// Moves blocks of `x * y` channels into space.
///
/// `[b, c * y * x, h, w] -> [b, c, h * y, w * x]`, where input channel
/// `c * y * x + i * x + j` lands at row offset `i` and column offset `j`.
#[derive(Module, Debug, Clone)]
pub struct PixelShuffler {
    factor: [usize; 2],
}

impl PixelShuffler {
    /// `factor` is `[x, y]`.
    pub fn new(factor: [usize; 2]) -> Self {
        Self { factor }
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch_size, channels, height, width] = input.dims();
        let [fx, fy] = self.factor;
        let output_channels = channels / (fx * fy);

        input
            .reshape([batch_size, output_channels, fy, fx, height, width])
            .permute([0, 1, 4, 2, 5, 3])
            .reshape([batch_size, output_channels, height * fy, width * fx])
    }
}

/// Options for [`LayerBuilder::upscale`].
#[derive(Debug, Clone)]
pub struct UpscaleConfig {
    pub method: UpscaleMethod,
    pub scale: ScaleFactor,
    /// Emit `channels` features instead of keeping the input's count.
    pub direct_output: bool,
    pub channels: usize,
    /// Applied after every stage.
    pub activation: Option<ActivationSpec>,
    pub kernel_initializer: InitializerSpec,
    pub kernel_regularizer: RegularizerSpec,
    pub use_bias: bool,
}

impl UpscaleConfig {
    pub fn new(method: UpscaleMethod, scale: ScaleFactor, channels: usize) -> Self {
        Self {
            method,
            scale,
            direct_output: true,
            channels,
            activation: None,
            kernel_initializer: InitializerSpec::HeNormal,
            kernel_regularizer: RegularizerSpec::L2,
            use_bias: true,
        }
    }

    pub fn with_direct_output(mut self, direct_output: bool) -> Self {
        self.direct_output = direct_output;
        self
    }

    pub fn with_activation(mut self, activation: Option<ActivationSpec>) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_kernel_initializer(mut self, initializer: InitializerSpec) -> Self {
        self.kernel_initializer = initializer;
        self
    }

    pub fn with_kernel_regularizer(mut self, regularizer: RegularizerSpec) -> Self {
        self.kernel_regularizer = regularizer;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    fn stage_layer(&self, filters: usize) -> LayerConfig {
        LayerConfig::new(filters, 3)
            .with_kernel_initializer(self.kernel_initializer.clone())
            .with_kernel_regularizer(self.kernel_regularizer.clone())
            .with_bias(self.use_bias)
    }
}

#[derive(Module, Debug)]
pub struct UpscaleStep<B: Backend> {
    conv: Option<Conv2dLayer<B>>,
    deconv: Option<Deconv2dLayer<B>>,
    shuffle: Option<PixelShuffler>,
    /// Channel replication factor of the nearest method.
    replicate: usize,
    activation: Option<Activation<B>>,
}

impl<B: Backend> UpscaleStep<B> {
    fn upsample(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input;
        if let Some(conv) = &self.conv {
            x = conv.forward(x);
        }
        if let Some(deconv) = &self.deconv {
            x = deconv.forward(x);
        }
        if self.replicate > 1 {
            let [batch_size, channels, height, width] = x.dims();
            x = x
                .unsqueeze_dim::<5>(2)
                .repeat_dim(2, self.replicate)
                .reshape([batch_size, channels * self.replicate, height, width]);
        }
        match &self.shuffle {
            Some(shuffle) => shuffle.forward(x),
            None => x,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.upsample(input);
        match &self.activation {
            Some(activation) => activation.forward(output),
            None => output,
        }
    }
}

impl<B: Backend> Regularized<B> for UpscaleStep<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        total_penalty([
            self.conv.as_ref().and_then(|c| c.regularization_loss()),
            self.deconv.as_ref().and_then(|d| d.regularization_loss()),
        ])
    }
}

/// Progressive upsampler, one [`UpscaleStep`] per planned stage.
#[derive(Module, Debug)]
pub struct Upscale<B: Backend> {
    steps: Vec<UpscaleStep<B>>,
}

impl<B: Backend> Upscale<B> {
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.steps
            .iter()
            .fold(input, |x, step| step.forward(x))
    }

    /// Applies `activation` after every stage instead of the configured one.
    pub fn forward_with<F>(&self, input: Tensor<B, 4>, activation: F) -> Tensor<B, 4>
    where
        F: Fn(Tensor<B, 4>) -> Tensor<B, 4>,
    {
        self.steps
            .iter()
            .fold(input, |x, step| activation(step.upsample(x)))
    }
}

impl<B: Backend> Regularized<B> for Upscale<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        total_penalty(self.steps.iter().map(|step| step.regularization_loss()))
    }
}

impl<B: Backend> LayerBuilder<'_, B> {
    pub fn upscale(&self, in_channels: usize, config: &UpscaleConfig) -> Result<Upscale<B>> {
        let stages = plan(config.scale);
        // without a stage `direct_output` has no effect; the input passes through
        let features = match config.method {
            UpscaleMethod::NearestReplicate => in_channels,
            _ if config.direct_output => config.channels,
            _ => in_channels,
        };
        log::debug!(
            "upscale {:?} x{} y{} {in_channels}->{features}: {stages:?}",
            config.method,
            config.scale.x,
            config.scale.y,
        );

        let mut steps = Vec::with_capacity(stages.len());
        let mut channels = in_channels;
        for stage in stages {
            let (fx, fy) = stage.factor();
            let mut step = UpscaleStep {
                conv: None,
                deconv: None,
                shuffle: None,
                replicate: 1,
                activation: config
                    .activation
                    .map(|kind| Activation::new(kind, features, self.device())),
            };
            match config.method {
                UpscaleMethod::PixelShuffleConv => {
                    let layer = config.stage_layer(features * fx * fy);
                    step.conv = Some(self.conv2d(channels, &layer)?);
                    step.shuffle = Some(PixelShuffler::new([fx, fy]));
                }
                UpscaleMethod::NearestReplicate => {
                    step.replicate = fx * fy;
                    step.shuffle = Some(PixelShuffler::new([fx, fy]));
                }
                UpscaleMethod::TransposedConv => {
                    let layer = config.stage_layer(features).with_strides(vec![fy, fx]);
                    step.deconv = Some(self.deconv2d(channels, &layer)?);
                }
            }
            steps.push(step);
            channels = features;
        }

        Ok(Upscale { steps })
    }
}
