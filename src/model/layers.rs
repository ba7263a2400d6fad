use burn::{
    module::{Ignored, Param},
    nn::{
        BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig, InstanceNorm,
        InstanceNormConfig, PRelu, PReluConfig,
    },
    prelude::*,
    tensor::{
        activation,
        module::{conv2d, conv3d, conv_transpose2d, conv_transpose3d},
        ops::{ConvOptions, ConvTransposeOptions},
    },
};

use crate::{
    error::{ConfigError, Result},
    model::{init, spectral_norm::SpectralNorm},
    registry::{
        resolve_layer_name, ActivationSpec, InitializerSpec, LayerKind, LayerOverrides,
        RegularizerSpec, WeightPenalty, LEAKY_RELU_SLOPE,
    },
};

pub const BATCH_NORM_MOMENTUM: f64 = 0.01;
pub const BATCH_NORM_EPSILON: f64 = 1e-3;
pub const GROUP_NORM_GROUPS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Output extent is `ceil(input / stride)`.
    Same,
    Valid,
}

/// Options for a single builder layer.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    pub filters: usize,
    pub kernel_size: usize,
    /// One value for every axis, or one per spatial axis.
    pub strides: Vec<usize>,
    pub padding: Padding,
    pub dilation: usize,
    pub activation: Option<ActivationSpec>,
    pub use_batchnorm: bool,
    pub use_instancenorm: bool,
    pub use_layernorm: bool,
    pub use_groupnorm: bool,
    pub use_sn: bool,
    pub kernel_initializer: InitializerSpec,
    pub kernel_regularizer: RegularizerSpec,
    pub use_bias: bool,
}

impl LayerConfig {
    pub fn new(filters: usize, kernel_size: usize) -> Self {
        Self {
            filters,
            kernel_size,
            strides: vec![1],
            padding: Padding::Same,
            dilation: 1,
            activation: None,
            use_batchnorm: false,
            use_instancenorm: false,
            use_layernorm: false,
            use_groupnorm: false,
            use_sn: false,
            kernel_initializer: InitializerSpec::HeNormal,
            kernel_regularizer: RegularizerSpec::L2,
            use_bias: true,
        }
    }

    pub fn with_filters(mut self, filters: usize) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.strides = vec![stride];
        self
    }

    pub fn with_strides(mut self, strides: Vec<usize>) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_activation(mut self, activation: Option<ActivationSpec>) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_batchnorm(mut self, enabled: bool) -> Self {
        self.use_batchnorm = enabled;
        self
    }

    pub fn with_instancenorm(mut self, enabled: bool) -> Self {
        self.use_instancenorm = enabled;
        self
    }

    pub fn with_layernorm(mut self, enabled: bool) -> Self {
        self.use_layernorm = enabled;
        self
    }

    pub fn with_groupnorm(mut self, enabled: bool) -> Self {
        self.use_groupnorm = enabled;
        self
    }

    pub fn with_sn(mut self, enabled: bool) -> Self {
        self.use_sn = enabled;
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

    pub fn with_bias(mut self, enabled: bool) -> Self {
        self.use_bias = enabled;
        self
    }

    /// Applies an alias's options. Flags are only ever switched on, and an
    /// activation chosen by the caller is kept.
    pub fn with_overrides(mut self, overrides: &LayerOverrides) -> Self {
        self.use_batchnorm |= overrides.use_batchnorm;
        self.use_sn |= overrides.use_sn;
        if self.activation.is_none() {
            self.activation = overrides.activation;
        }
        self
    }

    /// Same layer without any normalization or activation.
    pub fn linear_only(mut self) -> Self {
        self.activation = None;
        self.use_batchnorm = false;
        self.use_instancenorm = false;
        self.use_layernorm = false;
        self.use_groupnorm = false;
        self
    }

    pub(crate) fn has_norm(&self) -> bool {
        self.use_batchnorm || self.use_instancenorm || self.use_layernorm || self.use_groupnorm
    }

    fn validate(&self, layer: &'static str) -> Result<()> {
        let zero = [
            (self.filters, "filters"),
            (self.kernel_size, "kernel size"),
            (self.dilation, "dilation"),
        ]
        .into_iter()
        .find(|(value, _)| *value == 0);
        match zero {
            Some((_, what)) => Err(ConfigError::ZeroExtent { layer, what }),
            None => Ok(()),
        }
    }

    fn strides<const N: usize>(&self, layer: &'static str) -> Result<[usize; N]> {
        let invalid = || ConfigError::InvalidStride {
            layer,
            strides: self.strides.clone(),
            rank: N,
        };
        if self.strides.iter().any(|s| *s == 0) {
            return Err(invalid());
        }
        match self.strides.as_slice() {
            [stride] => Ok([*stride; N]),
            strides if strides.len() == N => {
                let mut out = [1; N];
                out.copy_from_slice(strides);
                Ok(out)
            }
            _ => Err(invalid()),
        }
    }

    fn effective_kernel(&self) -> usize {
        self.dilation * (self.kernel_size - 1) + 1
    }

    fn conv_padding(&self, layer: &'static str) -> Result<usize> {
        match self.padding {
            Padding::Valid => Ok(0),
            Padding::Same => {
                let extent = self.effective_kernel();
                if extent % 2 == 0 {
                    return Err(ConfigError::EvenKernel {
                        layer,
                        kernel: self.kernel_size,
                        dilation: self.dilation,
                    });
                }
                Ok((extent - 1) / 2)
            }
        }
    }

    /// `(padding, output padding)` such that output = input * stride.
    fn transposed_padding(&self, layer: &'static str, stride: usize) -> Result<(usize, usize)> {
        match self.padding {
            Padding::Valid => Ok((0, 0)),
            Padding::Same => {
                let extent = self.effective_kernel();
                let padding = if extent > stride {
                    (extent - stride + 1) / 2
                } else {
                    0
                };
                let padding_out = stride + 2 * padding - extent;
                if padding_out >= stride.max(self.dilation) {
                    return Err(ConfigError::EvenKernel {
                        layer,
                        kernel: self.kernel_size,
                        dilation: self.dilation,
                    });
                }
                Ok((padding, padding_out))
            }
        }
    }
}

/// Configured nonlinearity. PReLU carries one learned slope per channel.
#[derive(Module, Debug)]
pub struct Activation<B: Backend> {
    kind: Ignored<ActivationSpec>,
    prelu: Option<PRelu<B>>,
}

impl<B: Backend> Activation<B> {
    pub fn new(kind: ActivationSpec, channels: usize, device: &B::Device) -> Self {
        let prelu = match kind {
            ActivationSpec::PRelu => Some(
                PReluConfig::new()
                    .with_num_parameters(channels)
                    .init(device),
            ),
            _ => None,
        };

        Self {
            kind: Ignored(kind),
            prelu,
        }
    }

    pub fn kind(&self) -> ActivationSpec {
        self.kind.0
    }

    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        match (self.kind.0, &self.prelu) {
            (ActivationSpec::Relu, _) => activation::relu(input),
            (ActivationSpec::Tanh, _) => activation::tanh(input),
            (ActivationSpec::LeakyRelu, _) => activation::leaky_relu(input, LEAKY_RELU_SLOPE),
            (ActivationSpec::PRelu, Some(prelu)) => prelu.forward(input),
            (ActivationSpec::PRelu, None) => input,
        }
    }
}

/// Normalizations and activation following a convolution, in their fixed
/// order: batch, instance, layer, group, activation. `N` is the number of
/// spatial axes.
#[derive(Module, Debug)]
pub struct NormActivation<B: Backend, const N: usize> {
    batch_norm: Option<BatchNorm<B, N>>,
    instance_norm: Option<InstanceNorm<B>>,
    layer_norm: Option<GroupNorm<B>>,
    group_norm: Option<GroupNorm<B>>,
    activation: Option<Activation<B>>,
}

impl<B: Backend, const N: usize> NormActivation<B, N> {
    fn new(channels: usize, config: &LayerConfig, device: &B::Device) -> Result<Self> {
        if config.use_groupnorm && channels % GROUP_NORM_GROUPS != 0 {
            return Err(ConfigError::GroupNormChannels {
                channels,
                groups: GROUP_NORM_GROUPS,
            });
        }

        Ok(Self {
            batch_norm: config.use_batchnorm.then(|| {
                BatchNormConfig::new(channels)
                    .with_momentum(BATCH_NORM_MOMENTUM)
                    .with_epsilon(BATCH_NORM_EPSILON)
                    .init(device)
            }),
            instance_norm: config
                .use_instancenorm
                .then(|| InstanceNormConfig::new(channels).init(device)),
            layer_norm: config
                .use_layernorm
                .then(|| GroupNormConfig::new(1, channels).init(device)),
            group_norm: config
                .use_groupnorm
                .then(|| GroupNormConfig::new(GROUP_NORM_GROUPS, channels).init(device)),
            activation: config
                .activation
                .map(|kind| Activation::new(kind, channels, device)),
        })
    }

    pub fn normalize<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let mut x = input;
        if let Some(norm) = &self.batch_norm {
            x = norm.forward(x);
        }
        if let Some(norm) = &self.instance_norm {
            x = norm.forward(x);
        }
        if let Some(norm) = &self.layer_norm {
            x = norm.forward(x);
        }
        if let Some(norm) = &self.group_norm {
            x = norm.forward(x);
        }
        x
    }

    pub fn activate<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        match &self.activation {
            Some(activation) => activation.forward(input),
            None => input,
        }
    }

    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        self.activate(self.normalize(input))
    }

    pub fn activation(&self) -> Option<&Activation<B>> {
        self.activation.as_ref()
    }
}

/// A layer whose kernel may carry a weight penalty.
pub trait Regularized<B: Backend> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>>;
}

/// Sums the penalties that are present.
pub fn total_penalty<B: Backend>(
    penalties: impl IntoIterator<Item = Option<Tensor<B, 1>>>,
) -> Option<Tensor<B, 1>> {
    penalties
        .into_iter()
        .flatten()
        .reduce(|total, penalty| total + penalty)
}

fn penalty<B: Backend, const D: usize>(
    penalty: &Ignored<Option<WeightPenalty<B>>>,
    weight: &Param<Tensor<B, D>>,
) -> Option<Tensor<B, 1>> {
    penalty.0.as_ref().map(|p| p.penalty(weight.val()))
}

fn constrained<B: Backend, const D: usize>(
    weight: &Param<Tensor<B, D>>,
    spectral_norm: &Option<SpectralNorm<B>>,
) -> Tensor<B, D> {
    match spectral_norm {
        Some(sn) => sn.forward(weight.val()),
        None => weight.val(),
    }
}

#[derive(Module, Debug)]
pub struct Conv2dLayer<B: Backend> {
    weight: Param<Tensor<B, 4>>,
    bias: Option<Param<Tensor<B, 1>>>,
    spectral_norm: Option<SpectralNorm<B>>,
    stride: [usize; 2],
    padding: [usize; 2],
    dilation: [usize; 2],
    post: NormActivation<B, 2>,
    penalty: Ignored<Option<WeightPenalty<B>>>,
}

impl<B: Backend> Conv2dLayer<B> {
    /// Kernel after the spectral-norm rescale, `[filters, in, k, k]`.
    pub fn kernel(&self) -> Tensor<B, 4> {
        constrained(&self.weight, &self.spectral_norm)
    }

    pub fn spectral_norm(&self) -> Option<&SpectralNorm<B>> {
        self.spectral_norm.as_ref()
    }

    pub fn post(&self) -> &NormActivation<B, 2> {
        &self.post
    }

    /// Convolution and normalization, without the activation.
    pub fn pre_activation(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = conv2d(
            input,
            self.kernel(),
            self.bias.as_ref().map(|b| b.val()),
            ConvOptions::new(self.stride, self.padding, self.dilation, 1),
        );
        self.post.normalize(output)
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.post.activate(self.pre_activation(input))
    }

    /// Runs the layer with `activation` in place of the configured one.
    pub fn forward_with<F>(&self, input: Tensor<B, 4>, activation: F) -> Tensor<B, 4>
    where
        F: FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
    {
        activation(self.pre_activation(input))
    }
}

impl<B: Backend> Regularized<B> for Conv2dLayer<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        penalty(&self.penalty, &self.weight)
    }
}

#[derive(Module, Debug)]
pub struct Conv3dLayer<B: Backend> {
    weight: Param<Tensor<B, 5>>,
    bias: Option<Param<Tensor<B, 1>>>,
    stride: [usize; 3],
    padding: [usize; 3],
    dilation: [usize; 3],
    post: NormActivation<B, 3>,
    penalty: Ignored<Option<WeightPenalty<B>>>,
}

impl<B: Backend> Conv3dLayer<B> {
    pub fn pre_activation(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let output = conv3d(
            input,
            self.weight.val(),
            self.bias.as_ref().map(|b| b.val()),
            ConvOptions::new(self.stride, self.padding, self.dilation, 1),
        );
        self.post.normalize(output)
    }

    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.post.activate(self.pre_activation(input))
    }

    pub fn forward_with<F>(&self, input: Tensor<B, 5>, activation: F) -> Tensor<B, 5>
    where
        F: FnOnce(Tensor<B, 5>) -> Tensor<B, 5>,
    {
        activation(self.pre_activation(input))
    }
}

impl<B: Backend> Regularized<B> for Conv3dLayer<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        penalty(&self.penalty, &self.weight)
    }
}

#[derive(Module, Debug)]
pub struct Deconv2dLayer<B: Backend> {
    /// `[in, filters, k, k]`
    weight: Param<Tensor<B, 4>>,
    bias: Option<Param<Tensor<B, 1>>>,
    spectral_norm: Option<SpectralNorm<B>>,
    stride: [usize; 2],
    padding: [usize; 2],
    padding_out: [usize; 2],
    dilation: [usize; 2],
    post: NormActivation<B, 2>,
    penalty: Ignored<Option<WeightPenalty<B>>>,
}

impl<B: Backend> Deconv2dLayer<B> {
    pub fn pre_activation(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = conv_transpose2d(
            input,
            constrained(&self.weight, &self.spectral_norm),
            self.bias.as_ref().map(|b| b.val()),
            ConvTransposeOptions::new(
                self.stride,
                self.padding,
                self.padding_out,
                self.dilation,
                1,
            ),
        );
        self.post.normalize(output)
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.post.activate(self.pre_activation(input))
    }

    pub fn forward_with<F>(&self, input: Tensor<B, 4>, activation: F) -> Tensor<B, 4>
    where
        F: FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
    {
        activation(self.pre_activation(input))
    }
}

impl<B: Backend> Regularized<B> for Deconv2dLayer<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        penalty(&self.penalty, &self.weight)
    }
}

#[derive(Module, Debug)]
pub struct Deconv3dLayer<B: Backend> {
    /// `[in, filters, k, k, k]`
    weight: Param<Tensor<B, 5>>,
    bias: Option<Param<Tensor<B, 1>>>,
    stride: [usize; 3],
    padding: [usize; 3],
    padding_out: [usize; 3],
    dilation: [usize; 3],
    post: NormActivation<B, 3>,
    penalty: Ignored<Option<WeightPenalty<B>>>,
}

impl<B: Backend> Deconv3dLayer<B> {
    pub fn pre_activation(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let output = conv_transpose3d(
            input,
            self.weight.val(),
            self.bias.as_ref().map(|b| b.val()),
            ConvTransposeOptions::new(
                self.stride,
                self.padding,
                self.padding_out,
                self.dilation,
                1,
            ),
        );
        self.post.normalize(output)
    }

    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.post.activate(self.pre_activation(input))
    }
}

impl<B: Backend> Regularized<B> for Deconv3dLayer<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        penalty(&self.penalty, &self.weight)
    }
}

#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    /// `[in, features]`
    weight: Param<Tensor<B, 2>>,
    bias: Option<Param<Tensor<B, 1>>>,
    spectral_norm: Option<SpectralNorm<B>>,
    activation: Option<Activation<B>>,
    penalty: Ignored<Option<WeightPenalty<B>>>,
}

impl<B: Backend> DenseLayer<B> {
    pub fn pre_activation(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = input.matmul(constrained(&self.weight, &self.spectral_norm));
        match &self.bias {
            Some(bias) => output + bias.val().unsqueeze(),
            None => output,
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = self.pre_activation(input);
        match &self.activation {
            Some(activation) => activation.forward(output),
            None => output,
        }
    }

    pub fn forward_with<F>(&self, input: Tensor<B, 2>, activation: F) -> Tensor<B, 2>
    where
        F: FnOnce(Tensor<B, 2>) -> Tensor<B, 2>,
    {
        activation(self.pre_activation(input))
    }
}

impl<B: Backend> Regularized<B> for DenseLayer<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        penalty(&self.penalty, &self.weight)
    }
}

/// Builds layers on one device under one model-wide weight decay.
#[derive(Debug, Clone)]
pub struct LayerBuilder<'a, B: Backend> {
    device: &'a B::Device,
    weight_decay: f64,
}

impl<'a, B: Backend> LayerBuilder<'a, B> {
    pub fn new(device: &'a B::Device, weight_decay: f64) -> Self {
        Self {
            device,
            weight_decay,
        }
    }

    pub fn device(&self) -> &'a B::Device {
        self.device
    }

    pub fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    /// The torch scheme never carries a kernel penalty.
    fn penalty(&self, config: &LayerConfig) -> Result<Ignored<Option<WeightPenalty<B>>>> {
        let penalty = match config.kernel_initializer {
            InitializerSpec::Torch => None,
            _ => config.kernel_regularizer.resolve(self.weight_decay)?,
        };
        Ok(Ignored(penalty))
    }

    fn bias(&self, config: &LayerConfig, fan_in: usize) -> Option<Param<Tensor<B, 1>>> {
        config
            .use_bias
            .then(|| init::bias(&config.kernel_initializer, config.filters, fan_in, self.device))
    }

    pub fn norm_activation<const N: usize>(
        &self,
        channels: usize,
        config: &LayerConfig,
    ) -> Result<NormActivation<B, N>> {
        NormActivation::new(channels, config, self.device)
    }

    pub fn conv2d(&self, in_channels: usize, config: &LayerConfig) -> Result<Conv2dLayer<B>> {
        config.validate("conv2d")?;
        let stride = config.strides::<2>("conv2d")?;
        let padding = config.conv_padding("conv2d")?;
        let k = config.kernel_size;
        let fan_in = in_channels * k * k;

        let weight = init::kernel(
            &config.kernel_initializer,
            [config.filters, in_channels, k, k],
            fan_in,
            config.filters * k * k,
            self.device,
        )?;

        log::debug!(
            "conv2d {in_channels}->{} k{k} stride {stride:?} sn={} bn={} act={:?}",
            config.filters,
            config.use_sn,
            config.use_batchnorm,
            config.activation,
        );

        Ok(Conv2dLayer {
            weight,
            bias: self.bias(config, fan_in),
            spectral_norm: config
                .use_sn
                .then(|| SpectralNorm::new(config.filters, 1, self.device)),
            stride,
            padding: [padding; 2],
            dilation: [config.dilation; 2],
            post: self.norm_activation(config.filters, config)?,
            penalty: self.penalty(config)?,
        })
    }

    pub fn conv3d(&self, in_channels: usize, config: &LayerConfig) -> Result<Conv3dLayer<B>> {
        if config.use_sn {
            return Err(ConfigError::Unsupported {
                layer: "conv3d",
                option: "spectral norm",
            });
        }
        config.validate("conv3d")?;
        let stride = config.strides::<3>("conv3d")?;
        let padding = config.conv_padding("conv3d")?;
        let k = config.kernel_size;
        let fan_in = in_channels * k * k * k;

        let weight = init::kernel(
            &config.kernel_initializer,
            [config.filters, in_channels, k, k, k],
            fan_in,
            config.filters * k * k * k,
            self.device,
        )?;

        log::debug!(
            "conv3d {in_channels}->{} k{k} stride {stride:?} bn={} act={:?}",
            config.filters,
            config.use_batchnorm,
            config.activation,
        );

        Ok(Conv3dLayer {
            weight,
            bias: self.bias(config, fan_in),
            stride,
            padding: [padding; 3],
            dilation: [config.dilation; 3],
            post: self.norm_activation(config.filters, config)?,
            penalty: self.penalty(config)?,
        })
    }

    pub fn deconv2d(&self, in_channels: usize, config: &LayerConfig) -> Result<Deconv2dLayer<B>> {
        config.validate("deconv2d")?;
        let stride = config.strides::<2>("deconv2d")?;
        let (pad_y, out_y) = config.transposed_padding("deconv2d", stride[0])?;
        let (pad_x, out_x) = config.transposed_padding("deconv2d", stride[1])?;
        let k = config.kernel_size;
        let fan_in = config.filters * k * k;

        let weight = init::kernel(
            &config.kernel_initializer,
            [in_channels, config.filters, k, k],
            fan_in,
            in_channels * k * k,
            self.device,
        )?;

        log::debug!(
            "deconv2d {in_channels}->{} k{k} stride {stride:?} sn={} act={:?}",
            config.filters,
            config.use_sn,
            config.activation,
        );

        Ok(Deconv2dLayer {
            weight,
            bias: self.bias(config, fan_in),
            spectral_norm: config
                .use_sn
                .then(|| SpectralNorm::new(in_channels, 1, self.device)),
            stride,
            padding: [pad_y, pad_x],
            padding_out: [out_y, out_x],
            dilation: [config.dilation; 2],
            post: self.norm_activation(config.filters, config)?,
            penalty: self.penalty(config)?,
        })
    }

    pub fn deconv3d(&self, in_channels: usize, config: &LayerConfig) -> Result<Deconv3dLayer<B>> {
        if config.use_sn {
            return Err(ConfigError::Unsupported {
                layer: "deconv3d",
                option: "spectral norm",
            });
        }
        config.validate("deconv3d")?;
        let stride = config.strides::<3>("deconv3d")?;
        let mut padding = [0; 3];
        let mut padding_out = [0; 3];
        for (axis, stride) in stride.into_iter().enumerate() {
            (padding[axis], padding_out[axis]) = config.transposed_padding("deconv3d", stride)?;
        }
        let k = config.kernel_size;
        let fan_in = config.filters * k * k * k;

        let weight = init::kernel(
            &config.kernel_initializer,
            [in_channels, config.filters, k, k, k],
            fan_in,
            in_channels * k * k * k,
            self.device,
        )?;

        log::debug!(
            "deconv3d {in_channels}->{} k{k} stride {stride:?} act={:?}",
            config.filters,
            config.activation,
        );

        Ok(Deconv3dLayer {
            weight,
            bias: self.bias(config, fan_in),
            stride,
            padding,
            padding_out,
            dilation: [config.dilation; 3],
            post: self.norm_activation(config.filters, config)?,
            penalty: self.penalty(config)?,
        })
    }

    pub fn dense(&self, in_features: usize, config: &LayerConfig) -> Result<DenseLayer<B>> {
        let unsupported = [
            (config.use_batchnorm, "batch norm"),
            (config.use_instancenorm, "instance norm"),
            (config.use_layernorm, "layer norm"),
            (config.use_groupnorm, "group norm"),
        ];
        if let Some((_, option)) = unsupported.into_iter().find(|(enabled, _)| *enabled) {
            return Err(ConfigError::Unsupported {
                layer: "dense",
                option,
            });
        }
        if config.filters == 0 {
            return Err(ConfigError::ZeroExtent {
                layer: "dense",
                what: "filters",
            });
        }

        let weight = init::kernel(
            &config.kernel_initializer,
            [in_features, config.filters],
            in_features,
            config.filters,
            self.device,
        )?;

        log::debug!(
            "dense {in_features}->{} sn={} act={:?}",
            config.filters,
            config.use_sn,
            config.activation,
        );

        Ok(DenseLayer {
            weight,
            bias: self.bias(config, in_features),
            spectral_norm: config
                .use_sn
                .then(|| SpectralNorm::new(in_features, 1, self.device)),
            activation: config
                .activation
                .map(|kind| Activation::new(kind, config.filters, self.device)),
            penalty: self.penalty(config)?,
        })
    }

    fn overrides(name: &str, expected: LayerKind) -> Result<LayerOverrides> {
        let overrides = resolve_layer_name(name)
            .ok_or_else(|| ConfigError::UnknownLayerName(name.to_string()))?;
        if overrides.kind != expected {
            return Err(ConfigError::LayerKindMismatch {
                name: name.to_string(),
                expected: expected.name(),
                found: overrides.kind.name(),
            });
        }
        Ok(overrides)
    }

    /// Builds a conv2d from an alias such as `bn_sn_leaky_conv2d`.
    pub fn named_conv2d(
        &self,
        name: &str,
        in_channels: usize,
        config: LayerConfig,
    ) -> Result<Conv2dLayer<B>> {
        let overrides = Self::overrides(name, LayerKind::Conv2d)?;
        self.conv2d(in_channels, &config.with_overrides(&overrides))
    }

    pub fn named_conv3d(
        &self,
        name: &str,
        in_channels: usize,
        config: LayerConfig,
    ) -> Result<Conv3dLayer<B>> {
        let overrides = Self::overrides(name, LayerKind::Conv3d)?;
        self.conv3d(in_channels, &config.with_overrides(&overrides))
    }

    pub fn named_dense(
        &self,
        name: &str,
        in_features: usize,
        config: LayerConfig,
    ) -> Result<DenseLayer<B>> {
        let overrides = Self::overrides(name, LayerKind::Dense)?;
        self.dense(in_features, &config.with_overrides(&overrides))
    }
}
