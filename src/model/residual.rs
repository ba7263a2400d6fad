use std::str::FromStr;

use burn::prelude::*;

use crate::{
    error::{ConfigError, Result},
    model::layers::{
        total_penalty, Conv2dLayer, Conv3dLayer, LayerBuilder, LayerConfig, NormActivation,
        Regularized,
    },
    registry::RegularizerSpec,
};

/// Where the block's normalization and activation sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Applied to the block input, ahead of both convolutions.
    Front,
    /// Applied by the first convolution; the second keeps only normalization.
    #[default]
    Behind,
}

impl FromStr for Placement {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front" => Ok(Self::Front),
            "behind" => Ok(Self::Behind),
            _ => Err(ConfigError::UnknownPlacement(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResidualBlockConfig {
    pub filters: usize,
    pub kernel_size: usize,
    /// Carried by the second convolution and the projection shortcut.
    pub strides: Vec<usize>,
    pub placement: Placement,
    /// Options shared by both convolutions. Its filters, kernel size and
    /// strides are replaced by the block's.
    pub layer: LayerConfig,
}

impl ResidualBlockConfig {
    pub fn new(filters: usize, kernel_size: usize) -> Self {
        Self {
            filters,
            kernel_size,
            strides: vec![1],
            placement: Placement::Behind,
            layer: LayerConfig::new(filters, kernel_size),
        }
    }

    pub fn with_strides(mut self, strides: Vec<usize>) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_layer(mut self, layer: LayerConfig) -> Self {
        self.layer = layer;
        self
    }

    fn base(&self) -> LayerConfig {
        self.layer
            .clone()
            .with_filters(self.filters)
            .with_kernel_size(self.kernel_size)
            .with_stride(1)
    }

    fn plan(&self, in_channels: usize) -> BlockPlan {
        let base = self.base();
        let (pre, first, second) = match self.placement {
            Placement::Front => {
                let pre = (base.has_norm() || base.activation.is_some()).then(|| base.clone());
                let conv = base.linear_only();
                (pre, conv.clone(), conv)
            }
            Placement::Behind => {
                let second = base.clone().with_activation(None);
                (None, base, second)
            }
        };
        let second = second.with_strides(self.strides.clone());

        let downsample = self.strides.iter().any(|s| *s != 1);
        let shortcut = (in_channels != self.filters || downsample).then(|| {
            LayerConfig::new(self.filters, 1)
                .with_strides(self.strides.clone())
                .with_kernel_initializer(self.layer.kernel_initializer.clone())
                .with_kernel_regularizer(RegularizerSpec::L2)
        });

        BlockPlan {
            pre,
            first,
            second,
            shortcut,
        }
    }
}

/// Per-layer configs of one block. `pre` exists only for front placement.
struct BlockPlan {
    pre: Option<LayerConfig>,
    first: LayerConfig,
    second: LayerConfig,
    shortcut: Option<LayerConfig>,
}

/// `shortcut(x) + conv2(conv1(x))`, with an identity shortcut when shapes
/// already agree.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pre: Option<NormActivation<B, 2>>,
    conv1: Conv2dLayer<B>,
    conv2: Conv2dLayer<B>,
    shortcut: Option<Conv2dLayer<B>>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.pre {
            Some(pre) => pre.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.conv2.forward(self.conv1.forward(x));

        let shortcut = match &self.shortcut {
            Some(projection) => projection.forward(input),
            None => input,
        };
        shortcut.add(x)
    }
}

impl<B: Backend> Regularized<B> for ResidualBlock<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        total_penalty([
            self.conv1.regularization_loss(),
            self.conv2.regularization_loss(),
            self.shortcut.as_ref().and_then(|s| s.regularization_loss()),
        ])
    }
}

/// Volumetric counterpart of [`ResidualBlock`].
#[derive(Module, Debug)]
pub struct ResidualBlock3d<B: Backend> {
    pre: Option<NormActivation<B, 3>>,
    conv1: Conv3dLayer<B>,
    conv2: Conv3dLayer<B>,
    shortcut: Option<Conv3dLayer<B>>,
}

impl<B: Backend> ResidualBlock3d<B> {
    pub fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }

    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = match &self.pre {
            Some(pre) => pre.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.conv2.forward(self.conv1.forward(x));

        let shortcut = match &self.shortcut {
            Some(projection) => projection.forward(input),
            None => input,
        };
        shortcut.add(x)
    }
}

impl<B: Backend> Regularized<B> for ResidualBlock3d<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        total_penalty([
            self.conv1.regularization_loss(),
            self.conv2.regularization_loss(),
            self.shortcut.as_ref().and_then(|s| s.regularization_loss()),
        ])
    }
}

impl<B: Backend> LayerBuilder<'_, B> {
    pub fn residual_block(
        &self,
        in_channels: usize,
        config: &ResidualBlockConfig,
    ) -> Result<ResidualBlock<B>> {
        let BlockPlan {
            pre,
            first,
            second,
            shortcut,
        } = config.plan(in_channels);
        log::debug!(
            "residual block {in_channels}->{} {:?} projection={}",
            config.filters,
            config.placement,
            shortcut.is_some(),
        );

        Ok(ResidualBlock {
            pre: pre
                .map(|pre| self.norm_activation(in_channels, &pre))
                .transpose()?,
            conv1: self.conv2d(in_channels, &first)?,
            conv2: self.conv2d(config.filters, &second)?,
            shortcut: shortcut
                .map(|shortcut| self.conv2d(in_channels, &shortcut))
                .transpose()?,
        })
    }

    pub fn residual_block3d(
        &self,
        in_channels: usize,
        config: &ResidualBlockConfig,
    ) -> Result<ResidualBlock3d<B>> {
        let BlockPlan {
            pre,
            first,
            second,
            shortcut,
        } = config.plan(in_channels);
        log::debug!(
            "residual block 3d {in_channels}->{} {:?} projection={}",
            config.filters,
            config.placement,
            shortcut.is_some(),
        );

        Ok(ResidualBlock3d {
            pre: pre
                .map(|pre| self.norm_activation(in_channels, &pre))
                .transpose()?,
            conv1: self.conv3d(in_channels, &first)?,
            conv2: self.conv3d(config.filters, &second)?,
            shortcut: shortcut
                .map(|shortcut| self.conv3d(in_channels, &shortcut))
                .transpose()?,
        })
    }
}
