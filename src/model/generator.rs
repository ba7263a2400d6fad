use burn::{module::Module, prelude::*};

use crate::{
    error::Result,
    model::{
        layers::{total_penalty, Conv2dLayer, LayerBuilder, LayerConfig, Regularized},
        residual::{ResidualBlock, ResidualBlockConfig},
        upscale::{ScaleFactor, Upscale, UpscaleConfig, UpscaleMethod},
    },
    registry::ActivationSpec,
};

/// SRGAN generator: shallow feature conv, a residual trunk with a global
/// skip, progressive upscaling and a tanh output conv.
///
/// Inputs and outputs are in `[-1, 1]`.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    head: Conv2dLayer<B>,
    trunk: Vec<ResidualBlock<B>>,
    trunk_tail: Conv2dLayer<B>,
    expand: Conv2dLayer<B>,
    upscale: Upscale<B>,
    tail: Conv2dLayer<B>,
    scale: [usize; 2],
    channels: usize,
}

impl<B: Backend> Generator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let shallow = self.head.forward(input);

        let deep = self
            .trunk
            .iter()
            .fold(shallow.clone(), |x, block| block.forward(x));
        let deep = self.trunk_tail.forward(deep).add(shallow);

        let output = self.expand.forward(deep);
        let output = self.upscale.forward(output);
        self.tail.forward(output)
    }

    /// `[x, y]`
    pub fn scale(&self) -> [usize; 2] {
        self.scale
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl<B: Backend> Regularized<B> for Generator<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        total_penalty(
            [
                self.head.regularization_loss(),
                self.trunk_tail.regularization_loss(),
                self.expand.regularization_loss(),
                self.upscale.regularization_loss(),
                self.tail.regularization_loss(),
            ]
            .into_iter()
            .chain(self.trunk.iter().map(|block| block.regularization_loss())),
        )
    }
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 64)]
    pub filters: usize,
    #[config(default = 16)]
    pub residual_blocks: usize,
    /// `[x, y]`
    #[config(default = "[4, 4]")]
    pub scale: [usize; 2],
    #[config(default = "UpscaleMethod::PixelShuffleConv")]
    pub upscale: UpscaleMethod,
}

impl GeneratorConfig {
    pub fn init<B: Backend>(&self, builder: &LayerBuilder<'_, B>) -> Result<Generator<B>> {
        let filters = self.filters;
        let scale = ScaleFactor::new(self.scale[0], self.scale[1])?;

        let head = builder.named_conv2d("prelu_conv2d", self.channels, LayerConfig::new(filters, 9))?;

        let block = ResidualBlockConfig::new(filters, 3).with_layer(
            LayerConfig::new(filters, 3)
                .with_activation(Some(ActivationSpec::PRelu))
                .with_batchnorm(true),
        );
        let trunk = (0..self.residual_blocks)
            .map(|_| builder.residual_block(filters, &block))
            .collect::<Result<Vec<_>>>()?;
        let trunk_tail = builder.named_conv2d("bn_conv2d", filters, LayerConfig::new(filters, 3))?;

        let expanded = filters * 4;
        let expand = builder.conv2d(filters, &LayerConfig::new(expanded, 3))?;
        let upscale = builder.upscale(
            expanded,
            &UpscaleConfig::new(self.upscale.clone(), scale, self.channels)
                .with_direct_output(false)
                .with_activation(Some(ActivationSpec::PRelu)),
        )?;
        let tail = builder.named_conv2d("tanh_conv2d", expanded, LayerConfig::new(self.channels, 9))?;

        log::debug!(
            "generator: {} residual blocks, {} upscale steps",
            trunk.len(),
            upscale.num_steps()
        );

        Ok(Generator {
            head,
            trunk,
            trunk_tail,
            expand,
            upscale,
            tail,
            scale: self.scale,
            channels: self.channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};
    use rstest::rstest;

    type TestBackend = NdArray<f32>;

    fn small(scale: [usize; 2], upscale: UpscaleMethod) -> GeneratorConfig {
        GeneratorConfig::new()
            .with_filters(4)
            .with_residual_blocks(2)
            .with_scale(scale)
            .with_upscale(upscale)
    }

    #[rstest]
    #[case([2, 2], UpscaleMethod::PixelShuffleConv)]
    #[case([3, 3], UpscaleMethod::NearestReplicate)]
    #[case([4, 2], UpscaleMethod::TransposedConv)]
    fn output_is_scaled_and_bounded(#[case] scale: [usize; 2], #[case] method: UpscaleMethod) {
        let device = Default::default();
        let builder = LayerBuilder::<TestBackend>::new(&device, 0.0);
        let generator = small(scale, method).init(&builder).unwrap();

        let input = Tensor::<TestBackend, 4>::random([2, 3, 6, 5], Distribution::Default, &device);
        let output = generator.forward(input);

        assert_eq!(output.dims(), [2, 3, 6 * scale[1], 5 * scale[0]]);
        assert!(output.abs().max().into_scalar() <= 1.0);
    }

    #[test]
    fn zero_scale_is_a_config_error() {
        let device = Default::default();
        let builder = LayerBuilder::<TestBackend>::new(&device, 0.0);

        assert!(small([0, 2], UpscaleMethod::PixelShuffleConv)
            .init(&builder)
            .is_err());
    }

    #[test]
    fn regularization_follows_weight_decay() {
        let device = Default::default();
        let config = small([2, 2], UpscaleMethod::PixelShuffleConv);

        let free = config
            .init(&LayerBuilder::<TestBackend>::new(&device, 0.0))
            .unwrap();
        assert!(free.regularization_loss().is_none());

        let decayed = config
            .init(&LayerBuilder::<TestBackend>::new(&device, 1e-4))
            .unwrap();
        assert!(decayed.regularization_loss().unwrap().into_scalar() > 0.0);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = small([3, 2], UpscaleMethod::TransposedConv);
        let json = config.to_string();
        let loaded = GeneratorConfig::load_binary(json.as_bytes()).unwrap();

        assert_eq!(loaded.scale, [3, 2]);
        assert_eq!(loaded.upscale, UpscaleMethod::TransposedConv);
        assert_eq!(loaded.residual_blocks, 2);
    }
}
