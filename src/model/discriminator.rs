use burn::{module::Module, prelude::*};

use crate::{
    error::Result,
    model::layers::{
        total_penalty, Conv2dLayer, DenseLayer, LayerBuilder, LayerConfig, Regularized,
    },
};

const MAX_FILTERS: usize = 512;

/// DCGAN-style critic. Produces one logit per image; any input size works
/// since features are averaged over space before the dense head.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    head: Conv2dLayer<B>,
    blocks: Vec<Conv2dLayer<B>>,
    fc: DenseLayer<B>,
    out: DenseLayer<B>,
}

impl<B: Backend> Discriminator<B> {
    /// `[b, c, h, w] -> [b, 1]` logits.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let output = self.head.forward(input);
        let output = self
            .blocks
            .iter()
            .fold(output, |x, block| block.forward(x));

        let pooled = output.mean_dim(3).mean_dim(2).flatten(1, 3);
        self.out.forward(self.fc.forward(pooled))
    }
}

impl<B: Backend> Regularized<B> for Discriminator<B> {
    fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        total_penalty(
            [
                self.head.regularization_loss(),
                self.fc.regularization_loss(),
                self.out.regularization_loss(),
            ]
            .into_iter()
            .chain(self.blocks.iter().map(|block| block.regularization_loss())),
        )
    }
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 64)]
    pub filters: usize,
    /// Number of stride-2 blocks.
    #[config(default = 4)]
    pub layers: usize,
    #[config(default = false)]
    pub spectral_norm: bool,
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, builder: &LayerBuilder<'_, B>) -> Result<Discriminator<B>> {
        let head = builder.named_conv2d(
            "leaky_conv2d",
            self.channels,
            LayerConfig::new(self.filters, 3),
        )?;

        let block_name = if self.spectral_norm {
            "bn_sn_leaky_conv2d"
        } else {
            "bn_leaky_conv2d"
        };
        let mut blocks = Vec::with_capacity(self.layers);
        let mut channels = self.filters;
        for i in 0..self.layers {
            let filters = (self.filters << (i + 1)).min(MAX_FILTERS);
            let config = LayerConfig::new(filters, 3).with_stride(2);
            blocks.push(builder.named_conv2d(block_name, channels, config)?);
            channels = filters;
        }

        let dense_name = if self.spectral_norm {
            "sn_leaky_dense"
        } else {
            "leaky_dense"
        };
        let hidden = self.filters * 16;
        let fc = builder.named_dense(dense_name, channels, LayerConfig::new(hidden, 1))?;
        let out = builder.dense(hidden, &LayerConfig::new(1, 1))?;

        Ok(Discriminator {
            head,
            blocks,
            fc,
            out,
        })
    }
}
