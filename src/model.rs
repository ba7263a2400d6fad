pub mod discriminator;
pub mod generator;
mod init;
pub mod layers;
pub mod residual;
pub mod spectral_norm;
pub mod upscale;
pub mod vgg19;

use burn::{module::Module, prelude::*};

use crate::{
    error::Result,
    model::{
        discriminator::{Discriminator, DiscriminatorConfig},
        generator::{Generator, GeneratorConfig},
        layers::LayerBuilder,
    },
};

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    pub generator: Generator<B>,
    pub discriminator: Discriminator<B>,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = "GeneratorConfig::new()")]
    pub generator: GeneratorConfig,
    #[config(default = "DiscriminatorConfig::new()")]
    pub discriminator: DiscriminatorConfig,
}

impl ModelConfig {
    /// Builds both networks under one weight decay.
    pub fn init<B: Backend>(&self, device: &B::Device, weight_decay: f64) -> Result<Model<B>> {
        let builder = LayerBuilder::new(device, weight_decay);
        let generator = self.generator.init(&builder)?;
        let discriminator = self.discriminator.init(&builder)?;

        Ok(Model {
            generator,
            discriminator,
        })
    }
}
